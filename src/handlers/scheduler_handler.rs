//! handlers/scheduler_handler.rs
//! Disparadores HTTP de las pasadas del scheduler.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde_json::json;

use crate::services::dispatch_coordinator::DispatchCoordinator;

/// POST /api/scheduler/campaigns/{id}/run
pub async fn run_campaign_pass_endpoint(
    coordinator: web::Data<DispatchCoordinator>,
    path: web::Path<String>,
) -> HttpResponse {
    let campaign_id = path.into_inner();
    log::info!("Entrando a run_campaign_pass_endpoint campaign_id={}", campaign_id);

    match coordinator.run_scheduler_pass(&campaign_id).await {
        Ok(summary) => HttpResponse::Ok().json(json!({
            "success": true,
            "summary": summary
        })),
        Err(e) => {
            log::error!("Error en la pasada de {}: {:?}", campaign_id, e);
            HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": format!("{e:#}")
            }))
        }
    }
}

/// POST /api/scheduler/run
pub async fn run_all_campaigns_endpoint(
    coordinator: web::Data<DispatchCoordinator>,
) -> HttpResponse {
    match coordinator.run_active_campaigns().await {
        Ok(summaries) => HttpResponse::Ok().json(json!({
            "success": true,
            "campaigns": summaries.len(),
            "summaries": summaries
        })),
        Err(e) => {
            log::error!("Error listando campañas activas: {:?}", e);
            HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": format!("{e:#}")
            }))
        }
    }
}

/// GET /api/scheduler/campaigns/{id}/preview
pub async fn preview_campaign_endpoint(
    coordinator: web::Data<DispatchCoordinator>,
    path: web::Path<String>,
) -> HttpResponse {
    let campaign_id = path.into_inner();

    match coordinator.preview_campaign(&campaign_id, Utc::now()).await {
        Ok(contacts) => HttpResponse::Ok().json(json!({
            "success": true,
            "campaign_id": campaign_id,
            "due": contacts.iter().filter(|c| c.due).count(),
            "contacts": contacts
        })),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "success": false,
            "error": format!("{e:#}")
        })),
    }
}
