//! handlers/tracking_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::services::tracking_ledger::TrackingLedger;

/// GET /api/tracking/campaigns/{id}/contacts/{contact_id}
pub async fn contact_history_endpoint(
    ledger: web::Data<TrackingLedger>,
    path: web::Path<(String, i64)>,
) -> HttpResponse {
    let (campaign_id, contact_id) = path.into_inner();

    match ledger.history(&campaign_id, contact_id).await {
        Ok(records) => HttpResponse::Ok().json(json!({
            "success": true,
            "records": records
        })),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "success": false,
            "error": "Internal server error",
            "details": format!("{:?}", e)
        })),
    }
}
