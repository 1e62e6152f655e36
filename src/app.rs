//! app.rs
use crate::handlers::{scheduler_handler, tracking_handler};
use actix_web::web;

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::scope("/scheduler")
                    .route(
                        "/run",
                        web::post().to(scheduler_handler::run_all_campaigns_endpoint),
                    )
                    .route(
                        "/campaigns/{id}/run",
                        web::post().to(scheduler_handler::run_campaign_pass_endpoint),
                    )
                    .route(
                        "/campaigns/{id}/preview",
                        web::get().to(scheduler_handler::preview_campaign_endpoint),
                    ),
            )
            .service(
                web::scope("/tracking").route(
                    "/campaigns/{id}/contacts/{contact_id}",
                    web::get().to(tracking_handler::contact_history_endpoint),
                ),
            ),
    );
}
