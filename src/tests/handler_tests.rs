//! tests/handler_tests.rs
//! Rutas HTTP montadas con `init_app` sobre una DB temporal.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_rt::test;
    use actix_web::{test as web_test, web, App};
    use chrono::{Duration, Utc};
    use serde_json::Value;

    use crate::app::init_app;
    use crate::config::scheduler_config::SchedulerConfig;
    use crate::services::tracking_ledger::TrackingLedger;
    use crate::tests::common::{
        build_coordinator, seed_contact, seed_sender, seed_two_step_campaign, test_config,
        test_pool, ContactSeed, ScriptedTransport, SenderSeed, CAMPAIGN,
    };

    // Ventana de 24 horas: las rutas usan el reloj real.
    fn always_open() -> SchedulerConfig {
        SchedulerConfig {
            business_hours_start: 0,
            business_hours_end: 24,
            ..test_config()
        }
    }

    #[test]
    async fn run_preview_and_history_routes() {
        let (_dir, pool) = test_pool().await;
        seed_two_step_campaign(&pool).await;
        seed_sender(&pool, SenderSeed::new(1, "a@outbound.test")).await;
        seed_contact(
            &pool,
            ContactSeed {
                created_at: Utc::now() - Duration::days(2),
                ..ContactSeed::new(1)
            },
        )
        .await;

        let transport = Arc::new(ScriptedTransport::new());
        let config = always_open();
        let coordinator = build_coordinator(&pool, transport.clone(), config.clone());
        let ledger = TrackingLedger::new(pool.clone(), config.reservation_ttl_secs);

        let app = web_test::init_service(
            App::new()
                .app_data(web::Data::new(coordinator))
                .app_data(web::Data::new(ledger))
                .configure(init_app),
        )
        .await;

        let req = web_test::TestRequest::get()
            .uri(&format!("/api/scheduler/campaigns/{CAMPAIGN}/preview"))
            .to_request();
        let body: Value = web_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["due"], 1);
        assert_eq!(body["contacts"][0]["assigned_sender"], "a@outbound.test");

        let req = web_test::TestRequest::post()
            .uri(&format!("/api/scheduler/campaigns/{CAMPAIGN}/run"))
            .to_request();
        let body: Value = web_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["summary"]["dispatched"], 1);
        assert_eq!(transport.sent().len(), 1);

        let req = web_test::TestRequest::get()
            .uri(&format!("/api/tracking/campaigns/{CAMPAIGN}/contacts/1"))
            .to_request();
        let body: Value = web_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["records"][0]["status"], "sent");
        assert_eq!(body["records"][0]["sender_email"], "a@outbound.test");
    }

    #[test]
    async fn run_all_reports_each_active_campaign() {
        let (_dir, pool) = test_pool().await;
        seed_two_step_campaign(&pool).await;

        let transport = Arc::new(ScriptedTransport::new());
        let coordinator = build_coordinator(&pool, transport, always_open());
        let app = web_test::init_service(
            App::new()
                .app_data(web::Data::new(coordinator))
                .configure(init_app),
        )
        .await;

        let req = web_test::TestRequest::post().uri("/api/scheduler/run").to_request();
        let body: Value = web_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["campaigns"], 1);
        assert_eq!(body["summaries"][0]["campaign_id"], CAMPAIGN);
    }

    #[test]
    async fn unknown_campaign_returns_server_error() {
        let (_dir, pool) = test_pool().await;
        let coordinator = build_coordinator(&pool, Arc::new(ScriptedTransport::new()), always_open());
        let app = web_test::init_service(
            App::new()
                .app_data(web::Data::new(coordinator))
                .configure(init_app),
        )
        .await;

        let req = web_test::TestRequest::post()
            .uri("/api/scheduler/campaigns/missing/run")
            .to_request();
        let resp = web_test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
