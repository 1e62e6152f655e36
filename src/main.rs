use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use dotenv::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::config::scheduler_config::SchedulerConfig;
use crate::logger::init_logger;
use crate::services::business_hours::BusinessHoursGate;
use crate::services::campaign_store::CampaignStore;
use crate::services::dispatch_coordinator::DispatchCoordinator;
use crate::services::mail_transport::{DryRunTransport, MailTransport, SmtpMailTransport};
use crate::services::sender_pool::SenderPool;
use crate::services::tracking_ledger::TrackingLedger;

mod app;
mod config;
mod handlers;
mod logger;
mod models;
mod services;

#[cfg(test)]
mod tests;

async fn setup_database(database_url: &str) -> Result<Pool<Sqlite>> {
    // Crear la carpeta del archivo si hace falta (p.e. ./data/outreach.db)
    if let Some(path) = database_url.strip_prefix("sqlite:") {
        let path = path.trim_start_matches("//");
        if !path.starts_with(":memory:") {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("No se pudo crear {}", parent.display()))?;
            }
        }
    }

    log::info!("Conectando a SQLite en {}", database_url);

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));

    let db_pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .context("No se pudo conectar a la base de datos SQLite.")?;

    Ok(db_pool)
}

fn build_transport(config: &SchedulerConfig) -> Result<Arc<dyn MailTransport>> {
    match &config.smtp {
        Some(smtp) => {
            log::info!("Transporte SMTP: {}:{}", smtp.host, smtp.port);
            Ok(Arc::new(SmtpMailTransport::new(smtp)?))
        }
        None => {
            log::warn!("SMTP_HOST no definido; se usa el transporte dry-run (no se envía nada).");
            Ok(Arc::new(DryRunTransport))
        }
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    let config = SchedulerConfig::from_env()?;
    let db_pool = setup_database(&config.database_url).await?;

    let store = CampaignStore::new(db_pool.clone());
    store.run_migrations().await?;

    let ledger = TrackingLedger::new(db_pool.clone(), config.reservation_ttl_secs);
    let coordinator = DispatchCoordinator::new(
        store,
        SenderPool::new(
            db_pool.clone(),
            config.min_health_score,
            config.quota_utc_offset_hours,
        ),
        BusinessHoursGate::from_config(&config),
        ledger.clone(),
        build_transport(&config)?,
        config.clone(),
    );

    // Pasadas periódicas; cada una es independiente de la anterior.
    if config.scheduler_interval_secs > 0 {
        let periodic = coordinator.clone();
        let interval = Duration::from_secs(config.scheduler_interval_secs);
        log::info!("Scheduler periódico cada {}s", interval.as_secs());
        tokio::spawn(async move {
            loop {
                if let Err(e) = periodic.run_active_campaigns().await {
                    log::error!("Error en pasada periódica: {:?}", e);
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    log::info!("Levantando servidor en {}", config.http_bind);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(coordinator.clone()))
            .app_data(web::Data::new(ledger.clone()))
            .configure(app::init_app)
    })
    .workers(1)
    .bind(config.http_bind.as_str())?
    .run()
    .await?;

    Ok(())
}
