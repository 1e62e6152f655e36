//! tests/common.rs
//! Fixtures compartidos: DB temporal con migraciones, datos semilla y un
//! transporte guionado.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tempfile::TempDir;

use crate::config::scheduler_config::SchedulerConfig;
use crate::models::{
    campaign_model::{Contact, ContactStatus},
    sender_model::SenderIdentity,
    sequence_model::{SequenceStep, TimingRule},
};
use crate::services::{
    business_hours::BusinessHoursGate,
    campaign_store::{to_db_ts, CampaignStore},
    dispatch_coordinator::DispatchCoordinator,
    mail_transport::{generate_message_id, MailTransport, OutgoingEmail, SentMessage, TransportError},
    sender_pool::SenderPool,
    tracking_ledger::TrackingLedger,
};

pub const CAMPAIGN: &str = "camp-1";

pub fn ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("timestamp de test inválido")
        .with_timezone(&Utc)
}

/// DB SQLite en un directorio temporal; el TempDir debe vivir lo que dure el test.
pub async fn test_pool() -> (TempDir, Pool<Sqlite>) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("outreach-test.db"))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .expect("No se pudo abrir la DB de test");

    CampaignStore::new(pool.clone())
        .run_migrations()
        .await
        .expect("Fallo en migraciones");
    (dir, pool)
}

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        worker_count: 4,
        min_health_score: 50,
        ..SchedulerConfig::default()
    }
}

pub fn build_coordinator(
    pool: &Pool<Sqlite>,
    transport: Arc<dyn MailTransport>,
    config: SchedulerConfig,
) -> DispatchCoordinator {
    DispatchCoordinator::new(
        CampaignStore::new(pool.clone()),
        SenderPool::new(pool.clone(), config.min_health_score, config.quota_utc_offset_hours),
        BusinessHoursGate::from_config(&config),
        TrackingLedger::new(pool.clone(), config.reservation_ttl_secs),
        transport,
        config,
    )
}

pub async fn seed_campaign(pool: &Pool<Sqlite>, id: &str, status: &str) {
    sqlx::query("INSERT INTO campaigns (id, name, status, created_at) VALUES (?1, ?2, ?3, ?4)")
        .bind(id)
        .bind(format!("Campaña {id}"))
        .bind(status)
        .bind(to_db_ts(ts("2025-08-01T00:00:00Z")))
        .execute(pool)
        .await
        .expect("seed campaign");
}

pub async fn seed_template(pool: &Pool<Sqlite>, key: &str, subject: &str, body: &str) {
    sqlx::query("INSERT INTO message_templates (template_key, subject, body) VALUES (?1, ?2, ?3)")
        .bind(key)
        .bind(subject)
        .bind(body)
        .execute(pool)
        .await
        .expect("seed template");
}

pub async fn seed_step(pool: &Pool<Sqlite>, campaign_id: &str, step: i32, timing: TimingRule, key: &str) {
    let (kind, value) = timing.to_columns();
    sqlx::query(
        r#"
        INSERT INTO sequence_steps (campaign_id, step_number, timing_kind, timing_value, template_key, active)
        VALUES (?1, ?2, ?3, ?4, ?5, 1)
        "#,
    )
    .bind(campaign_id)
    .bind(step)
    .bind(kind)
    .bind(value)
    .bind(key)
    .execute(pool)
    .await
    .expect("seed step");
}

/// Campaña activa con un paso 1 inmediato y un paso 2 a 3 días.
pub async fn seed_two_step_campaign(pool: &Pool<Sqlite>) {
    seed_campaign(pool, CAMPAIGN, "active").await;
    seed_template(
        pool,
        "initial",
        "Hola {{firstName}}",
        "Hola {{firstName}} de {{company}},\nsoy {{senderName}}.",
    )
    .await;
    seed_template(pool, "followup1", "Seguimiento", "¿Lo viste, {{firstName}}?").await;
    seed_step(pool, CAMPAIGN, 1, TimingRule::Immediate, "initial").await;
    seed_step(pool, CAMPAIGN, 2, TimingRule::AfterDays(3), "followup1").await;
}

#[derive(Debug, Clone)]
pub struct ContactSeed {
    pub id: i64,
    pub timezone_group: Option<&'static str>,
    pub sequence_step: i32,
    pub last_contacted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ContactSeed {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            timezone_group: Some("T3"),
            sequence_step: 0,
            last_contacted_at: None,
            created_at: ts("2025-09-01T08:00:00Z"),
        }
    }

    pub fn email(&self) -> String {
        format!("contact{}@prospect.test", self.id)
    }
}

pub async fn seed_contact(pool: &Pool<Sqlite>, seed: ContactSeed) {
    sqlx::query(
        r#"
        INSERT INTO contacts (
            id, campaign_id, email, first_name, last_name, company, title,
            timezone_group, sequence_step, status, last_contacted_at, created_at
        )
        VALUES (?1, ?2, ?3, ?4, 'Doe', 'Acme', 'CTO', ?5, ?6, 'active', ?7, ?8)
        "#,
    )
    .bind(seed.id)
    .bind(CAMPAIGN)
    .bind(seed.email())
    .bind(format!("Contact{}", seed.id))
    .bind(seed.timezone_group)
    .bind(seed.sequence_step)
    .bind(seed.last_contacted_at.map(to_db_ts))
    .bind(to_db_ts(seed.created_at))
    .execute(pool)
    .await
    .expect("seed contact");
}

#[derive(Debug, Clone)]
pub struct SenderSeed {
    pub id: i64,
    pub email: &'static str,
    pub daily_limit: i64,
    pub health_score: i64,
    pub active: bool,
    pub selected: bool,
}

impl SenderSeed {
    pub fn new(id: i64, email: &'static str) -> Self {
        Self {
            id,
            email,
            daily_limit: 50,
            health_score: 100,
            active: true,
            selected: true,
        }
    }
}

pub async fn seed_sender(pool: &Pool<Sqlite>, seed: SenderSeed) {
    sqlx::query(
        r#"
        INSERT INTO senders (
            id, campaign_id, email, display_name, active, selected,
            daily_limit, sent_today, quota_date, health_score, last_used_at, rotation_priority
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, ?8, NULL, 0)
        "#,
    )
    .bind(seed.id)
    .bind(CAMPAIGN)
    .bind(seed.email)
    .bind(format!("Sender {}", seed.id))
    .bind(seed.active)
    .bind(seed.selected)
    .bind(seed.daily_limit)
    .bind(seed.health_score)
    .execute(pool)
    .await
    .expect("seed sender");
}

pub async fn contact_state(pool: &Pool<Sqlite>, contact_id: i64) -> (i32, String) {
    sqlx::query_as::<_, (i32, String)>("SELECT sequence_step, status FROM contacts WHERE id = ?1")
        .bind(contact_id)
        .fetch_one(pool)
        .await
        .expect("contact state")
}

pub async fn sent_today(pool: &Pool<Sqlite>, sender_id: i64) -> i64 {
    sqlx::query_as::<_, (i64,)>("SELECT sent_today FROM senders WHERE id = ?1")
        .bind(sender_id)
        .fetch_one(pool)
        .await
        .expect("sent_today")
        .0
}

pub async fn count_sent_records(pool: &Pool<Sqlite>, contact_id: i64, step: i32) -> i64 {
    sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM tracking_records WHERE contact_id = ?1 AND step = ?2 AND status = 'sent'",
    )
    .bind(contact_id)
    .bind(step)
    .fetch_one(pool)
    .await
    .expect("count sent")
    .0
}

/// Contacto en memoria para los tests puros.
pub fn contact(
    sequence_step: i32,
    created_at: DateTime<Utc>,
    last_contacted_at: Option<DateTime<Utc>>,
) -> Contact {
    Contact {
        id: 7,
        campaign_id: CAMPAIGN.to_string(),
        email: "jane@prospect.test".to_string(),
        first_name: "Jane".to_string(),
        last_name: "Doe".to_string(),
        company: "Acme".to_string(),
        title: "CTO".to_string(),
        timezone_group: Some("T3".to_string()),
        sequence_step,
        status: ContactStatus::Active,
        last_contacted_at,
        created_at,
    }
}

pub fn step(step_number: i32, timing: TimingRule) -> SequenceStep {
    SequenceStep {
        campaign_id: CAMPAIGN.to_string(),
        step_number,
        timing,
        template_key: format!("step{step_number}"),
        active: true,
    }
}

pub fn sender(id: i64, email: &str) -> SenderIdentity {
    SenderIdentity {
        id,
        campaign_id: CAMPAIGN.to_string(),
        email: email.to_string(),
        display_name: format!("Sender {id}"),
        active: true,
        selected: true,
        daily_limit: 50,
        sent_today: 0,
        quota_date: None,
        health_score: 100,
        last_used_at: None,
        rotation_priority: 0,
    }
}

/// Transporte de test: por defecto todo sale bien; se pueden guionar
/// errores por destinatario (en orden) o por remitente (siempre).
#[derive(Default)]
pub struct ScriptedTransport {
    by_recipient: Mutex<HashMap<String, VecDeque<TransportError>>>,
    by_sender: Mutex<HashMap<String, TransportError>>,
    sent: Mutex<Vec<(String, OutgoingEmail)>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn fail_recipient(&self, to: &str, error: TransportError) {
        self.by_recipient
            .lock()
            .unwrap()
            .entry(to.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn fail_sender(&self, from: &str, error: TransportError) {
        self.by_sender.lock().unwrap().insert(from.to_string(), error);
    }

    /// (remitente, email) de cada envío exitoso.
    pub fn sent(&self) -> Vec<(String, OutgoingEmail)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn send(
        &self,
        from: &SenderIdentity,
        email: &OutgoingEmail,
    ) -> Result<SentMessage, TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.by_sender.lock().unwrap().get(&from.email).cloned() {
            return Err(err);
        }
        if let Some(err) = self
            .by_recipient
            .lock()
            .unwrap()
            .get_mut(&email.to)
            .and_then(|queue| queue.pop_front())
        {
            return Err(err);
        }
        self.sent
            .lock()
            .unwrap()
            .push((from.email.clone(), email.clone()));
        Ok(SentMessage {
            message_id: generate_message_id(&from.email),
        })
    }
}
