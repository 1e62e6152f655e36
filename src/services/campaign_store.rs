//! services/campaign_store.rs
//! Lecturas de campañas, contactos y secuencias sobre SQLite.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Pool, Sqlite};

use crate::models::{
    campaign_model::{Campaign, CampaignStatus, Contact, ContactStatus},
    sequence_model::{MessageTemplate, SequenceStep, TimingRule},
};

/// Formato único de timestamps en la DB: RFC3339 en UTC con microsegundos,
/// así la comparación de strings en SQL respeta el orden temporal.
pub fn to_db_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_db_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Timestamp inválido en DB: '{}'", raw))?
        .with_timezone(&Utc))
}

#[derive(sqlx::FromRow)]
struct CampaignRow {
    id: String,
    name: String,
    status: String,
    created_at: String,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = anyhow::Error;

    fn try_from(r: CampaignRow) -> Result<Self> {
        Ok(Campaign {
            id: r.id,
            name: r.name,
            status: r.status.parse()?,
            created_at: parse_db_ts(&r.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ContactRow {
    id: i64,
    campaign_id: String,
    email: String,
    first_name: String,
    last_name: String,
    company: String,
    title: String,
    timezone_group: Option<String>,
    sequence_step: i64,
    status: String,
    last_contacted_at: Option<String>,
    created_at: String,
}

impl TryFrom<ContactRow> for Contact {
    type Error = anyhow::Error;

    fn try_from(r: ContactRow) -> Result<Self> {
        Ok(Contact {
            id: r.id,
            campaign_id: r.campaign_id,
            email: r.email,
            first_name: r.first_name,
            last_name: r.last_name,
            company: r.company,
            title: r.title,
            timezone_group: r.timezone_group.filter(|g| !g.trim().is_empty()),
            sequence_step: i32::try_from(r.sequence_step)
                .map_err(|_| anyhow!("sequence_step fuera de rango: {}", r.sequence_step))?,
            status: r.status.parse()?,
            last_contacted_at: r.last_contacted_at.as_deref().map(parse_db_ts).transpose()?,
            created_at: parse_db_ts(&r.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StepRow {
    campaign_id: String,
    step_number: i64,
    timing_kind: String,
    timing_value: i64,
    template_key: String,
    active: bool,
}

impl TryFrom<StepRow> for SequenceStep {
    type Error = anyhow::Error;

    fn try_from(r: StepRow) -> Result<Self> {
        Ok(SequenceStep {
            campaign_id: r.campaign_id,
            step_number: i32::try_from(r.step_number)
                .map_err(|_| anyhow!("step_number fuera de rango: {}", r.step_number))?,
            timing: TimingRule::from_columns(&r.timing_kind, r.timing_value)?,
            template_key: r.template_key,
            active: r.active,
        })
    }
}

const CONTACT_COLUMNS: &str = r#"
    id, campaign_id, email, first_name, last_name, company, title,
    timezone_group, sequence_step, status, last_contacted_at, created_at
"#;

#[derive(Clone, Debug)]
pub struct CampaignStore {
    db_pool: Pool<Sqlite>,
}

impl CampaignStore {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        CampaignStore { db_pool }
    }

    /// Corre migraciones con sqlx
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db_pool)
            .await
            .context("Fallo al correr migraciones")?;
        Ok(())
    }

    pub async fn get_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(
            "SELECT id, name, status, created_at FROM campaigns WHERE id = ?1",
        )
        .bind(campaign_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Fallo al leer campaña")?;

        row.map(Campaign::try_from).transpose()
    }

    pub async fn list_active_campaigns(&self) -> Result<Vec<Campaign>> {
        let rows = sqlx::query_as::<_, CampaignRow>(
            "SELECT id, name, status, created_at FROM campaigns WHERE status = ?1 ORDER BY id",
        )
        .bind(CampaignStatus::Active.as_str())
        .fetch_all(&self.db_pool)
        .await
        .context("Fallo al listar campañas activas")?;

        rows.into_iter().map(Campaign::try_from).collect()
    }

    /// Contactos de la campaña que todavía participan de la secuencia.
    pub async fn list_active_contacts(&self, campaign_id: &str) -> Result<Vec<Contact>> {
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE campaign_id = ?1 AND status = ?2 ORDER BY id"
        );
        let rows = sqlx::query_as::<_, ContactRow>(&sql)
            .bind(campaign_id)
            .bind(ContactStatus::Active.as_str())
            .fetch_all(&self.db_pool)
            .await
            .context("Fallo al listar contactos")?;

        rows.into_iter().map(Contact::try_from).collect()
    }

    /// Pasos activos ordenados por número.
    pub async fn active_steps(&self, campaign_id: &str) -> Result<Vec<SequenceStep>> {
        let rows = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT campaign_id, step_number, timing_kind, timing_value, template_key, active
            FROM sequence_steps
            WHERE campaign_id = ?1 AND active = 1
            ORDER BY step_number ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.db_pool)
        .await
        .context("Fallo al leer pasos de la secuencia")?;

        rows.into_iter().map(SequenceStep::try_from).collect()
    }

    /// Plantillas referenciadas por los pasos de la campaña.
    pub async fn templates_for(&self, campaign_id: &str) -> Result<HashMap<String, MessageTemplate>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT DISTINCT t.template_key, t.subject, t.body
            FROM message_templates t
            JOIN sequence_steps s ON s.template_key = t.template_key
            WHERE s.campaign_id = ?1
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.db_pool)
        .await
        .context("Fallo al leer plantillas")?;

        Ok(rows
            .into_iter()
            .map(|(template_key, subject, body)| {
                (
                    template_key.clone(),
                    MessageTemplate {
                        template_key,
                        subject,
                        body,
                    },
                )
            })
            .collect())
    }

    /// Marca la secuencia terminada si no queda ningún paso posterior,
    /// activo o no. Un paso desactivado solo pausa al contacto.
    /// Devuelve false si no se tocó nada.
    pub async fn mark_contact_completed(
        &self,
        campaign_id: &str,
        contact_id: i64,
        sequence_step: i32,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE contacts
            SET status = ?1
            WHERE id = ?2
              AND campaign_id = ?3
              AND status = ?4
              AND sequence_step = ?5
              AND sequence_step > 0
              AND NOT EXISTS (
                  SELECT 1 FROM sequence_steps
                  WHERE campaign_id = ?3 AND step_number > ?5
              )
            "#,
        )
        .bind(ContactStatus::Completed.as_str())
        .bind(contact_id)
        .bind(campaign_id)
        .bind(ContactStatus::Active.as_str())
        .bind(sequence_step)
        .execute(&self.db_pool)
        .await
        .context("Fallo al marcar contacto completado")?;

        Ok(result.rows_affected() == 1)
    }
}
