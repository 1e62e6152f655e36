//! services/sender_pool.rs
//! Pool de remitentes: elegibilidad, rotación determinista y cuota diaria.

use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Pool, Sqlite};

use crate::{
    models::sender_model::SenderIdentity,
    services::{
        campaign_store::{parse_db_ts, to_db_ts},
        sequence_clock::local_date,
    },
};

#[derive(sqlx::FromRow)]
struct SenderRow {
    id: i64,
    campaign_id: String,
    email: String,
    display_name: String,
    active: bool,
    selected: bool,
    daily_limit: i64,
    sent_today: i64,
    quota_date: Option<String>,
    health_score: i64,
    last_used_at: Option<String>,
    rotation_priority: i64,
}

impl TryFrom<SenderRow> for SenderIdentity {
    type Error = anyhow::Error;

    fn try_from(r: SenderRow) -> Result<Self> {
        let quota_date = r
            .quota_date
            .as_deref()
            .map(|d| {
                d.parse::<NaiveDate>()
                    .map_err(|e| anyhow!("quota_date inválida '{}': {}", d, e))
            })
            .transpose()?;
        Ok(SenderIdentity {
            id: r.id,
            campaign_id: r.campaign_id,
            email: r.email,
            display_name: r.display_name,
            active: r.active,
            selected: r.selected,
            daily_limit: r.daily_limit,
            sent_today: r.sent_today,
            quota_date,
            health_score: r.health_score,
            last_used_at: r.last_used_at.as_deref().map(parse_db_ts).transpose()?,
            rotation_priority: r.rotation_priority,
        })
    }
}

/// Rotación: orden estable por email y `contact_id mod n`.
///
/// Es la única implementación; la usan tanto el preview como el envío real,
/// así que para el mismo conjunto elegible siempre devuelven el mismo remitente.
pub fn rotate(eligible: &[SenderIdentity], contact_id: i64) -> Option<&SenderIdentity> {
    if eligible.is_empty() {
        return None;
    }
    let mut ordered: Vec<&SenderIdentity> = eligible.iter().collect();
    ordered.sort_by(|a, b| a.email.cmp(&b.email));
    let index = contact_id.rem_euclid(ordered.len() as i64) as usize;
    Some(ordered[index])
}

#[derive(Clone, Debug)]
pub struct SenderPool {
    db_pool: Pool<Sqlite>,
    min_health_score: i64,
    quota_utc_offset_hours: i32,
}

impl SenderPool {
    pub fn new(db_pool: Pool<Sqlite>, min_health_score: i64, quota_utc_offset_hours: i32) -> Self {
        SenderPool {
            db_pool,
            min_health_score,
            quota_utc_offset_hours,
        }
    }

    /// Día de cuota al que pertenece `now`.
    pub fn quota_day(&self, now: DateTime<Utc>) -> NaiveDate {
        local_date(now, self.quota_utc_offset_hours)
    }

    /// Remitentes elegibles leídos directamente de la DB (sin caché).
    pub async fn eligible(&self, campaign_id: &str, today: NaiveDate) -> Result<Vec<SenderIdentity>> {
        let today = today.to_string();
        let rows = sqlx::query_as::<_, SenderRow>(
            r#"
            SELECT id, campaign_id, email, display_name, active, selected, daily_limit,
                   sent_today, quota_date, health_score, last_used_at, rotation_priority
            FROM senders
            WHERE campaign_id = ?1
              AND active = 1
              AND selected = 1
              AND health_score >= ?2
              AND daily_limit > 0
              AND (quota_date IS NULL OR quota_date <> ?3 OR sent_today < daily_limit)
            ORDER BY email ASC
            "#,
        )
        .bind(campaign_id)
        .bind(self.min_health_score)
        .bind(&today)
        .fetch_all(&self.db_pool)
        .await
        .context("Fallo al leer remitentes elegibles")?;

        rows.into_iter().map(SenderIdentity::try_from).collect()
    }

    /// Elige remitente para un contacto, ignorando los excluidos en esta pasada.
    pub async fn select_sender(
        &self,
        campaign_id: &str,
        contact_id: i64,
        today: NaiveDate,
        excluded: &HashSet<i64>,
    ) -> Result<Option<SenderIdentity>> {
        let eligible: Vec<SenderIdentity> = self
            .eligible(campaign_id, today)
            .await?
            .into_iter()
            .filter(|s| s.is_eligible(today, self.min_health_score) && !excluded.contains(&s.id))
            .collect();

        Ok(rotate(&eligible, contact_id).cloned())
    }

    /// Toma un cupo del día de forma atómica: la condición de elegibilidad y
    /// el incremento van en el mismo UPDATE. Devuelve false si otro envío se
    /// llevó el último cupo (o el remitente dejó de ser elegible).
    pub async fn claim_slot(&self, sender_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let today = self.quota_day(now).to_string();
        let result = sqlx::query(
            r#"
            UPDATE senders
            SET sent_today = CASE WHEN quota_date = ?2 THEN sent_today + 1 ELSE 1 END,
                quota_date = ?2,
                last_used_at = ?3
            WHERE id = ?1
              AND active = 1
              AND selected = 1
              AND health_score >= ?4
              AND daily_limit > 0
              AND (quota_date IS NULL OR quota_date <> ?2 OR sent_today < daily_limit)
            "#,
        )
        .bind(sender_id)
        .bind(&today)
        .bind(to_db_ts(now))
        .bind(self.min_health_score)
        .execute(&self.db_pool)
        .await
        .context("Fallo al tomar cupo del remitente")?;

        Ok(result.rows_affected() == 1)
    }

    /// Devuelve un cupo cuando el transporte falla: solo cuentan envíos exitosos.
    pub async fn release_slot(&self, sender_id: i64, now: DateTime<Utc>) -> Result<()> {
        let today = self.quota_day(now).to_string();
        sqlx::query(
            r#"
            UPDATE senders
            SET sent_today = sent_today - 1
            WHERE id = ?1 AND quota_date = ?2 AND sent_today > 0
            "#,
        )
        .bind(sender_id)
        .bind(&today)
        .execute(&self.db_pool)
        .await
        .context("Fallo al liberar cupo del remitente")?;
        Ok(())
    }

    pub async fn get_sender(&self, sender_id: i64) -> Result<Option<SenderIdentity>> {
        let row = sqlx::query_as::<_, SenderRow>(
            r#"
            SELECT id, campaign_id, email, display_name, active, selected, daily_limit,
                   sent_today, quota_date, health_score, last_used_at, rotation_priority
            FROM senders
            WHERE id = ?1
            "#,
        )
        .bind(sender_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Fallo al leer remitente")?;

        row.map(SenderIdentity::try_from).transpose()
    }
}
