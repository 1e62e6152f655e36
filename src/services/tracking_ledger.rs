//! services/tracking_ledger.rs
//! Ledger idempotente: una fila por (campaña, contacto, paso).

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Sqlite};

use crate::{
    models::{
        campaign_model::ContactStatus,
        tracking_model::{TrackingKey, TrackingRecord, TrackingStatus},
    },
    services::campaign_store::{parse_db_ts, to_db_ts},
};

#[derive(sqlx::FromRow)]
struct TrackingRow {
    campaign_id: String,
    contact_id: i64,
    step: i64,
    sender_email: String,
    status: String,
    message_id: Option<String>,
    error: Option<String>,
    attempts: i64,
    updated_at: String,
}

impl TryFrom<TrackingRow> for TrackingRecord {
    type Error = anyhow::Error;

    fn try_from(r: TrackingRow) -> Result<Self> {
        Ok(TrackingRecord {
            key: TrackingKey {
                campaign_id: r.campaign_id,
                contact_id: r.contact_id,
                step: i32::try_from(r.step).map_err(|_| anyhow!("step fuera de rango"))?,
            },
            sender_email: r.sender_email,
            status: r.status.parse()?,
            message_id: r.message_id,
            error: r.error,
            attempts: r.attempts,
            updated_at: parse_db_ts(&r.updated_at)?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct TrackingLedger {
    db_pool: Pool<Sqlite>,
    reservation_ttl: Duration,
}

impl TrackingLedger {
    pub fn new(db_pool: Pool<Sqlite>, reservation_ttl_secs: i64) -> Self {
        TrackingLedger {
            db_pool,
            reservation_ttl: Duration::seconds(reservation_ttl_secs),
        }
    }

    /// Reserva la clave con un único INSERT ... ON CONFLICT.
    ///
    /// Gana si no hay fila, si la fila es 'failed'/'deferred', o si es una
    /// reserva abandonada (más vieja que el TTL). Nunca pisa un 'sent' ni una
    /// reserva en curso.
    pub async fn try_reserve(
        &self,
        key: &TrackingKey,
        sender_email: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let now_ts = to_db_ts(now);
        let stale_before = to_db_ts(now - self.reservation_ttl);

        let result = sqlx::query(
            r#"
            INSERT INTO tracking_records (
                campaign_id, contact_id, step, sender_email, status,
                message_id, error, attempts, reserved_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, 'reserved', NULL, NULL, 1, ?5, ?5)
            ON CONFLICT (campaign_id, contact_id, step) DO UPDATE SET
                sender_email = excluded.sender_email,
                status = 'reserved',
                message_id = NULL,
                error = NULL,
                attempts = tracking_records.attempts + 1,
                reserved_at = excluded.reserved_at,
                updated_at = excluded.updated_at
            WHERE tracking_records.status IN ('failed', 'deferred')
               OR (tracking_records.status = 'reserved' AND tracking_records.reserved_at < ?6)
            "#,
        )
        .bind(&key.campaign_id)
        .bind(key.contact_id)
        .bind(key.step)
        .bind(sender_email)
        .bind(&now_ts)
        .bind(&stale_before)
        .execute(&self.db_pool)
        .await
        .context("Fallo al reservar tracking")?;

        Ok(result.rows_affected() == 1)
    }

    /// Cierra una reserva como 'failed' o 'deferred'. El contacto no avanza.
    pub async fn record_outcome(
        &self,
        key: &TrackingKey,
        status: TrackingStatus,
        sender_email: &str,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match status {
            TrackingStatus::Failed | TrackingStatus::Deferred => {}
            TrackingStatus::Sent | TrackingStatus::Reserved => {
                bail!(
                    "record_outcome no acepta '{}'; usar record_sent_and_advance",
                    status.as_str()
                )
            }
        }

        let result = sqlx::query(
            r#"
            UPDATE tracking_records
            SET status = ?4, sender_email = ?5, error = ?6, updated_at = ?7
            WHERE campaign_id = ?1 AND contact_id = ?2 AND step = ?3 AND status = 'reserved'
            "#,
        )
        .bind(&key.campaign_id)
        .bind(key.contact_id)
        .bind(key.step)
        .bind(status.as_str())
        .bind(sender_email)
        .bind(error)
        .bind(to_db_ts(now))
        .execute(&self.db_pool)
        .await
        .context("Fallo al registrar resultado")?;

        if result.rows_affected() != 1 {
            bail!(
                "La reserva de {:?} ya no existe; no se registró '{}'",
                key,
                status.as_str()
            );
        }
        Ok(())
    }

    /// 'sent' + avance del contacto en una sola transacción.
    pub async fn record_sent_and_advance(
        &self,
        key: &TrackingKey,
        sender_email: &str,
        message_id: &str,
        contacted_at: DateTime<Utc>,
    ) -> Result<()> {
        let now_ts = to_db_ts(contacted_at);
        let mut tx = self
            .db_pool
            .begin()
            .await
            .context("Fallo al abrir transacción")?;

        let tracked = sqlx::query(
            r#"
            UPDATE tracking_records
            SET status = 'sent', sender_email = ?4, message_id = ?5, error = NULL, updated_at = ?6
            WHERE campaign_id = ?1 AND contact_id = ?2 AND step = ?3 AND status = 'reserved'
            "#,
        )
        .bind(&key.campaign_id)
        .bind(key.contact_id)
        .bind(key.step)
        .bind(sender_email)
        .bind(message_id)
        .bind(&now_ts)
        .execute(&mut *tx)
        .await
        .context("Fallo al marcar tracking como sent")?;

        if tracked.rows_affected() != 1 {
            tx.rollback().await.ok();
            bail!("Reserva perdida para {:?}; no se avanza el contacto", key);
        }

        // El paso solo sube de a uno y solo desde el valor esperado.
        let advanced = sqlx::query(
            r#"
            UPDATE contacts
            SET sequence_step = ?3, last_contacted_at = ?4
            WHERE id = ?1 AND campaign_id = ?2 AND sequence_step = ?3 - 1
            "#,
        )
        .bind(key.contact_id)
        .bind(&key.campaign_id)
        .bind(key.step)
        .bind(&now_ts)
        .execute(&mut *tx)
        .await
        .context("Fallo al avanzar contacto")?;

        if advanced.rows_affected() != 1 {
            tx.rollback().await.ok();
            bail!(
                "El contacto {} no está en el paso {}; no se avanza",
                key.contact_id,
                key.step - 1
            );
        }

        tx.commit().await.context("Fallo al confirmar transacción")?;
        Ok(())
    }

    /// 'failed' + contacto detenido, para errores permanentes.
    pub async fn record_failed_and_halt(
        &self,
        key: &TrackingKey,
        sender_email: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let now_ts = to_db_ts(now);
        let mut tx = self
            .db_pool
            .begin()
            .await
            .context("Fallo al abrir transacción")?;

        let tracked = sqlx::query(
            r#"
            UPDATE tracking_records
            SET status = 'failed', sender_email = ?4, error = ?5, updated_at = ?6
            WHERE campaign_id = ?1 AND contact_id = ?2 AND step = ?3 AND status = 'reserved'
            "#,
        )
        .bind(&key.campaign_id)
        .bind(key.contact_id)
        .bind(key.step)
        .bind(sender_email)
        .bind(error)
        .bind(&now_ts)
        .execute(&mut *tx)
        .await
        .context("Fallo al marcar tracking como failed")?;

        if tracked.rows_affected() != 1 {
            tx.rollback().await.ok();
            bail!("Reserva perdida para {:?}; no se detiene el contacto", key);
        }

        sqlx::query("UPDATE contacts SET status = ?2 WHERE id = ?1")
            .bind(key.contact_id)
            .bind(ContactStatus::Halted.as_str())
            .execute(&mut *tx)
            .await
            .context("Fallo al detener contacto")?;

        tx.commit().await.context("Fallo al confirmar transacción")?;
        Ok(())
    }

    pub async fn get(&self, key: &TrackingKey) -> Result<Option<TrackingRecord>> {
        let row = sqlx::query_as::<_, TrackingRow>(
            r#"
            SELECT campaign_id, contact_id, step, sender_email, status,
                   message_id, error, attempts, updated_at
            FROM tracking_records
            WHERE campaign_id = ?1 AND contact_id = ?2 AND step = ?3
            "#,
        )
        .bind(&key.campaign_id)
        .bind(key.contact_id)
        .bind(key.step)
        .fetch_optional(&self.db_pool)
        .await
        .context("Fallo al leer tracking")?;

        row.map(TrackingRecord::try_from).transpose()
    }

    /// Historial de un contacto, paso por paso.
    pub async fn history(&self, campaign_id: &str, contact_id: i64) -> Result<Vec<TrackingRecord>> {
        let rows = sqlx::query_as::<_, TrackingRow>(
            r#"
            SELECT campaign_id, contact_id, step, sender_email, status,
                   message_id, error, attempts, updated_at
            FROM tracking_records
            WHERE campaign_id = ?1 AND contact_id = ?2
            ORDER BY step ASC
            "#,
        )
        .bind(campaign_id)
        .bind(contact_id)
        .fetch_all(&self.db_pool)
        .await
        .context("Fallo al leer historial de tracking")?;

        rows.into_iter().map(TrackingRecord::try_from).collect()
    }
}
