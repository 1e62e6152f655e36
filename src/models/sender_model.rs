//! models/sender_model.rs

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Buzón que envía en nombre de la campaña.
#[derive(Debug, Clone, Serialize)]
pub struct SenderIdentity {
    pub id: i64,
    pub campaign_id: String,
    pub email: String,
    pub display_name: String,
    pub active: bool,
    /// El usuario lo eligió para la rotación.
    pub selected: bool,
    pub daily_limit: i64,
    /// Contador bruto; solo vale para `quota_date`.
    pub sent_today: i64,
    pub quota_date: Option<NaiveDate>,
    pub health_score: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub rotation_priority: i64,
}

impl SenderIdentity {
    /// Envíos que cuentan para el día `today`; si el contador es de otro día vale 0.
    pub fn sent_on(&self, today: NaiveDate) -> i64 {
        match self.quota_date {
            Some(day) if day == today => self.sent_today,
            _ => 0,
        }
    }

    pub fn is_eligible(&self, today: NaiveDate, min_health_score: i64) -> bool {
        self.active
            && self.selected
            && self.sent_on(today) < self.daily_limit
            && self.health_score >= min_health_score
    }

    /// "Nombre <email>" para el encabezado From.
    pub fn mailbox(&self) -> String {
        if self.display_name.trim().is_empty() {
            self.email.clone()
        } else {
            format!("{} <{}>", self.display_name, self.email)
        }
    }
}
