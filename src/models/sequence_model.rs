//! models/sequence_model.rs
//! Definición de los pasos de una secuencia y sus plantillas.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Regla de tiempo de un paso, relativa al último contacto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum TimingRule {
    Immediate,
    AfterDays(u32),
    AfterHours(u32),
}

impl TimingRule {
    /// Convierte las columnas (timing_kind, timing_value) de la tabla.
    pub fn from_columns(kind: &str, value: i64) -> Result<Self> {
        let value = u32::try_from(value)
            .map_err(|_| anyhow!("timing_value fuera de rango: {}", value))?;
        match kind {
            "immediate" => Ok(TimingRule::Immediate),
            "days" => Ok(TimingRule::AfterDays(value)),
            "hours" => Ok(TimingRule::AfterHours(value)),
            other => Err(anyhow!("timing_kind desconocido: {}", other)),
        }
    }

    pub fn to_columns(&self) -> (&'static str, i64) {
        match self {
            TimingRule::Immediate => ("immediate", 0),
            TimingRule::AfterDays(n) => ("days", i64::from(*n)),
            TimingRule::AfterHours(n) => ("hours", i64::from(*n)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SequenceStep {
    pub campaign_id: String,
    pub step_number: i32,
    pub timing: TimingRule,
    pub template_key: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub template_key: String,
    pub subject: String,
    pub body: String,
}

/// Momento a partir del cual un paso vence.
/// Los pasos por días se comparan por fecha de calendario local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum DueAt {
    Date(chrono::NaiveDate),
    Instant(chrono::DateTime<chrono::Utc>),
}
