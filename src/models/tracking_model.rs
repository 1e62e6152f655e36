//! models/tracking_model.rs

use std::str::FromStr;

use anyhow::{anyhow, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Clave compuesta del ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackingKey {
    pub campaign_id: String,
    pub contact_id: i64,
    pub step: i32,
}

impl TrackingKey {
    pub fn new(campaign_id: &str, contact_id: i64, step: i32) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            contact_id,
            step,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    /// Marcador mientras el envío está en curso.
    Reserved,
    Sent,
    Deferred,
    Failed,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Reserved => "reserved",
            TrackingStatus::Sent => "sent",
            TrackingStatus::Deferred => "deferred",
            TrackingStatus::Failed => "failed",
        }
    }
}

impl FromStr for TrackingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(TrackingStatus::Reserved),
            "sent" => Ok(TrackingStatus::Sent),
            "deferred" => Ok(TrackingStatus::Deferred),
            "failed" => Ok(TrackingStatus::Failed),
            other => Err(anyhow!("Estado de tracking desconocido: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackingRecord {
    pub key: TrackingKey,
    pub sender_email: String,
    pub status: TrackingStatus,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub attempts: i64,
    pub updated_at: DateTime<Utc>,
}
