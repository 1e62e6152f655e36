//! models/campaign_model.rs
//! Campañas y contactos inscritos en ellas.

use std::str::FromStr;

use anyhow::{anyhow, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
        }
    }
}

impl FromStr for CampaignStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            other => Err(anyhow!("Estado de campaña desconocido: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
}

/// Estado de la secuencia de un contacto.
/// `Halted` es terminal: lo pone un error permanente del transporte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    Active,
    Completed,
    Halted,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Active => "active",
            ContactStatus::Completed => "completed",
            ContactStatus::Halted => "halted",
        }
    }
}

impl FromStr for ContactStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ContactStatus::Active),
            "completed" => Ok(ContactStatus::Completed),
            "halted" => Ok(ContactStatus::Halted),
            other => Err(anyhow!("Estado de contacto desconocido: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Contact {
    pub id: i64,
    pub campaign_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub company: String,
    pub title: String,
    /// "T1".."T4"; si viene vacío se usa el grupo por defecto.
    pub timezone_group: Option<String>,
    /// Último paso enviado con éxito (0 = ninguno).
    pub sequence_step: i32,
    pub status: ContactStatus,
    pub last_contacted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
