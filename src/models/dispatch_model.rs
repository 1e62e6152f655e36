//! models/dispatch_model.rs
//! Resultados de una pasada del scheduler.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{campaign_model::ContactStatus, sequence_model::DueAt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    NoSender,
    OutsideHours,
    AlreadySent,
    SenderAuth,
}

/// Estado terminal de un contacto dentro de una pasada.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DispatchOutcome {
    NotDue,
    /// No hay más pasos; el contacto queda 'completed'.
    Complete,
    Deferred { reason: DeferReason },
    Sent {
        step: i32,
        sender_email: String,
        message_id: String,
    },
    Failed {
        step: Option<i32>,
        error: String,
        permanent: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub campaign_id: String,
    pub dispatched: u32,
    pub deferred: u32,
    pub failed: u32,
    pub not_due: u32,
    pub completed: u32,
    pub halted: u32,
    /// Contactos que no se alcanzaron antes del timeout de la pasada.
    pub unreached: u32,
    pub deferred_by_reason: BTreeMap<DeferReason, u32>,
    pub sender_usage: BTreeMap<String, u32>,
}

impl PassSummary {
    pub fn new(campaign_id: &str) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::NotDue => self.not_due += 1,
            DispatchOutcome::Complete => self.completed += 1,
            DispatchOutcome::Deferred { reason } => {
                self.deferred += 1;
                *self.deferred_by_reason.entry(*reason).or_insert(0) += 1;
            }
            DispatchOutcome::Sent { sender_email, .. } => {
                self.dispatched += 1;
                *self.sender_usage.entry(sender_email.clone()).or_insert(0) += 1;
            }
            DispatchOutcome::Failed { permanent, .. } => {
                self.failed += 1;
                if *permanent {
                    self.halted += 1;
                }
            }
        }
    }

    pub fn deferred_for(&self, reason: DeferReason) -> u32 {
        self.deferred_by_reason.get(&reason).copied().unwrap_or(0)
    }
}

/// Vista de solo lectura de lo que haría la próxima pasada.
#[derive(Debug, Clone, Serialize)]
pub struct ContactPreview {
    pub contact_id: i64,
    pub email: String,
    pub status: ContactStatus,
    pub sequence_step: i32,
    pub next_step: Option<i32>,
    pub due: bool,
    pub due_at: Option<DueAt>,
    pub sendable_now: bool,
    pub assigned_sender: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}
