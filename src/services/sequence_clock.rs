//! services/sequence_clock.rs
//! Decide si el siguiente paso de un contacto ya venció. Sin efectos secundarios.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::models::{
    campaign_model::Contact,
    sequence_model::{DueAt, SequenceStep, TimingRule},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceDecision {
    /// No existe el paso `sequence_step + 1`.
    Complete,
    Due { step: i32, due_at: DueAt },
    NotDue { step: i32, due_at: DueAt },
}

impl SequenceDecision {
    pub fn is_due(&self) -> bool {
        matches!(self, SequenceDecision::Due { .. })
    }

    pub fn step(&self) -> Option<i32> {
        match self {
            SequenceDecision::Complete => None,
            SequenceDecision::Due { step, .. } | SequenceDecision::NotDue { step, .. } => {
                Some(*step)
            }
        }
    }

    pub fn due_at(&self) -> Option<DueAt> {
        match self {
            SequenceDecision::Complete => None,
            SequenceDecision::Due { due_at, .. } | SequenceDecision::NotDue { due_at, .. } => {
                Some(*due_at)
            }
        }
    }
}

/// Fecha de calendario de `ts` en un offset fijo (horas respecto a UTC).
pub fn local_date(ts: DateTime<Utc>, utc_offset_hours: i32) -> NaiveDate {
    (ts + Duration::hours(i64::from(utc_offset_hours))).date_naive()
}

/// Fecha base: creación para el primer paso, último contacto para el resto.
pub fn base_instant(contact: &Contact) -> DateTime<Utc> {
    if contact.sequence_step == 0 {
        contact.created_at
    } else {
        contact.last_contacted_at.unwrap_or(contact.created_at)
    }
}

/// Evalúa el paso `contact.sequence_step + 1` contra `now`.
///
/// Los offsets en días se comparan por fecha de calendario en el offset del
/// contacto, no por instantes: un contacto tocado a las 23:00 con un día de
/// espera vence al día siguiente, no 24 horas después. Los offsets en horas
/// sí se comparan por instante.
pub fn evaluate(
    contact: &Contact,
    steps: &[SequenceStep],
    now: DateTime<Utc>,
    utc_offset_hours: i32,
) -> SequenceDecision {
    let next = contact.sequence_step + 1;
    let Some(step) = steps.iter().find(|s| s.active && s.step_number == next) else {
        return SequenceDecision::Complete;
    };

    let base = base_instant(contact);
    let (due, due_at) = match step.timing {
        TimingRule::Immediate => {
            let due_on = local_date(base, utc_offset_hours);
            (local_date(now, utc_offset_hours) >= due_on, DueAt::Date(due_on))
        }
        TimingRule::AfterDays(days) => {
            let due_on = local_date(base, utc_offset_hours) + Duration::days(i64::from(days));
            (local_date(now, utc_offset_hours) >= due_on, DueAt::Date(due_on))
        }
        TimingRule::AfterHours(hours) => {
            let due_instant = base + Duration::hours(i64::from(hours));
            (now >= due_instant, DueAt::Instant(due_instant))
        }
    };

    if due {
        SequenceDecision::Due { step: next, due_at }
    } else {
        SequenceDecision::NotDue { step: next, due_at }
    }
}
