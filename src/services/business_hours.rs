//! services/business_hours.rs
//! Ventana horaria local por grupo de zona horaria (offset fijo).

use std::collections::BTreeMap;

use chrono::{DateTime, Timelike, Utc};

use crate::config::scheduler_config::SchedulerConfig;

#[derive(Debug, Clone)]
pub struct BusinessHoursGate {
    offsets: BTreeMap<String, i32>,
    default_group: String,
    start_hour: u32,
    end_hour: u32,
}

impl BusinessHoursGate {
    pub fn new(
        offsets: BTreeMap<String, i32>,
        default_group: &str,
        start_hour: u32,
        end_hour: u32,
    ) -> Self {
        Self {
            offsets,
            default_group: default_group.to_string(),
            start_hour,
            end_hour,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(
            config.timezone_groups.clone(),
            &config.default_timezone_group,
            config.business_hours_start,
            config.business_hours_end,
        )
    }

    /// Grupo efectivo de un contacto (el de defecto si no tiene).
    pub fn resolve_group<'a>(&'a self, group: Option<&'a str>) -> &'a str {
        group.unwrap_or(self.default_group.as_str())
    }

    pub fn offset_for(&self, group: &str) -> Option<i32> {
        self.offsets.get(group).copied()
    }

    pub fn local_hour(utc_hour: u32, offset: i32) -> u32 {
        (utc_hour as i32 + offset + 24).rem_euclid(24) as u32
    }

    /// Hora local dentro de [start, end). Grupos desconocidos nunca son enviables.
    pub fn is_sendable(&self, group: &str, now: DateTime<Utc>) -> bool {
        match self.offset_for(group) {
            Some(offset) => {
                let hour = Self::local_hour(now.hour(), offset);
                hour >= self.start_hour && hour < self.end_hour
            }
            None => {
                log::warn!(
                    "(is_sendable) Grupo de zona horaria desconocido '{}', se difiere.",
                    group
                );
                false
            }
        }
    }
}
