//! config/scheduler_config.rs
//! Configuración global del scheduler, con valores por defecto.
//! Se lee de variables de entorno (cargadas desde .env con dotenv).

use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Datos del relay SMTP; si no hay host se usa el transporte dry-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub pass: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub database_url: String,
    pub http_bind: String,
    /// Contactos procesados en paralelo dentro de una pasada.
    pub worker_count: usize,
    pub pass_timeout_secs: u64,
    /// 0 = sin ejecución periódica (solo por HTTP).
    pub scheduler_interval_secs: u64,
    pub min_health_score: i64,
    /// Reservas 'reserved' más viejas que esto se pueden reclamar.
    pub reservation_ttl_secs: i64,
    /// Offset del día de cuota de los remitentes.
    pub quota_utc_offset_hours: i32,
    pub business_hours_start: u32,
    pub business_hours_end: u32,
    pub timezone_groups: BTreeMap<String, i32>,
    pub default_timezone_group: String,
    pub smtp: Option<SmtpSettings>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            database_url: "sqlite:data/outreach.db".to_string(),
            http_bind: "0.0.0.0:5022".to_string(),
            worker_count: 4,
            pass_timeout_secs: 240,
            scheduler_interval_secs: 0,
            min_health_score: 90,
            reservation_ttl_secs: 900,
            quota_utc_offset_hours: 0,
            business_hours_start: 9,
            business_hours_end: 17,
            timezone_groups: default_timezone_groups(),
            default_timezone_group: "T1".to_string(),
            smtp: None,
        }
    }
}

/// T1 Eastern, T2 Central, T3 Europa, T4 Asia.
pub fn default_timezone_groups() -> BTreeMap<String, i32> {
    [("T1", -5), ("T2", -6), ("T3", 0), ("T4", 8)]
        .into_iter()
        .map(|(tag, offset)| (tag.to_string(), offset))
        .collect()
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = SchedulerConfig::default();

        let smtp = match env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(SmtpSettings {
                host,
                port: env_or("SMTP_PORT", 587)?,
                user: env::var("SMTP_USER").unwrap_or_default(),
                pass: env::var("SMTP_PASS").unwrap_or_default(),
                timeout_secs: env_or("SMTP_TIMEOUT_SECS", 30)?,
            }),
            _ => None,
        };

        let timezone_groups = match env::var("TIMEZONE_GROUPS") {
            Ok(raw) => parse_timezone_groups(&raw)?,
            Err(_) => defaults.timezone_groups,
        };

        let config = SchedulerConfig {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            http_bind: env::var("HTTP_BIND").unwrap_or(defaults.http_bind),
            worker_count: env_or("SCHEDULER_WORKERS", defaults.worker_count)?,
            pass_timeout_secs: env_or("SCHEDULER_PASS_TIMEOUT_SECS", defaults.pass_timeout_secs)?,
            scheduler_interval_secs: env_or(
                "SCHEDULER_INTERVAL_SECS",
                defaults.scheduler_interval_secs,
            )?,
            min_health_score: env_or("MIN_HEALTH_SCORE", defaults.min_health_score)?,
            reservation_ttl_secs: env_or("RESERVATION_TTL_SECS", defaults.reservation_ttl_secs)?,
            quota_utc_offset_hours: env_or(
                "QUOTA_UTC_OFFSET_HOURS",
                defaults.quota_utc_offset_hours,
            )?,
            business_hours_start: env_or("BUSINESS_HOURS_START", defaults.business_hours_start)?,
            business_hours_end: env_or("BUSINESS_HOURS_END", defaults.business_hours_end)?,
            timezone_groups,
            default_timezone_group: env::var("DEFAULT_TIMEZONE_GROUP")
                .unwrap_or(defaults.default_timezone_group),
            smtp,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.business_hours_start >= self.business_hours_end || self.business_hours_end > 24 {
            return Err(anyhow!(
                "Ventana horaria inválida: [{}, {})",
                self.business_hours_start,
                self.business_hours_end
            ));
        }
        // Una reserva en curso no puede vencer antes de que termine su envío.
        let max_send_secs = self.pass_timeout_secs
            + self.smtp.as_ref().map(|smtp| smtp.timeout_secs).unwrap_or(0);
        if self.reservation_ttl_secs <= 0 || self.reservation_ttl_secs as u64 <= max_send_secs {
            return Err(anyhow!(
                "RESERVATION_TTL_SECS ({}) debe ser mayor que SCHEDULER_PASS_TIMEOUT_SECS + SMTP_TIMEOUT_SECS ({})",
                self.reservation_ttl_secs,
                max_send_secs
            ));
        }
        if !self.timezone_groups.contains_key(&self.default_timezone_group) {
            return Err(anyhow!(
                "El grupo por defecto '{}' no está en TIMEZONE_GROUPS",
                self.default_timezone_group
            ));
        }
        Ok(())
    }

    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Valor inválido para {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

/// Formato "T1:-5,T2:-6,T3:0,T4:8".
pub fn parse_timezone_groups(raw: &str) -> Result<BTreeMap<String, i32>> {
    let mut groups = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (tag, offset) = entry
            .split_once(':')
            .ok_or_else(|| anyhow!("Entrada de TIMEZONE_GROUPS sin ':' -> '{}'", entry))?;
        let offset: i32 = offset
            .trim()
            .parse()
            .with_context(|| format!("Offset inválido en '{}'", entry))?;
        if !(-12..=14).contains(&offset) {
            return Err(anyhow!("Offset fuera de rango en '{}'", entry));
        }
        groups.insert(tag.trim().to_string(), offset);
    }
    if groups.is_empty() {
        return Err(anyhow!("TIMEZONE_GROUPS está vacío"));
    }
    Ok(groups)
}
