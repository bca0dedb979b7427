use std::env;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub max_concurrent_orders: usize,
    pub auto_assign_radius_km: f64,
    pub payment_confirmation_delay_ms: u64,
    pub scheduler_tick_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            event_buffer_size: 256,
            max_concurrent_orders: 3,
            auto_assign_radius_km: 10.0,
            payment_confirmation_delay_ms: 2_000,
            scheduler_tick_ms: 250,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Config::default();

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") | Err(_) => LogFormat::Compact,
            Ok(other) => {
                return Err(AppError::UpstreamFailure(format!(
                    "invalid LOG_FORMAT: {other}, expected compact or json"
                )));
            }
        };

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            max_concurrent_orders: parse_or_default(
                "MAX_CONCURRENT_ORDERS",
                defaults.max_concurrent_orders,
            )?,
            auto_assign_radius_km: parse_or_default(
                "AUTO_ASSIGN_RADIUS_KM",
                defaults.auto_assign_radius_km,
            )?,
            payment_confirmation_delay_ms: parse_or_default(
                "PAYMENT_CONFIRMATION_DELAY_MS",
                defaults.payment_confirmation_delay_ms,
            )?,
            scheduler_tick_ms: parse_or_default("SCHEDULER_TICK_MS", defaults.scheduler_tick_ms)?,
        };

        if config.max_concurrent_orders == 0 {
            return Err(AppError::UpstreamFailure(
                "MAX_CONCURRENT_ORDERS must be > 0".to_string(),
            ));
        }
        if config.event_buffer_size == 0 {
            return Err(AppError::UpstreamFailure(
                "EVENT_BUFFER_SIZE must be > 0".to_string(),
            ));
        }

        Ok(config)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::UpstreamFailure(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
