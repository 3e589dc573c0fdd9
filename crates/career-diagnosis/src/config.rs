use std::net::SocketAddr;
use std::time::Duration;

use crate::error::AppError;
use crate::fallback::ClassifierThresholds;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    pub user: String,
    pub password: String,
}

/// Application configuration loaded from environment variables.
///
/// LLM transport settings (`LLM_BASE_URL`, `LLM_API_KEY`, `LLM_TIMEOUT_SECS`, ...)
/// are read separately by `LlmClientConfig::from_env`.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Redis connection URL. `None` runs without persistence.
    pub redis_url: Option<String>,
    /// Model for final diagnoses and question generation.
    pub model: String,
    /// Lighter model raced against the rule-based classifier for partial diagnoses.
    pub fast_model: String,
    /// How long the fast model gets before the rule-based result is used.
    pub fast_budget: Duration,
    pub record_ttl_secs: u64,
    pub record_index_max: usize,
    /// `None` disables the admin routes.
    pub admin: Option<AdminCredentials>,
    pub recommend_limit: usize,
    pub analytics_forward_url: Option<String>,
    pub thresholds: ClassifierThresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            redis_url: None,
            model: "gpt-4o".to_string(),
            fast_model: "gpt-4o-mini".to_string(),
            fast_budget: Duration::from_millis(4_000),
            record_ttl_secs: 90 * 86_400,
            record_index_max: 1_000,
            admin: None,
            recommend_limit: 3,
            analytics_forward_url: None,
            thresholds: ClassifierThresholds::default(),
        }
    }
}

impl Config {
    /// Optional (defaults in parentheses):
    /// - `BIND_ADDR` (`0.0.0.0:8080`)
    /// - `REDIS_URL`
    /// - `LLM_MODEL` (`gpt-4o`), `LLM_FAST_MODEL` (`gpt-4o-mini`), `LLM_FAST_BUDGET_MS` (4000)
    /// - `RECORD_TTL_SECS` (90 days), `RECORD_INDEX_MAX` (1000)
    /// - `ADMIN_USER` + `ADMIN_PASSWORD` (both or neither)
    /// - `RECOMMEND_LIMIT` (3)
    /// - `ANALYTICS_FORWARD_URL`
    /// - `FALLBACK_*` classifier thresholds
    pub fn from_env() -> Result<Self, AppError> {
        let d = Self::default();

        let bind_addr = match std::env::var("BIND_ADDR") {
            Ok(raw) => raw.parse::<SocketAddr>().map_err(|e| {
                AppError::Config(format!("BIND_ADDR {raw:?} is not a socket address: {e}"))
            })?,
            Err(_) => d.bind_addr,
        };

        let admin = match (non_empty("ADMIN_USER"), non_empty("ADMIN_PASSWORD")) {
            (Some(user), Some(password)) => Some(AdminCredentials { user, password }),
            (None, None) => None,
            _ => {
                return Err(AppError::Config(
                    "ADMIN_USER and ADMIN_PASSWORD must be set together".to_string(),
                ))
            }
        };

        let recommend_limit = parse_or("RECOMMEND_LIMIT", d.recommend_limit)?;
        if recommend_limit == 0 {
            return Err(AppError::Config("RECOMMEND_LIMIT must be at least 1".to_string()));
        }

        Ok(Self {
            bind_addr,
            redis_url: non_empty("REDIS_URL"),
            model: non_empty("LLM_MODEL").unwrap_or(d.model),
            fast_model: non_empty("LLM_FAST_MODEL").unwrap_or(d.fast_model),
            fast_budget: Duration::from_millis(parse_or(
                "LLM_FAST_BUDGET_MS",
                d.fast_budget.as_millis() as u64,
            )?),
            record_ttl_secs: parse_or("RECORD_TTL_SECS", d.record_ttl_secs)?,
            record_index_max: parse_or("RECORD_INDEX_MAX", d.record_index_max)?,
            admin,
            recommend_limit,
            analytics_forward_url: non_empty("ANALYTICS_FORWARD_URL"),
            thresholds: ClassifierThresholds::from_env(),
        })
    }
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    match non_empty(name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| AppError::Config(format!("{name} {raw:?} is invalid: {e}"))),
        None => Ok(default),
    }
}
