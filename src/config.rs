use std::time::Duration;

use serde::Deserialize;
use time::UtcOffset;

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    pub api_url: String,
    pub api_token: String,
    pub instance: String,
    pub verify_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub base_url: String,
    pub api_key: String,
    pub intent_timeout_secs: u64,
    pub analysis_timeout_secs: u64,
}

/// Timers, retry limits and TTLs of the session engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub idle_quiet_period: Duration,
    pub append_max_attempts: u32,
    pub append_backoff_base: Duration,
    pub send_max_attempts: u32,
    pub send_backoff_base: Duration,
    pub stuck_after: time::Duration,
    pub nutrition_ttl: time::Duration,
    pub batch_initial_ttl: time::Duration,
    pub batch_renewal: time::Duration,
    pub batch_max_lifetime: time::Duration,
    pub progress_every: i32,
    pub intent_timeout: Duration,
    pub analysis_timeout: Duration,
    pub local_offset: UtcOffset,
    pub site_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_quiet_period: Duration::from_secs(8),
            append_max_attempts: 5,
            append_backoff_base: Duration::from_millis(100),
            send_max_attempts: 3,
            send_backoff_base: Duration::from_millis(200),
            stuck_after: time::Duration::minutes(10),
            nutrition_ttl: time::Duration::hours(2),
            batch_initial_ttl: time::Duration::hours(2),
            batch_renewal: time::Duration::hours(1),
            batch_max_lifetime: time::Duration::hours(24),
            progress_every: 5,
            intent_timeout: Duration::from_secs(15),
            analysis_timeout: Duration::from_secs(25),
            local_offset: UtcOffset::from_hms(-3, 0, 0).unwrap_or(UtcOffset::UTC),
            site_url: "http://localhost:8080".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub use_memory_store: bool,
    /// Users preloaded into the in-memory directory.
    pub seed_users: Vec<SeedUser>,
    pub whatsapp: WhatsAppConfig,
    pub ai: AiConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedUser {
    pub phone: String,
    pub full_name: Option<String>,
}

/// `MEMORY_USERS="5511988887777:Ana Souza;5521900001111"`
fn parse_seed_users(raw: &str) -> Vec<SeedUser> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((phone, name)) => SeedUser {
                phone: phone.trim().to_owned(),
                full_name: Some(name.trim().to_owned()).filter(|n| !n.is_empty()),
            },
            None => SeedUser {
                phone: entry.to_owned(),
                full_name: None,
            },
        })
        .collect()
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let use_memory_store = database_url.is_none()
            || std::env::var("SESSION_STORE")
                .map(|v| v.eq_ignore_ascii_case("memory"))
                .unwrap_or(false);

        let whatsapp = WhatsAppConfig {
            api_url: std::env::var("WHATSAPP_API_URL")?,
            api_token: std::env::var("WHATSAPP_API_TOKEN")?,
            instance: env_or("WHATSAPP_INSTANCE", "coachbot"),
            verify_token: env_or("WHATSAPP_VERIFY_TOKEN", ""),
        };

        let ai = AiConfig {
            base_url: std::env::var("AI_BASE_URL")?,
            api_key: env_or("AI_API_KEY", ""),
            intent_timeout_secs: env_parse("AI_INTENT_TIMEOUT_SECS", 15),
            analysis_timeout_secs: env_parse("AI_ANALYSIS_TIMEOUT_SECS", 25),
        };

        let offset_hours: i8 = env_parse("LOCAL_UTC_OFFSET_HOURS", -3);
        let local_offset = UtcOffset::from_hms(offset_hours, 0, 0)
            .map_err(|e| anyhow::anyhow!("LOCAL_UTC_OFFSET_HOURS out of range: {e}"))?;

        let engine = EngineConfig {
            intent_timeout: Duration::from_secs(ai.intent_timeout_secs),
            analysis_timeout: Duration::from_secs(ai.analysis_timeout_secs),
            local_offset,
            site_url: env_or("SITE_URL", "http://localhost:8080"),
            ..EngineConfig::default()
        };

        Ok(Self {
            database_url,
            use_memory_store,
            seed_users: parse_seed_users(&env_or("MEMORY_USERS", "")),
            whatsapp,
            ai,
            engine,
        })
    }
}
