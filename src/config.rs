use phonenumber::country::Id as CountryId;
use std::time::Duration;

use crate::callback_workflow::CompletionPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    /// Per-call persistence timeout; exceeding it surfaces as `Unavailable`.
    pub store_timeout: Duration,
    pub default_search_radius_km: f64,
    pub default_search_limit: i64,
    pub max_search_limit: i64,
    pub completion_policy: CompletionPolicy,
    pub phone_region: CountryId,
    pub notify_webhook_url: Option<String>,
    pub question_cache_ttl: Duration,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", key, raw)),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 10)?,
            store_timeout: Duration::from_millis(env_or("STORE_TIMEOUT_MS", 5000)?),
            default_search_radius_km: env_or("DEFAULT_SEARCH_RADIUS_KM", 10.0)?,
            default_search_limit: env_or("DEFAULT_SEARCH_LIMIT", 20)?,
            max_search_limit: env_or("MAX_SEARCH_LIMIT", 100)?,
            completion_policy: CompletionPolicy {
                allow_complete_from_pending: env_or("ALLOW_COMPLETE_FROM_PENDING", false)?,
            },
            phone_region: std::env::var("PHONE_REGION")
                .unwrap_or_else(|_| "US".to_string())
                .trim()
                .to_ascii_uppercase()
                .parse()
                .map_err(|_| anyhow::anyhow!("PHONE_REGION must be an ISO 3166 country code"))?,
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|raw| {
                    let parsed = url::Url::parse(&raw)
                        .map_err(|e| anyhow::anyhow!("NOTIFY_WEBHOOK_URL is invalid: {}", e))?;
                    if parsed.scheme() != "http" && parsed.scheme() != "https" {
                        anyhow::bail!("NOTIFY_WEBHOOK_URL must start with http:// or https://");
                    }
                    Ok(raw)
                })
                .transpose()?,
            question_cache_ttl: Duration::from_secs(env_or("QUESTION_CACHE_TTL_SECS", 300)?),
        };

        if config.store_timeout.is_zero() {
            anyhow::bail!("STORE_TIMEOUT_MS must be greater than zero");
        }
        if config.default_search_limit <= 0 || config.max_search_limit <= 0 {
            anyhow::bail!("search limits must be greater than zero");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Server Port: {}", config.port);
        tracing::debug!(
            "Store timeout: {:?}, completion from pending allowed: {}",
            config.store_timeout,
            config.completion_policy.allow_complete_from_pending
        );
        if let Some(ref hook) = config.notify_webhook_url {
            tracing::info!("Callback notifications enabled: {}", hook);
        }

        Ok(config)
    }
}
