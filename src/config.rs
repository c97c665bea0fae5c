use anyhow::{bail, Context};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CHAPA_BASE_URL: &str = "https://api.chapa.co/v1";

/// Process configuration, read once at start-up
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    /// `None` runs the relay on the in-memory ledger.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub chapa_secret_key: String,
    pub chapa_base_url: String,
    /// Externally reachable origin, used for gateway callback/return URLs.
    pub public_base_url: String,
    pub gateway_timeout: Duration,
    pub gateway_max_attempts: usize,
    pub json_logs: bool,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let chapa_secret_key = match get("CHAPA_SECRET_KEY") {
            Some(key) => key,
            None => bail!("CHAPA_SECRET_KEY must be set"),
        };

        let port = parse_or(get("PORT"), "PORT", 5000u16)?;
        let public_base_url = get("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", port))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            port,
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or(
                get("DATABASE_MAX_CONNECTIONS"),
                "DATABASE_MAX_CONNECTIONS",
                10u32,
            )?,
            chapa_secret_key,
            chapa_base_url: get("CHAPA_BASE_URL")
                .unwrap_or_else(|| DEFAULT_CHAPA_BASE_URL.to_string()),
            public_base_url,
            gateway_timeout: Duration::from_secs(parse_or(
                get("GATEWAY_TIMEOUT_SECS"),
                "GATEWAY_TIMEOUT_SECS",
                15u64,
            )?),
            gateway_max_attempts: parse_or(
                get("GATEWAY_MAX_ATTEMPTS"),
                "GATEWAY_MAX_ATTEMPTS",
                3usize,
            )?,
            json_logs: get("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
        })
    }

    pub fn callback_url(&self) -> String {
        format!("{}/api/payment-callback", self.public_base_url)
    }

    pub fn return_url(&self, page: &str) -> String {
        format!("{}/{}", self.public_base_url, page.trim_start_matches('/'))
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, value)),
        None => Ok(default),
    }
}
