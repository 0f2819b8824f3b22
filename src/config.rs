use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Config {
    pub address: String,
    pub port: u16,
    pub database_path: String,
    pub upload_dir: PathBuf,
    pub jwt_secret: String,
    pub jwt_expiry: Duration,
    pub company_domain: String,
    pub max_upload_bytes: usize,
    pub allowed_origins: Vec<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let jwt_secret = get("FILEDECK_JWT_SECRET")
            .ok_or_else(|| anyhow!("FILEDECK_JWT_SECRET must be set"))?;
        let expiry_days: i64 = parse_or(get("FILEDECK_JWT_EXPIRY_DAYS"), 30, "FILEDECK_JWT_EXPIRY_DAYS")?;

        Ok(Config {
            address: get("FILEDECK_ADDRESS").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(get("FILEDECK_PORT"), 5000, "FILEDECK_PORT")?,
            database_path: get("FILEDECK_DATABASE").unwrap_or_else(|| "filedeck.db".to_string()),
            upload_dir: get("FILEDECK_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            jwt_secret,
            jwt_expiry: Duration::days(expiry_days),
            company_domain: get("FILEDECK_COMPANY_DOMAIN")
                .unwrap_or_else(|| "techcorp.com".to_string())
                .to_lowercase(),
            max_upload_bytes: parse_or(
                get("FILEDECK_MAX_UPLOAD_BYTES"),
                DEFAULT_MAX_UPLOAD_BYTES,
                "FILEDECK_MAX_UPLOAD_BYTES",
            )?,
            allowed_origins: get("FILEDECK_ALLOWED_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("FILEDECK_GEMINI_MODEL")
                .unwrap_or_else(|| "gemini-2.0-flash".to_string()),
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        SocketAddr::from_str(&format!("{}:{}", self.address, self.port))
            .with_context(|| format!("invalid listen address {}:{}", self.address, self.port))
    }
}

fn parse_or<T>(value: Option<String>, default: T, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has invalid value {raw:?}")),
        None => Ok(default),
    }
}
