use anyhow::{anyhow, Context, Result};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3/";
const DEFAULT_LANGUAGE: &str = "en-US";
const DEFAULT_BIND: &str = "127.0.0.1:3146";
const DEFAULT_POLL_SECS: u64 = 5;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_token: String,
    pub base_url: Url,
    pub language: String,
    pub bind_addr: SocketAddr,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same parsing as [`Config::from_env`], reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_token = get("TMDB_API_TOKEN")
            .ok_or_else(|| anyhow!("Missing required environment variable: TMDB_API_TOKEN"))?;

        let mut base = get("TMDB_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        // Url::join drops the last segment unless the base ends with a slash.
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).with_context(|| format!("Invalid TMDB_BASE_URL '{}'", base))?;

        let language = get("TMDB_LANGUAGE").unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        let bind = get("CINESCOPE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr: SocketAddr = bind
            .parse()
            .with_context(|| format!("Invalid CINESCOPE_BIND '{}'", bind))?;

        let poll_secs = parse_secs(get("CINESCOPE_POLL_SECS"), "CINESCOPE_POLL_SECS", DEFAULT_POLL_SECS)?;
        let timeout_secs = parse_secs(
            get("CINESCOPE_HTTP_TIMEOUT_SECS"),
            "CINESCOPE_HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?;

        Ok(Self {
            api_token,
            base_url,
            language,
            bind_addr,
            poll_interval: Duration::from_secs(poll_secs),
            http_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn parse_secs(raw: Option<String>, key: &str, default: u64) -> Result<u64> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let secs: u64 = raw
        .parse()
        .with_context(|| format!("{} must be a whole number of seconds, got '{}'", key, raw))?;
    if secs == 0 {
        anyhow::bail!("{} must be at least 1 second", key);
    }
    Ok(secs)
}
