use std::time::Duration;

use anyhow::{Context, Result, bail};
use murmur_client::live::gateway_url_from_api;
use murmur_types::{PeerId, UserId};

const DEFAULT_API_URL: &str = "http://localhost:5000";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub gateway_url: String,
    pub user_id: UserId,
    pub peer_id: Option<PeerId>,
    pub token: Option<String>,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Blank values count as unset so a template .env can leave them empty.
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let api_url = var("MURMUR_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        let gateway_url = match var("MURMUR_GATEWAY_URL") {
            Some(url) => url,
            None => gateway_url_from_api(&api_url)
                .with_context(|| format!("cannot derive gateway url from {api_url}"))?,
        };

        let Some(user_id) = var("MURMUR_USER_ID") else {
            bail!("MURMUR_USER_ID must be set");
        };

        let http_timeout = match var("MURMUR_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("MURMUR_HTTP_TIMEOUT_SECS is not a number: {raw}"))?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        Ok(Self {
            api_url,
            gateway_url,
            user_id: UserId::new(user_id),
            peer_id: var("MURMUR_PEER_ID").map(PeerId::new),
            token: var("MURMUR_TOKEN"),
            http_timeout: Duration::from_secs(http_timeout),
        })
    }
}
