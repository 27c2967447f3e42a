use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "anyfactor-app contact@example.com";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.perplexity.ai";
pub const DEFAULT_LLM_MODEL: &str = "sonar";

#[derive(Clone, Debug)]
pub struct ExtractorConfig {
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub llm_max_retries: u32,
    pub unit_budget: Duration,
    pub user_agent: String,
    pub edgar_max_concurrent: usize,
    pub edgar_min_interval: Duration,
    pub http_timeout: Duration,
    pub max_document_bytes: usize,
    pub max_content_chars: usize,
    pub workers: usize,
    pub bind_addr: SocketAddr,
}

impl ExtractorConfig {
    pub fn from_env() -> Result<Self> {
        let llm_api_key = ["LLM_API_KEY", "PERPLEXITY_API_KEY", "OPENAI_KEY"]
            .iter()
            .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                anyhow!("LLM_API_KEY environment variable not set (PERPLEXITY_API_KEY and OPENAI_KEY are also accepted)")
            })?;

        let llm_base_url = std::env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_LLM_BASE_URL.to_string());
        let llm_model =
            std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string());
        let user_agent =
            std::env::var("USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string());

        let workers: usize = env_or("WORKERS", 4)?;
        if workers == 0 {
            return Err(anyhow!("WORKERS must be at least 1"));
        }
        let edgar_max_concurrent: usize = env_or("EDGAR_MAX_CONCURRENT", 10)?;
        if edgar_max_concurrent == 0 {
            return Err(anyhow!("EDGAR_MAX_CONCURRENT must be at least 1"));
        }

        Ok(Self {
            llm_api_key,
            llm_base_url,
            llm_model,
            llm_timeout: Duration::from_secs(env_or("LLM_TIMEOUT_SECS", 60)?),
            llm_max_retries: env_or("LLM_MAX_RETRIES", 3)?,
            unit_budget: Duration::from_secs(env_or("UNIT_BUDGET_SECS", 180)?),
            user_agent,
            edgar_max_concurrent,
            edgar_min_interval: Duration::from_millis(env_or("EDGAR_MIN_INTERVAL_MS", 100)?),
            http_timeout: Duration::from_secs(env_or("HTTP_TIMEOUT_SECS", 30)?),
            max_document_bytes: env_or("MAX_DOCUMENT_BYTES", 10_000_000)?,
            max_content_chars: env_or("MAX_CONTENT_CHARS", 50_000)?,
            workers,
            bind_addr: env_or("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 5000)))?,
        })
    }
}

/// Reads `key` from the environment, falling back to `default` when it is unset.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid value for {}: {:?} ({})", key, raw, e)),
        Err(_) => Ok(default),
    }
}
