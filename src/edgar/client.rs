use anyhow::{Context, Result};
use async_trait::async_trait;
use mime::{APPLICATION_JSON, TEXT_HTML};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::filing::{select_filings, submissions_url, CompanyFilings};
use super::report::ReportType;
use super::tickers::{Ticker, TickerDirectory, TICKER_URL};
use super::{FilingFetcher, FilingLocator, RawDocument};
use crate::core::config::ExtractorConfig;
use crate::core::error::{FetchError, RegistryError};
use crate::core::types::FilingDescriptor;
use crate::utils::http::{decode_body, HttpFetcher};
use crate::utils::rate_limit::RateLimiter;

const REGISTRY_RETRIES: u32 = 2;

/// SEC EDGAR client: ticker directory, submissions index and archived documents.
pub struct EdgarClient {
    http: HttpFetcher,
    max_document_bytes: usize,
    directory: RwLock<Option<Arc<TickerDirectory>>>,
}

impl EdgarClient {
    pub fn new(
        client: Client,
        user_agent: &str,
        limiter: RateLimiter,
        max_document_bytes: usize,
    ) -> Self {
        Self {
            http: HttpFetcher::new(client, user_agent, limiter, REGISTRY_RETRIES),
            max_document_bytes,
            directory: RwLock::new(None),
        }
    }

    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.http_timeout)
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create EDGAR HTTP client")?;
        let limiter = RateLimiter::new(config.edgar_max_concurrent, config.edgar_min_interval);
        Ok(Self::new(
            client,
            &config.user_agent,
            limiter,
            config.max_document_bytes,
        ))
    }

    async fn ticker_directory(&self) -> Result<Arc<TickerDirectory>, RegistryError> {
        if let Some(directory) = self.directory.read().await.as_ref() {
            return Ok(directory.clone());
        }

        let mut write_guard = self.directory.write().await;
        if let Some(directory) = write_guard.as_ref() {
            return Ok(directory.clone());
        }

        log::debug!("Fetching tickers from SEC");
        let json = self
            .http
            .get_text(TICKER_URL, APPLICATION_JSON)
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        let directory = TickerDirectory::from_json(&json)
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        log::info!("Loaded {} tickers from the SEC directory", directory.len());

        let directory = Arc::new(directory);
        *write_guard = Some(directory.clone());
        Ok(directory)
    }
}

/// A missing filing index is a per-ticker problem; any other failure means the registry is down.
fn index_error(ticker: &Ticker, cik: &str, err: FetchError) -> RegistryError {
    match err {
        FetchError::Status { status: 404, .. } => RegistryError::TickerNotFound(format!(
            "{} (no filing index for CIK {})",
            ticker, cik
        )),
        other => RegistryError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl FilingLocator for EdgarClient {
    async fn list_filings(
        &self,
        ticker: &Ticker,
        report_types: &[ReportType],
        limit: usize,
    ) -> Result<Vec<FilingDescriptor>, RegistryError> {
        let directory = self.ticker_directory().await?;
        let company = directory
            .lookup(ticker)
            .ok_or_else(|| RegistryError::TickerNotFound(ticker.to_string()))?;

        let url = submissions_url(&company.cik);
        log::debug!("EDGAR API Request URL: {}", url);
        let json = self
            .http
            .get_text(&url, APPLICATION_JSON)
            .await
            .map_err(|e| index_error(ticker, &company.cik, e))?;

        let filings: CompanyFilings = serde_json::from_str(&json).map_err(|e| {
            log::error!("Failed to parse submissions for CIK {}: {}", company.cik, e);
            RegistryError::Unavailable(format!("Failed to parse filings JSON: {}", e))
        })?;

        let selected = select_filings(
            ticker,
            &company.cik,
            &filings.filings.recent,
            report_types,
            limit,
        );
        log::info!(
            "{} ({}): {} of {} indexed filings match {:?}",
            ticker,
            company.name,
            selected.len(),
            filings.filings.recent.accession_number.len(),
            report_types.iter().map(|t| t.to_string()).collect::<Vec<_>>()
        );
        Ok(selected)
    }
}

#[async_trait]
impl FilingFetcher for EdgarClient {
    async fn fetch(&self, filing: &FilingDescriptor) -> Result<RawDocument, FetchError> {
        log::info!("Fetching: {}", filing.document_url);
        let body = self
            .http
            .get_capped(&filing.document_url, TEXT_HTML, self.max_document_bytes)
            .await?;

        Ok(RawDocument {
            url: filing.document_url.clone(),
            text: decode_body(&body.bytes),
            content_type: body.content_type,
            truncated: body.truncated,
        })
    }
}
