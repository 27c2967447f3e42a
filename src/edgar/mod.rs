pub mod client;
pub mod filing;
pub mod parsing;
pub mod report;
pub mod tickers;

use async_trait::async_trait;

use crate::core::error::{FetchError, RegistryError};
use crate::core::types::FilingDescriptor;
use report::ReportType;
use tickers::Ticker;

pub use client::EdgarClient;

/// Filing document body as fetched, before any markup is removed.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub url: String,
    pub text: String,
    pub content_type: Option<String>,
    /// Set when the body was cut at the fetch size cap.
    pub truncated: bool,
}

/// Resolves a ticker to its most recent filings of the given forms, newest first.
#[async_trait]
pub trait FilingLocator: Send + Sync {
    async fn list_filings(
        &self,
        ticker: &Ticker,
        report_types: &[ReportType],
        limit: usize,
    ) -> Result<Vec<FilingDescriptor>, RegistryError>;
}

/// Retrieves the primary document of one filing.
#[async_trait]
pub trait FilingFetcher: Send + Sync {
    async fn fetch(&self, filing: &FilingDescriptor) -> Result<RawDocument, FetchError>;
}
