use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::error::PipelineError;
use crate::edgar::report::ReportType;
use crate::edgar::tickers::Ticker;

pub const MIN_LIMIT: usize = 1;
pub const MAX_LIMIT: usize = 20;
pub const DEFAULT_LIMIT: usize = 5;

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// Request body as it arrives over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractRequestBody {
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub feature: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// A validated extraction request: uppercase tickers in submission order, one per share class
/// (`BRK.B` and `BRK-B` count once).
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractRequest {
    pub tickers: Vec<Ticker>,
    pub feature: String,
    pub limit: usize,
}

impl ExtractRequest {
    pub fn new(tickers: Vec<String>, feature: &str, limit: usize) -> Result<Self, PipelineError> {
        let feature = feature.trim();
        if feature.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "tickers and feature are required".to_string(),
            ));
        }
        if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
            return Err(PipelineError::InvalidRequest(format!(
                "limit must be between {} and {}, got {}",
                MIN_LIMIT, MAX_LIMIT, limit
            )));
        }

        let tickers = tickers
            .into_iter()
            .map(Ticker::new)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(|e| PipelineError::InvalidRequest(e.to_string()))?
            .into_iter()
            .unique_by(Ticker::lookup_key)
            .collect::<Vec<_>>();
        if tickers.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "tickers and feature are required".to_string(),
            ));
        }

        Ok(Self {
            tickers,
            feature: feature.to_string(),
            limit,
        })
    }
}

impl TryFrom<ExtractRequestBody> for ExtractRequest {
    type Error = PipelineError;

    fn try_from(body: ExtractRequestBody) -> Result<Self, Self::Error> {
        ExtractRequest::new(body.tickers, &body.feature, body.limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Unscaled numeric quantity.
    Number,
    /// Bounded qualitative rating on a 0-10 scale.
    Score,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::Number => write!(f, "number"),
            ValueType::Score => write!(f, "score"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Annual,
    Quarterly,
    Unknown,
}

impl std::fmt::Display for PeriodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeriodType::Annual => write!(f, "annual"),
            PeriodType::Quarterly => write!(f, "quarterly"),
            PeriodType::Unknown => write!(f, "unknown"),
        }
    }
}

/// One discoverable filing. Produced by the locator, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingDescriptor {
    pub ticker: Ticker,
    pub cik: String,
    pub form_type: ReportType,
    pub filing_date: NaiveDate,
    pub accession_number: String,
    pub document_url: String,
}

impl FilingDescriptor {
    pub fn period_type(&self) -> PeriodType {
        self.form_type.period_type()
    }
}

/// Outcome of one (ticker, filing) unit, or of a ticker that never got that far.
///
/// A populated `error` always comes with a null `value`. A null `value` without
/// an error means the model found nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub ticker: String,
    pub feature: String,
    pub value: Option<f64>,
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    pub period_type: PeriodType,
    pub form_type: Option<String>,
    pub filing_date: Option<NaiveDate>,
    pub filing_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionResult {
    pub fn extracted(
        filing: &FilingDescriptor,
        feature: &str,
        value: Option<f64>,
        value_type: ValueType,
        evidence: Option<String>,
    ) -> Self {
        Self {
            ticker: filing.ticker.to_string(),
            feature: feature.to_string(),
            value,
            value_type,
            evidence,
            period_type: filing.period_type(),
            form_type: Some(filing.form_type.to_string()),
            filing_date: Some(filing.filing_date),
            filing_url: Some(filing.document_url.clone()),
            error: None,
        }
    }

    pub fn failed_filing(
        filing: &FilingDescriptor,
        feature: &str,
        value_type: ValueType,
        error: impl ToString,
    ) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::extracted(filing, feature, None, value_type, None)
        }
    }

    /// Ticker-level failure: no filing was attempted.
    pub fn failed_ticker(
        ticker: &Ticker,
        feature: &str,
        value_type: ValueType,
        error: impl ToString,
    ) -> Self {
        Self {
            ticker: ticker.to_string(),
            feature: feature.to_string(),
            value: None,
            value_type,
            evidence: None,
            period_type: PeriodType::Unknown,
            form_type: None,
            filing_date: None,
            filing_url: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub ticker: String,
    /// 1-based position of the unit among its ticker's filings; 0 for ticker-level failures.
    pub filing_index: usize,
    pub filings_total: usize,
    pub filings_completed: usize,
    pub tickers_completed: usize,
    pub tickers_total: usize,
    pub message: String,
}

/// Events written to the response stream, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Progress(ProgressEvent),
    Complete { results: Vec<ExtractionResult> },
    Error { message: String },
}

impl StreamEvent {
    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Progress(_))
    }
}
