use std::time::Duration;
use thiserror::Error;

/// Failures while resolving a ticker or reading its filing index.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Per-ticker data problem; the batch carries on.
    #[error("Ticker not found: {0}")]
    TickerNotFound(String),
    /// The registry itself cannot be reached. Fatal for the whole request.
    #[error("Filing registry unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },
    #[error("Request to {url} failed with status {status}")]
    Status { url: String, status: u16 },
    #[error("Malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
    #[error("Transport error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                source: err,
            }
        }
    }

    /// Rate limiting, server-side failures and dropped connections may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Transport { source, .. } => source.is_connect() || source.is_request(),
            FetchError::Malformed { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Document is empty")]
    Empty,
    #[error("Document is not textual: {0}")]
    NonTextual(String),
    #[error("No usable text left after removing markup")]
    NoText,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Timeouts, connection failures, 429 and 5xx answers.
    #[error("Transient provider failure: {0}")]
    Transient(String),
    /// Authentication failures, bad requests and malformed envelopes.
    #[error("Provider rejected the request: {0}")]
    Rejected(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Model reply did not match the response contract: {0}")]
    ResponseParse(String),
    #[error("Model returned an out-of-contract value: {0}")]
    OutOfContract(String),
    #[error("Extraction exceeded its time budget of {0:?}")]
    TimedOut(Duration),
}

/// Everything that can fail a single (ticker, filing) unit.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Parse failed: {0}")]
    Parse(#[from] ParseError),
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("Unit aborted: {0}")]
    Panicked(String),
    #[error("Cancelled")]
    Cancelled,
}

/// Request-wide failures. These end the stream without a completion event.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Filing registry unavailable: {0}")]
    RegistryUnavailable(String),
    #[error("Request cancelled")]
    Cancelled,
}
