#![allow(dead_code)]

use anyfactor::core::error::{FetchError, ProviderError, RegistryError};
use anyfactor::core::types::{ExtractRequest, FilingDescriptor, StreamEvent};
use anyfactor::edgar::report::ReportType;
use anyfactor::edgar::tickers::Ticker;
use anyfactor::edgar::{FilingFetcher, FilingLocator, RawDocument};
use anyfactor::extract::{CompletionRequest, ExtractionEngine, LlmProvider};
use anyfactor::pipeline::{Orchestrator, PipelineConfig, ProgressSink, RunSummary};
use anyfactor::PipelineError;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn filing(ticker: &str, form: &str, date: &str, seq: u32) -> FilingDescriptor {
    let filing_date = NaiveDate::from_str(date).unwrap();
    let accession = format!("0000000001-{}-{:06}", &date[2..4], seq);
    FilingDescriptor {
        ticker: Ticker::new(ticker.to_string()).unwrap(),
        cik: "0000000001".to_string(),
        form_type: ReportType::from_str(form).unwrap(),
        filing_date,
        accession_number: accession.clone(),
        document_url: format!(
            "https://www.sec.gov/Archives/edgar/data/1/{}/{}-{}.htm",
            accession.replace('-', ""),
            ticker.to_lowercase(),
            date
        ),
    }
}

/// In-memory registry: filing indexes per ticker and documents per URL.
#[derive(Default)]
pub struct FakeRegistry {
    filings: HashMap<String, Vec<FilingDescriptor>>,
    documents: HashMap<String, String>,
    failing_documents: HashSet<String>,
    panicking_documents: HashSet<String>,
    unavailable: HashSet<String>,
    pub fetch_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers filings, newest first.
    pub fn with_filings(mut self, ticker: &str, filings: Vec<FilingDescriptor>) -> Self {
        for filing in &filings {
            self.documents.entry(filing.document_url.clone()).or_insert_with(|| {
                format!(
                    "<html><body><h2>CONSOLIDATED BALANCE SHEETS</h2><table><tr><td>Total shareholders' equity</td><td>$</td><td>56,950</td></tr></table><p>{} {}</p></body></html>",
                    filing.ticker, filing.filing_date
                )
            });
        }
        self.filings.insert(ticker.to_string(), filings);
        self
    }

    pub fn with_document(mut self, url: &str, body: &str) -> Self {
        self.documents.insert(url.to_string(), body.to_string());
        self
    }

    pub fn failing_document(mut self, url: &str) -> Self {
        self.failing_documents.insert(url.to_string());
        self
    }

    pub fn panicking_document(mut self, url: &str) -> Self {
        self.panicking_documents.insert(url.to_string());
        self
    }

    pub fn unavailable_for(mut self, ticker: &str) -> Self {
        self.unavailable.insert(ticker.to_string());
        self
    }
}

#[async_trait]
impl FilingLocator for FakeRegistry {
    async fn list_filings(
        &self,
        ticker: &Ticker,
        report_types: &[ReportType],
        limit: usize,
    ) -> Result<Vec<FilingDescriptor>, RegistryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.contains(ticker.as_str()) {
            return Err(RegistryError::Unavailable("503 from data.sec.gov".to_string()));
        }
        let filings = self
            .filings
            .get(ticker.as_str())
            .ok_or_else(|| RegistryError::TickerNotFound(ticker.to_string()))?;
        Ok(filings
            .iter()
            .filter(|f| report_types.contains(&f.form_type))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FilingFetcher for FakeRegistry {
    async fn fetch(&self, filing: &FilingDescriptor) -> Result<RawDocument, FetchError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.panicking_documents.contains(&filing.document_url) {
            panic!("decoder blew up on {}", filing.document_url);
        }
        if self.failing_documents.contains(&filing.document_url) {
            return Err(FetchError::Status {
                url: filing.document_url.clone(),
                status: 404,
            });
        }
        let text = self
            .documents
            .get(&filing.document_url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: filing.document_url.clone(),
                status: 404,
            })?;
        Ok(RawDocument {
            url: filing.document_url.clone(),
            text,
            content_type: Some("text/html".to_string()),
            truncated: false,
        })
    }
}

/// Answers by matching a marker (ticker, date, ...) in the prompt; falls back to a default reply.
pub struct FakeProvider {
    replies: Vec<(String, String)>,
    default_reply: String,
    delays: HashMap<String, Duration>,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new(default_reply: &str) -> Self {
        Self {
            replies: Vec::new(),
            default_reply: default_reply.to_string(),
            delays: HashMap::new(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn reply_when(mut self, marker: &str, reply: &str) -> Self {
        self.replies.push((marker.to_string(), reply.to_string()));
        self
    }

    pub fn delay_when(mut self, marker: &str, delay: Duration) -> Self {
        self.delays.insert(marker.to_string(), delay);
        self
    }
}

#[async_trait]
impl LlmProvider for FakeProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(prompt.clone());

        if let Some((_, delay)) = self.delays.iter().find(|(marker, _)| prompt.contains(marker.as_str())) {
            tokio::time::sleep(*delay).await;
        }
        Ok(self
            .replies
            .iter()
            .find(|(marker, _)| prompt.contains(marker.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default_reply.clone()))
    }
}

pub fn orchestrator(registry: Arc<FakeRegistry>, provider: Arc<FakeProvider>, workers: usize) -> Orchestrator {
    let config = PipelineConfig {
        workers,
        ..PipelineConfig::default()
    };
    let engine = ExtractionEngine::new(provider, config.llm_max_retries, config.unit_budget)
        .with_backoff(Duration::from_millis(1));
    Orchestrator::new(registry.clone(), registry, engine, config)
}

pub fn request(tickers: &[&str], feature: &str, limit: usize) -> ExtractRequest {
    ExtractRequest::new(
        tickers.iter().map(|t| t.to_string()).collect(),
        feature,
        limit,
    )
    .unwrap()
}

/// Runs a request and collects every event written to the stream.
pub async fn run_collecting(
    orchestrator: &Orchestrator,
    request: &ExtractRequest,
) -> (Result<RunSummary, PipelineError>, Vec<StreamEvent>) {
    let (sink, mut rx) = ProgressSink::channel(1024, CancellationToken::new());
    let outcome = orchestrator.run(request, &sink).await;
    drop(sink);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (outcome, events)
}
