pub mod progress;

use anyhow::Result;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::config::ExtractorConfig;
use crate::core::error::{PipelineError, RegistryError, UnitError};
use crate::core::types::{
    ExtractRequest, ExtractionResult, FilingDescriptor, ProgressEvent, StreamEvent, ValueType,
};
use crate::edgar::parsing::ContentNormalizer;
use crate::edgar::report::ReportType;
use crate::edgar::{EdgarClient, FilingFetcher, FilingLocator};
use crate::extract::{classify_feature, ExtractionEngine, OpenAiCompatibleProvider};

pub use progress::ProgressSink;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: usize,
    pub report_types: Vec<ReportType>,
    pub max_content_chars: usize,
    pub unit_budget: Duration,
    pub llm_max_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            report_types: ReportType::default_forms(),
            max_content_chars: 50_000,
            unit_budget: Duration::from_secs(180),
            llm_max_retries: 3,
        }
    }
}

impl From<&ExtractorConfig> for PipelineConfig {
    fn from(config: &ExtractorConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            report_types: ReportType::default_forms(),
            max_content_chars: config.max_content_chars,
            unit_budget: config.unit_budget,
            llm_max_retries: config.llm_max_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Running {
        tickers_completed: usize,
        filings_completed: usize,
    },
    Completed,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub results: Vec<ExtractionResult>,
    pub failures: usize,
    pub elapsed: Duration,
}

/// What units and the dispatcher report to the run loop.
enum UnitMessage {
    Planned {
        ticker_idx: usize,
        filings_total: usize,
    },
    TickerFailed {
        ticker_idx: usize,
        result: ExtractionResult,
    },
    Finished {
        ticker_idx: usize,
        filing_idx: usize,
        result: ExtractionResult,
    },
    Cancelled,
    Fatal(String),
}

/// Per-run state shared read-only by all units.
struct UnitContext {
    fetcher: Arc<dyn FilingFetcher>,
    normalizer: ContentNormalizer,
    engine: ExtractionEngine,
    feature: String,
    value_type: ValueType,
}

/// Per-ticker bookkeeping owned by the run loop.
#[derive(Default)]
struct TickerSlot {
    filings_total: usize,
    remaining: usize,
    results: Vec<Option<ExtractionResult>>,
}

pub struct Orchestrator {
    locator: Arc<dyn FilingLocator>,
    fetcher: Arc<dyn FilingFetcher>,
    engine: ExtractionEngine,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        locator: Arc<dyn FilingLocator>,
        fetcher: Arc<dyn FilingFetcher>,
        engine: ExtractionEngine,
        config: PipelineConfig,
    ) -> Self {
        Self {
            locator,
            fetcher,
            engine,
            config,
        }
    }

    /// Wires the EDGAR client and the configured LLM provider together.
    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        let edgar = Arc::new(EdgarClient::from_config(config)?);
        let provider = Arc::new(OpenAiCompatibleProvider::from_config(config)?);
        let pipeline_config = PipelineConfig::from(config);
        let engine = ExtractionEngine::new(
            provider,
            pipeline_config.llm_max_retries,
            pipeline_config.unit_budget,
        );
        Ok(Self::new(edgar.clone(), edgar, engine, pipeline_config))
    }

    pub fn with_report_types(mut self, report_types: Vec<ReportType>) -> Self {
        self.config.report_types = report_types;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one request to completion, writing progress and the final result set to `sink`.
    ///
    /// Ends with exactly one terminal event: `complete` on success, `error` when the registry
    /// is unavailable or the run was cancelled.
    pub async fn run(
        &self,
        request: &ExtractRequest,
        sink: &ProgressSink,
    ) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let cancel = sink.cancel_token().clone();
        let value_type = classify_feature(&request.feature);
        log::info!(
            "Extracting {:?} ({}) for {} ticker(s), up to {} filing(s) each",
            request.feature,
            value_type,
            request.tickers.len(),
            request.limit
        );

        let context = Arc::new(UnitContext {
            fetcher: self.fetcher.clone(),
            normalizer: ContentNormalizer::new(self.config.max_content_chars),
            engine: self.engine.clone(),
            feature: request.feature.clone(),
            value_type,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let dispatch = self.dispatch(request, context, tx, cancel.clone());
        let collect = collect(request, rx, sink, cancel.clone());
        let ((), outcome) = tokio::join!(dispatch, collect);

        let outcome = match outcome {
            Ok(results) => results,
            Err(e) => {
                match &e {
                    PipelineError::Cancelled => log::warn!("Run cancelled after {:?}", started.elapsed()),
                    other => log::error!("Run aborted: {}", other),
                }
                sink.emit(StreamEvent::Error {
                    message: e.to_string(),
                })
                .await;
                return Err(e);
            }
        };

        let summary = RunSummary {
            failures: outcome.iter().filter(|r| r.is_error()).count(),
            results: outcome,
            elapsed: started.elapsed(),
        };
        sink.emit(StreamEvent::Complete {
            results: summary.results.clone(),
        })
        .await;
        log::info!(
            "Run finished: {} result(s), {} failure(s) in {:.1}s",
            summary.results.len(),
            summary.failures,
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }

    /// Walks tickers in submission order, locating filings and spawning bounded units, then
    /// waits for every unit to report.
    async fn dispatch(
        &self,
        request: &ExtractRequest,
        context: Arc<UnitContext>,
        tx: mpsc::UnboundedSender<UnitMessage>,
        cancel: CancellationToken,
    ) {
        let mut units = JoinSet::new();
        self.spawn_units(request, context, &tx, &cancel, &mut units).await;

        while let Some(joined) = units.join_next().await {
            if let Err(e) = joined {
                log::error!("Unit task failed to complete: {}", e);
            }
        }
    }

    async fn spawn_units(
        &self,
        request: &ExtractRequest,
        context: Arc<UnitContext>,
        tx: &mpsc::UnboundedSender<UnitMessage>,
        cancel: &CancellationToken,
        units: &mut JoinSet<()>,
    ) {
        let workers = Arc::new(Semaphore::new(self.config.workers.max(1)));

        for (ticker_idx, ticker) in request.tickers.iter().enumerate() {
            let located = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                located = self.locator.list_filings(ticker, &self.config.report_types, request.limit) => located,
            };

            let filings = match located {
                Ok(filings) if filings.is_empty() => {
                    let forms = self
                        .config
                        .report_types
                        .iter()
                        .map(|t| t.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    let _ = tx.send(UnitMessage::TickerFailed {
                        ticker_idx,
                        result: ExtractionResult::failed_ticker(
                            ticker,
                            &context.feature,
                            context.value_type,
                            format!("No matching filings ({}) found for {}", forms, ticker),
                        ),
                    });
                    continue;
                }
                Ok(filings) => filings,
                Err(RegistryError::Unavailable(reason)) => {
                    let _ = tx.send(UnitMessage::Fatal(reason));
                    return;
                }
                Err(e @ RegistryError::TickerNotFound(_)) => {
                    log::warn!("{}: {}", ticker, e);
                    let _ = tx.send(UnitMessage::TickerFailed {
                        ticker_idx,
                        result: ExtractionResult::failed_ticker(
                            ticker,
                            &context.feature,
                            context.value_type,
                            e,
                        ),
                    });
                    continue;
                }
            };

            let _ = tx.send(UnitMessage::Planned {
                ticker_idx,
                filings_total: filings.len(),
            });
            for (filing_idx, filing) in filings.into_iter().enumerate() {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    permit = workers.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };
                let context = context.clone();
                let tx = tx.clone();
                let cancel = cancel.clone();
                units.spawn(async move {
                    let outcome = AssertUnwindSafe(run_unit(&context, &filing, &cancel))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(UnitError::Panicked(panic_message(panic))));
                    let message = match outcome {
                        Ok(result) => UnitMessage::Finished {
                            ticker_idx,
                            filing_idx,
                            result,
                        },
                        Err(UnitError::Cancelled) => UnitMessage::Cancelled,
                        Err(e) => {
                            log::warn!(
                                "{} {} {}: {}",
                                filing.ticker,
                                filing.form_type,
                                filing.accession_number,
                                e
                            );
                            UnitMessage::Finished {
                                ticker_idx,
                                filing_idx,
                                result: ExtractionResult::failed_filing(
                                    &filing,
                                    &context.feature,
                                    context.value_type,
                                    e,
                                ),
                            }
                        }
                    };
                    let _ = tx.send(message);
                    drop(permit);
                });
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unit panicked".to_string())
}

/// Fetch, normalize and extract one filing. Cancellation is checked before each network stage.
async fn run_unit(
    context: &UnitContext,
    filing: &FilingDescriptor,
    cancel: &CancellationToken,
) -> Result<ExtractionResult, UnitError> {
    if cancel.is_cancelled() {
        return Err(UnitError::Cancelled);
    }
    let document = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(UnitError::Cancelled),
        document = context.fetcher.fetch(filing) => document?,
    };
    let content = context.normalizer.normalize(&document, &context.feature)?;

    if cancel.is_cancelled() {
        return Err(UnitError::Cancelled);
    }
    let extraction = context
        .engine
        .extract(
            filing,
            &context.feature,
            context.value_type,
            &content.text,
            cancel,
        )
        .await?;

    log::debug!(
        "{} {} {}: {:?}",
        filing.ticker,
        filing.form_type,
        filing.filing_date,
        extraction.value
    );
    Ok(ExtractionResult::extracted(
        filing,
        &context.feature,
        extraction.value,
        context.value_type,
        extraction.evidence,
    ))
}

/// The run loop: sole owner of counters and result slots, sole emitter of progress.
async fn collect(
    request: &ExtractRequest,
    mut rx: mpsc::UnboundedReceiver<UnitMessage>,
    sink: &ProgressSink,
    cancel: CancellationToken,
) -> Result<Vec<ExtractionResult>, PipelineError> {
    let tickers_total = request.tickers.len();
    let mut slots: Vec<TickerSlot> = (0..tickers_total).map(|_| TickerSlot::default()).collect();
    let mut state = OrchestratorState::Idle;
    let mut fatal: Option<String> = None;
    let mut tickers_completed = 0;
    let mut filings_completed = 0;

    loop {
        let message = tokio::select! {
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = sink.closed(), if !cancel.is_cancelled() => continue,
        };
        let event = match message {
            UnitMessage::Planned {
                ticker_idx,
                filings_total,
            } => {
                let slot = &mut slots[ticker_idx];
                slot.filings_total = filings_total;
                slot.remaining = filings_total;
                slot.results = vec![None; filings_total];
                None
            }
            UnitMessage::TickerFailed { ticker_idx, result } => {
                tickers_completed += 1;
                let message = format!(
                    "{}: {}",
                    result.ticker,
                    result.error.as_deref().unwrap_or("failed")
                );
                let ticker = result.ticker.clone();
                slots[ticker_idx].results = vec![Some(result)];
                Some(ProgressEvent {
                    ticker,
                    filing_index: 0,
                    filings_total: 0,
                    filings_completed,
                    tickers_completed,
                    tickers_total,
                    message,
                })
            }
            UnitMessage::Finished {
                ticker_idx,
                filing_idx,
                result,
            } => {
                filings_completed += 1;
                let slot = &mut slots[ticker_idx];
                slot.remaining = slot.remaining.saturating_sub(1);
                if slot.remaining == 0 {
                    tickers_completed += 1;
                }
                let message = describe(&result);
                let event = ProgressEvent {
                    ticker: result.ticker.clone(),
                    filing_index: filing_idx + 1,
                    filings_total: slot.filings_total,
                    filings_completed,
                    tickers_completed,
                    tickers_total,
                    message,
                };
                if let Some(cell) = slot.results.get_mut(filing_idx) {
                    *cell = Some(result);
                }
                Some(event)
            }
            UnitMessage::Cancelled => None,
            UnitMessage::Fatal(reason) => {
                if fatal.is_none() {
                    log::error!("Filing registry unavailable: {}", reason);
                    fatal = Some(reason);
                }
                cancel.cancel();
                None
            }
        };

        state = OrchestratorState::Running {
            tickers_completed,
            filings_completed,
        };
        if let Some(event) = event {
            if fatal.is_none() && !cancel.is_cancelled() {
                sink.emit(StreamEvent::Progress(event)).await;
            }
        }
    }

    if let Some(reason) = fatal {
        return Err(PipelineError::RegistryUnavailable(reason));
    }
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    log::debug!("Run loop drained in state {:?}", state);
    state = OrchestratorState::Completed;
    log::debug!("Orchestrator {:?}", state);
    Ok(slots
        .into_iter()
        .flat_map(|slot| slot.results.into_iter().flatten())
        .collect())
}

fn describe(result: &ExtractionResult) -> String {
    let form = result.form_type.as_deref().unwrap_or("filing");
    let date = result
        .filing_date
        .map(|d| d.to_string())
        .unwrap_or_default();
    match (&result.error, result.value) {
        (Some(error), _) => format!("{} {} {} failed: {}", result.ticker, form, date, error),
        (None, Some(value)) => format!("{} {} {}: {}", result.ticker, form, date, value),
        (None, None) => format!("{} {} {}: not reported", result.ticker, form, date),
    }
}
