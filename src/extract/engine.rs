use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::answer::{Extraction, ModelAnswer};
use super::prompt::build_request;
use super::LlmProvider;
use crate::core::error::{ExtractionError, UnitError};
use crate::core::types::{FilingDescriptor, ValueType};

const BASE_BACKOFF: Duration = Duration::from_millis(500);

/// Turns normalized filing text into one validated value via the language model.
#[derive(Clone)]
pub struct ExtractionEngine {
    provider: Arc<dyn LlmProvider>,
    max_retries: u32,
    budget: Duration,
    base_backoff: Duration,
}

impl ExtractionEngine {
    pub fn new(provider: Arc<dyn LlmProvider>, max_retries: u32, budget: Duration) -> Self {
        Self {
            provider,
            max_retries,
            budget,
            base_backoff: BASE_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    /// Runs the prompt, retrying transient provider failures with exponential backoff,
    /// all inside the unit budget. Cancellation interrupts both calls and backoff sleeps.
    pub async fn extract(
        &self,
        filing: &FilingDescriptor,
        feature: &str,
        value_type: ValueType,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<Extraction, UnitError> {
        let attempt = tokio::time::timeout(
            self.budget,
            self.extract_with_retry(filing, feature, value_type, content, cancel),
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UnitError::Cancelled),
            outcome = attempt => match outcome {
                Ok(result) => result,
                Err(_) => Err(ExtractionError::TimedOut(self.budget).into()),
            },
        }
    }

    async fn extract_with_retry(
        &self,
        filing: &FilingDescriptor,
        feature: &str,
        value_type: ValueType,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<Extraction, UnitError> {
        let request = build_request(filing, feature, value_type, content);
        let mut attempt: u32 = 0;

        let reply = loop {
            match self.provider.complete(&request).await {
                Ok(reply) => break reply,
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.base_backoff * 2u32.pow(attempt);
                    attempt += 1;
                    log::warn!(
                        "LLM call for {} {} failed (attempt {}/{}), retrying in {:?}: {}",
                        filing.ticker,
                        filing.accession_number,
                        attempt,
                        self.max_retries + 1,
                        delay,
                        e
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(UnitError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(ExtractionError::from(e).into()),
            }
        };

        let extraction = ModelAnswer::from_reply(&reply, value_type)
            .into_extraction()
            .map_err(|e| {
                log::warn!(
                    "Unusable reply for {} {}: {}",
                    filing.ticker,
                    filing.accession_number,
                    e
                );
                e
            })?;
        Ok(extraction)
    }
}
