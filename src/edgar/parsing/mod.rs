pub mod section;
pub mod text;

use super::RawDocument;
use crate::core::error::ParseError;

pub use section::fit_to_budget;
pub use text::{html_to_text, plain_text};

/// Filing text ready for the model: markup removed and sized to the budget.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedContent {
    pub text: String,
    /// Set when the text was cut, either at fetch time or to fit the budget.
    pub truncated: bool,
    /// Character count of the cleaned text before budgeting.
    pub source_chars: usize,
}

#[derive(Debug, Clone)]
pub struct ContentNormalizer {
    max_chars: usize,
}

impl ContentNormalizer {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn normalize(
        &self,
        document: &RawDocument,
        feature: &str,
    ) -> Result<NormalizedContent, ParseError> {
        if document.text.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        if let Some(reason) = text::non_textual_reason(&document.text) {
            return Err(ParseError::NonTextual(reason));
        }

        let cleaned = if text::looks_like_html(&document.text, document.content_type.as_deref()) {
            html_to_text(&document.text)
        } else {
            plain_text(&document.text)
        };
        if cleaned.is_empty() {
            return Err(ParseError::NoText);
        }

        let source_chars = cleaned.chars().count();
        let (text, cut) = fit_to_budget(&cleaned, feature, self.max_chars);
        log::debug!(
            "Normalized {}: {} chars of text, {} sent{}",
            document.url,
            source_chars,
            text.chars().count(),
            if cut { " (truncated)" } else { "" }
        );

        Ok(NormalizedContent {
            text,
            truncated: cut || document.truncated,
            source_chars,
        })
    }
}
