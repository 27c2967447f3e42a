use serde_json::Value;

use crate::core::error::ExtractionError;
use crate::core::types::ValueType;

pub const MAX_EVIDENCE_CHARS: usize = 500;
pub const SCORE_RANGE: std::ops::RangeInclusive<f64> = 0.0..=10.0;

/// A model reply, checked against the value type derived from the feature phrase.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelAnswer {
    Number {
        value: f64,
        evidence: Option<String>,
    },
    Score {
        value: f64,
        evidence: Option<String>,
    },
    NotFound {
        evidence: Option<String>,
    },
    Malformed(Malformed),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Malformed {
    /// The reply could not be read as the requested JSON shape.
    Unreadable(String),
    /// The reply was readable but the value breaks the contract (non-finite, score out of range).
    OutOfContract(String),
}

/// A validated extraction: `None` means the filing does not state the feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub value: Option<f64>,
    pub evidence: Option<String>,
}

/// Intermediate reading of a reply before the value type is applied.
struct RawAnswer {
    value: Option<f64>,
    evidence: Option<String>,
    /// The model's own idea of the value type. Advisory only.
    reported_type: Option<String>,
}

impl RawAnswer {
    fn bare(value: Option<f64>) -> Self {
        Self {
            value,
            evidence: None,
            reported_type: None,
        }
    }
}

impl ModelAnswer {
    /// Reads a model reply. Accepts the JSON object asked for, the same object wrapped in a
    /// code fence or surrounded by prose, a bare number, or a bare `null`.
    pub fn from_reply(reply: &str, value_type: ValueType) -> Self {
        match read_reply(reply) {
            Ok(raw) => classify(raw, value_type),
            Err(reason) => ModelAnswer::Malformed(Malformed::Unreadable(reason)),
        }
    }

    pub fn into_extraction(self) -> Result<Extraction, ExtractionError> {
        match self {
            ModelAnswer::Number { value, evidence } | ModelAnswer::Score { value, evidence } => {
                Ok(Extraction {
                    value: Some(value),
                    evidence,
                })
            }
            ModelAnswer::NotFound { evidence } => Ok(Extraction {
                value: None,
                evidence,
            }),
            ModelAnswer::Malformed(Malformed::Unreadable(reason)) => {
                Err(ExtractionError::ResponseParse(reason))
            }
            ModelAnswer::Malformed(Malformed::OutOfContract(reason)) => {
                Err(ExtractionError::OutOfContract(reason))
            }
        }
    }
}

fn classify(raw: RawAnswer, value_type: ValueType) -> ModelAnswer {
    if let Some(reported) = raw.reported_type.as_deref() {
        if !reported.eq_ignore_ascii_case(&value_type.to_string()) {
            log::debug!(
                "Model labelled the value as {:?}, expected {}",
                reported,
                value_type
            );
        }
    }

    let Some(value) = raw.value else {
        return ModelAnswer::NotFound {
            evidence: raw.evidence,
        };
    };
    if !value.is_finite() {
        return ModelAnswer::Malformed(Malformed::OutOfContract(format!(
            "non-finite value {}",
            value
        )));
    }
    match value_type {
        ValueType::Number => ModelAnswer::Number {
            value,
            evidence: raw.evidence,
        },
        ValueType::Score if SCORE_RANGE.contains(&value) => ModelAnswer::Score {
            value,
            evidence: raw.evidence,
        },
        ValueType::Score => ModelAnswer::Malformed(Malformed::OutOfContract(format!(
            "score {} outside 0-10",
            value
        ))),
    }
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().trim_end_matches("```").trim()
}

fn is_null_word(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "null" | "none" | "n/a" | "not found" | ""
    )
}

/// Parses the numeric forms models tend to produce: `1,234.5`, `$12`, `(12)`, `45%`.
fn parse_number(text: &str) -> Option<f64> {
    let mut cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '%' | ' '))
        .collect();
    let negative = cleaned.starts_with('(') && cleaned.ends_with(')');
    if negative {
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
    }
    if cleaned.is_empty()
        || !cleaned
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return None;
    }
    let value: f64 = cleaned.parse().ok()?;
    Some(if negative { -value } else { value })
}

fn cap_evidence(evidence: &str) -> Option<String> {
    let evidence = evidence.trim();
    if evidence.is_empty() {
        return None;
    }
    Some(match evidence.char_indices().nth(MAX_EVIDENCE_CHARS) {
        Some((idx, _)) => evidence[..idx].to_string(),
        None => evidence.to_string(),
    })
}

fn read_reply(reply: &str) -> Result<RawAnswer, String> {
    let body = strip_code_fence(reply);
    if body.is_empty() {
        return Err("empty reply".to_string());
    }
    if is_null_word(body) {
        return Ok(RawAnswer::bare(None));
    }
    if let Some(value) = parse_number(body) {
        return Ok(RawAnswer::bare(Some(value)));
    }

    let object = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => {
            return Err(format!(
                "no JSON object in reply: {:?}",
                truncate_for_log(body)
            ))
        }
    };
    match serde_json::from_str::<Value>(object) {
        Ok(Value::Object(map)) => read_object(&map),
        Ok(_) => Err("reply is not a JSON object".to_string()),
        Err(e) => Err(format!("invalid JSON in reply: {}", e)),
    }
}

fn read_object(object: &serde_json::Map<String, Value>) -> Result<RawAnswer, String> {
    let value = match object.get("value") {
        None => return Err("reply object has no \"value\" field".to_string()),
        Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if is_null_word(s) => None,
        Some(Value::String(s)) => {
            Some(parse_number(s).ok_or_else(|| format!("\"value\" is not numeric: {:?}", s))?)
        }
        Some(other) => return Err(format!("\"value\" has unexpected type: {}", other)),
    };

    Ok(RawAnswer {
        value,
        evidence: object
            .get("evidence")
            .and_then(Value::as_str)
            .and_then(cap_evidence),
        reported_type: object
            .get("value_type")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn truncate_for_log(text: &str) -> &str {
    match text.char_indices().nth(120) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
