use once_cell::sync::Lazy;
use regex::Regex;

use super::{ChatMessage, CompletionRequest};
use crate::core::types::{FilingDescriptor, PeriodType, ValueType};

static SCORE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(score|scores|scoring|rating|ratings|rank|ranking|scale|grade|sentiment|likelihood|assessment)\b")
        .unwrap()
});

const SYSTEM_PROMPT: &str = "You are a precise financial data extraction assistant. \
Answer only from the filing text you are given and reply with a single JSON object.";

pub const MAX_REPLY_TOKENS: u32 = 300;

/// Features phrased as a rating are scored 0-10; everything else is a plain number.
pub fn classify_feature(feature: &str) -> ValueType {
    if SCORE_RE.is_match(feature) {
        ValueType::Score
    } else {
        ValueType::Number
    }
}

fn period_hint(period: PeriodType) -> &'static str {
    match period {
        PeriodType::Annual => "This is an annual report; prefer full fiscal-year figures.",
        PeriodType::Quarterly => "This is a quarterly report; prefer figures for the quarter reported.",
        PeriodType::Unknown => "Prefer figures for the most recent period reported.",
    }
}

fn answer_instructions(value_type: ValueType) -> &'static str {
    match value_type {
        ValueType::Number => {
            "\"value\" must be a single number with no units, currency symbols or thousands separators. \
If the filing states the figure in thousands, millions or billions, convert it to the actual number. \
Use a negative number for losses or amounts shown in parentheses."
        }
        ValueType::Score => {
            "\"value\" must be a number from 0 to 10 rating the feature as described by the filing, \
where 0 is the lowest and 10 the highest possible level. Base the rating only on what the filing says."
        }
    }
}

/// Builds the single stateless request for one filing.
pub fn build_request(
    filing: &FilingDescriptor,
    feature: &str,
    value_type: ValueType,
    content: &str,
) -> CompletionRequest {
    let user = format!(
        r#"Extract the "{feature}" for {ticker} from its {form} filed on {date}.
{period}
{instructions}
If the filing does not contain enough information, set "value" to null.

Reply with JSON only, exactly in this shape:
{{"value": <number or null>, "value_type": "{value_type}", "evidence": "<short quote from the filing supporting the value>"}}

Filing text:
{content}"#,
        feature = feature,
        ticker = filing.ticker,
        form = filing.form_type,
        date = filing.filing_date,
        period = period_hint(filing.period_type()),
        instructions = answer_instructions(value_type),
        value_type = value_type,
        content = content,
    );

    CompletionRequest {
        messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)],
        temperature: 0.0,
        max_tokens: MAX_REPLY_TOKENS,
    }
}
