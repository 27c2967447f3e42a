use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use strum::{EnumIter, IntoEnumIterator};

use crate::core::types::PeriodType;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
#[serde(try_from = "String", into = "String")]
pub enum ReportType {
    Form10K,
    Form10KA,
    Form10Q,
    Form10QA,
    Form20F,
    Form40F,
    Form8K,
    Other(String),
}

impl TryFrom<String> for ReportType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ReportType::from_str(&s)
    }
}

impl From<ReportType> for String {
    fn from(report_type: ReportType) -> Self {
        report_type.to_string()
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportType::Form10K => write!(f, "10-K"),
            ReportType::Form10KA => write!(f, "10-K/A"),
            ReportType::Form10Q => write!(f, "10-Q"),
            ReportType::Form10QA => write!(f, "10-Q/A"),
            ReportType::Form20F => write!(f, "20-F"),
            ReportType::Form40F => write!(f, "40-F"),
            ReportType::Form8K => write!(f, "8-K"),
            ReportType::Other(s) => write!(f, "{}", s),
        }
    }
}

pub static REPORT_TYPES: Lazy<String> = Lazy::new(|| {
    ReportType::iter()
        .filter(|t| !matches!(t, ReportType::Other(_)))
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
});

impl ReportType {
    pub fn list_types() -> &'static str {
        &REPORT_TYPES
    }

    /// Forms searched when the caller does not ask for anything else.
    pub fn default_forms() -> Vec<ReportType> {
        vec![ReportType::Form10K, ReportType::Form10Q]
    }

    pub fn period_type(&self) -> PeriodType {
        match self {
            ReportType::Form10K
            | ReportType::Form10KA
            | ReportType::Form20F
            | ReportType::Form40F => PeriodType::Annual,
            ReportType::Form10Q | ReportType::Form10QA => PeriodType::Quarterly,
            ReportType::Form8K | ReportType::Other(_) => PeriodType::Unknown,
        }
    }
}

impl FromStr for ReportType {
    type Err = String;
    fn from_str(s: &str) -> Result<ReportType, String> {
        let trimmed = s.trim();
        match trimmed.to_uppercase().as_str() {
            "10-K" => Ok(ReportType::Form10K),
            "10-K/A" => Ok(ReportType::Form10KA),
            "10-Q" => Ok(ReportType::Form10Q),
            "10-Q/A" => Ok(ReportType::Form10QA),
            "20-F" => Ok(ReportType::Form20F),
            "40-F" => Ok(ReportType::Form40F),
            "8-K" => Ok(ReportType::Form8K),
            "" => Err("Report type cannot be empty".to_string()),
            _ => Ok(ReportType::Other(trimmed.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_type_from_form() {
        assert_eq!(ReportType::Form10K.period_type(), PeriodType::Annual);
        assert_eq!(ReportType::Form20F.period_type(), PeriodType::Annual);
        assert_eq!(ReportType::Form10Q.period_type(), PeriodType::Quarterly);
        assert_eq!(
            ReportType::from_str("10-q/a").unwrap().period_type(),
            PeriodType::Quarterly
        );
        assert_eq!(
            ReportType::from_str("S-1").unwrap().period_type(),
            PeriodType::Unknown
        );
    }

    #[test]
    fn test_round_trip_through_display() {
        for report_type in ReportType::iter().filter(|t| !matches!(t, ReportType::Other(_))) {
            let parsed = ReportType::from_str(&report_type.to_string()).unwrap();
            assert_eq!(parsed, report_type);
        }
        assert_eq!(
            ReportType::from_str("DEF 14A").unwrap(),
            ReportType::Other("DEF 14A".to_string())
        );
    }

    #[test]
    fn test_list_types() {
        assert_eq!(
            ReportType::list_types(),
            "10-K, 10-K/A, 10-Q, 10-Q/A, 20-F, 40-F, 8-K"
        );
    }
}
