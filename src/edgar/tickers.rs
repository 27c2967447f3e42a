use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const TICKER_URL: &str = "https://www.sec.gov/files/company_tickers.json";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    pub fn new(ticker: String) -> Result<Self> {
        let uppercase_ticker = ticker.trim().to_uppercase();
        if uppercase_ticker.is_empty() {
            return Err(anyhow!("Ticker cannot be empty"));
        }
        if !uppercase_ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        {
            return Err(anyhow!(
                "Ticker must contain only alphanumeric characters, dots or hyphens: {}",
                ticker
            ));
        }
        Ok(Ticker(uppercase_ticker))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key used against the SEC directory, which spells share classes with a hyphen.
    pub fn lookup_key(&self) -> String {
        self.0.replace('.', "-")
    }
}

impl TryFrom<String> for Ticker {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        Ticker::new(s)
    }
}

impl From<Ticker> for String {
    fn from(ticker: Ticker) -> Self {
        ticker.0
    }
}

impl AsRef<str> for Ticker {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    cik_str: u64,
    ticker: String,
    title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyRecord {
    /// Zero-padded to 10 digits.
    pub cik: String,
    pub name: String,
}

/// Ticker -> company map built from the SEC `company_tickers.json` file.
#[derive(Debug, Clone, Default)]
pub struct TickerDirectory {
    ticker_to_company: HashMap<String, CompanyRecord>,
}

impl TickerDirectory {
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: HashMap<String, TickerEntry> = serde_json::from_str(json)
            .map_err(|e| anyhow!("Failed to parse ticker directory JSON: {}", e))?;
        log::debug!("Found {} ticker entries", entries.len());

        let mut ticker_to_company = HashMap::with_capacity(entries.len());
        for entry in entries.into_values() {
            let key = entry.ticker.trim().to_uppercase().replace('.', "-");
            if key.is_empty() {
                continue;
            }
            ticker_to_company.insert(
                key,
                CompanyRecord {
                    cik: format!("{:010}", entry.cik_str),
                    name: entry.title,
                },
            );
        }

        Ok(Self { ticker_to_company })
    }

    pub fn lookup(&self, ticker: &Ticker) -> Option<&CompanyRecord> {
        self.ticker_to_company.get(&ticker.lookup_key())
    }

    pub fn len(&self) -> usize {
        self.ticker_to_company.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticker_to_company.is_empty()
    }
}
