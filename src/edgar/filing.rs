use chrono::NaiveDate;
use itertools::izip;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::report::ReportType;
use super::tickers::Ticker;
use crate::core::types::FilingDescriptor;

pub const EDGAR_DATA_URL: &str = "https://data.sec.gov";
pub const EDGAR_ARCHIVES_URL: &str = "https://www.sec.gov/Archives/edgar/data";

/// Columnar block of the submissions API: the i-th entry of every vector describes one filing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilingEntry {
    #[serde(rename = "accessionNumber", default)]
    pub accession_number: Vec<String>,
    #[serde(rename = "filingDate", default)]
    pub filing_date: Vec<NaiveDate>,
    #[serde(rename = "form", default)]
    pub report_type: Vec<String>,
    #[serde(rename = "primaryDocument", default)]
    pub primary_document: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilingsData {
    #[serde(default)]
    pub recent: FilingEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyFilings {
    pub cik: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub filings: FilingsData,
}

pub fn submissions_url(padded_cik: &str) -> String {
    format!("{}/submissions/CIK{}.json", EDGAR_DATA_URL, padded_cik)
}

pub fn document_url(cik: &str, accession_number: &str, primary_document: &str) -> String {
    let cik = cik.trim_start_matches('0');
    let cik = if cik.is_empty() { "0" } else { cik };
    format!(
        "{}/{}/{}/{}",
        EDGAR_ARCHIVES_URL,
        cik,
        accession_number.replace('-', ""),
        primary_document
    )
}

/// Picks the most recent filings of the requested forms, newest first, at most `limit`.
pub fn select_filings(
    ticker: &Ticker,
    padded_cik: &str,
    entry: &FilingEntry,
    report_types: &[ReportType],
    limit: usize,
) -> Vec<FilingDescriptor> {
    let mut filings: Vec<FilingDescriptor> = izip!(
        &entry.accession_number,
        &entry.filing_date,
        &entry.report_type,
        &entry.primary_document
    )
    .filter_map(|(accession, filing_date, form, primary_doc)| {
        let form_type = ReportType::from_str(form).ok()?;
        if primary_doc.trim().is_empty() || !report_types.contains(&form_type) {
            return None;
        }
        Some(FilingDescriptor {
            ticker: ticker.clone(),
            cik: padded_cik.to_string(),
            form_type,
            filing_date: *filing_date,
            accession_number: accession.clone(),
            document_url: document_url(padded_cik, accession, primary_doc.trim()),
        })
    })
    .collect();

    // Stable, so same-day filings keep registry order.
    filings.sort_by(|a, b| b.filing_date.cmp(&a.filing_date));
    filings.truncate(limit);
    filings
}
