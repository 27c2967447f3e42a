use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*item\s+\d+[a-z]?\s*[.:\-–—]?(\s|$)").unwrap());
static TERM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]+").unwrap());

pub const TRUNCATION_MARKER: &str = "\n[TRUNCATED]";
const SECTION_SEPARATOR: &str = "\n[...]\n";
/// Below this many characters a partial section is not worth including.
const MIN_PARTIAL_CHARS: usize = 400;
const MAX_HEADING_CHARS: usize = 100;
const MAX_HEADING_WORDS: usize = 10;

const HEADING_WEIGHT: usize = 10;
const PHRASE_WEIGHT: usize = 5;
const CATEGORY_BONUS: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SectionCategory {
    BalanceSheet,
    IncomeStatement,
    CashFlows,
    Equity,
    Notes,
    RiskFactors,
    MarketRisk,
    LegalProceedings,
    ManagementDiscussion,
    HumanCapital,
    Business,
}

const SECTION_PATTERNS: &[(&str, SectionCategory)] = &[
    ("balance sheet", SectionCategory::BalanceSheet),
    ("financial position", SectionCategory::BalanceSheet),
    ("statements of operations", SectionCategory::IncomeStatement),
    ("statement of operations", SectionCategory::IncomeStatement),
    ("income statement", SectionCategory::IncomeStatement),
    ("statements of income", SectionCategory::IncomeStatement),
    ("statement of income", SectionCategory::IncomeStatement),
    ("statements of earnings", SectionCategory::IncomeStatement),
    ("comprehensive income", SectionCategory::IncomeStatement),
    ("cash flows", SectionCategory::CashFlows),
    ("stockholders' equity", SectionCategory::Equity),
    ("shareholders' equity", SectionCategory::Equity),
    ("notes to", SectionCategory::Notes),
    ("risk factors", SectionCategory::RiskFactors),
    ("market risk", SectionCategory::MarketRisk),
    ("legal proceedings", SectionCategory::LegalProceedings),
    ("management's discussion", SectionCategory::ManagementDiscussion),
    ("human capital", SectionCategory::HumanCapital),
    ("employees", SectionCategory::HumanCapital),
    ("business", SectionCategory::Business),
];

/// Which sections a feature is most likely reported in, keyed on fragments of the feature phrase.
const FEATURE_HINTS: &[(&str, &[SectionCategory])] = &[
    ("revenue", &[SectionCategory::IncomeStatement, SectionCategory::ManagementDiscussion]),
    ("sales", &[SectionCategory::IncomeStatement, SectionCategory::ManagementDiscussion]),
    ("income", &[SectionCategory::IncomeStatement]),
    ("earnings", &[SectionCategory::IncomeStatement]),
    ("profit", &[SectionCategory::IncomeStatement]),
    ("margin", &[SectionCategory::IncomeStatement, SectionCategory::ManagementDiscussion]),
    ("expense", &[SectionCategory::IncomeStatement]),
    ("cost", &[SectionCategory::IncomeStatement]),
    ("eps", &[SectionCategory::IncomeStatement]),
    ("per share", &[SectionCategory::IncomeStatement]),
    ("asset", &[SectionCategory::BalanceSheet]),
    ("liabilit", &[SectionCategory::BalanceSheet]),
    ("equity", &[SectionCategory::BalanceSheet, SectionCategory::Equity]),
    ("book value", &[SectionCategory::BalanceSheet, SectionCategory::Equity]),
    ("debt", &[SectionCategory::BalanceSheet, SectionCategory::Notes]),
    ("inventor", &[SectionCategory::BalanceSheet]),
    ("goodwill", &[SectionCategory::BalanceSheet, SectionCategory::Notes]),
    ("shares outstanding", &[SectionCategory::BalanceSheet, SectionCategory::Equity]),
    ("cash flow", &[SectionCategory::CashFlows]),
    ("capital expenditure", &[SectionCategory::CashFlows]),
    ("capex", &[SectionCategory::CashFlows]),
    ("dividend", &[SectionCategory::CashFlows, SectionCategory::Equity]),
    ("repurchase", &[SectionCategory::CashFlows, SectionCategory::Equity]),
    ("buyback", &[SectionCategory::CashFlows, SectionCategory::Equity]),
    ("risk", &[SectionCategory::RiskFactors, SectionCategory::MarketRisk]),
    ("exposure", &[SectionCategory::RiskFactors, SectionCategory::MarketRisk]),
    ("litigation", &[SectionCategory::LegalProceedings, SectionCategory::RiskFactors]),
    ("lawsuit", &[SectionCategory::LegalProceedings, SectionCategory::RiskFactors]),
    ("legal", &[SectionCategory::LegalProceedings]),
    ("regulat", &[SectionCategory::RiskFactors, SectionCategory::LegalProceedings]),
    ("employee", &[SectionCategory::HumanCapital, SectionCategory::Business]),
    ("headcount", &[SectionCategory::HumanCapital, SectionCategory::Business]),
    ("workforce", &[SectionCategory::HumanCapital, SectionCategory::Business]),
    ("segment", &[SectionCategory::Business, SectionCategory::ManagementDiscussion]),
    ("customer", &[SectionCategory::Business, SectionCategory::RiskFactors]),
    ("competit", &[SectionCategory::Business, SectionCategory::RiskFactors]),
];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "its", "per", "total", "number", "amount",
    "company", "companys", "what", "how", "much", "many", "value", "score", "rating", "level",
];

#[derive(Debug, Clone)]
pub struct Section<'a> {
    pub heading: Option<&'a str>,
    pub category: Option<SectionCategory>,
    pub lines: Vec<&'a str>,
}

impl<'a> Section<'a> {
    fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn char_len(&self) -> usize {
        // Lines plus the newlines joining them.
        self.lines.iter().map(|l| l.chars().count()).sum::<usize>() + self.lines.len().saturating_sub(1)
    }
}

fn lowercase_ascii_quotes(line: &str) -> String {
    line.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

fn category_of(line: &str) -> Option<SectionCategory> {
    let lower = lowercase_ascii_quotes(line);
    SECTION_PATTERNS
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, category)| *category)
}

pub fn is_heading(line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() || line.starts_with('|') || line.chars().count() > MAX_HEADING_CHARS {
        return false;
    }
    if ITEM_RE.is_match(line) {
        return true;
    }
    line.split_whitespace().count() <= MAX_HEADING_WORDS
        && !line.ends_with('.')
        && category_of(line).is_some()
}

/// Splits cleaned filing text at heading lines. Text before the first heading forms its own section.
pub fn split_sections(text: &str) -> Vec<Section<'_>> {
    let mut sections = Vec::new();
    let mut current = Section {
        heading: None,
        category: None,
        lines: Vec::new(),
    };

    for line in text.lines() {
        if is_heading(line) {
            if !current.lines.is_empty() {
                sections.push(current);
            }
            current = Section {
                heading: Some(line),
                category: category_of(line),
                lines: vec![line],
            };
        } else {
            current.lines.push(line);
        }
    }
    if !current.lines.is_empty() {
        sections.push(current);
    }
    sections
}

/// Distinct search terms of a feature phrase, with trailing plural `s` removed.
pub fn feature_terms(feature: &str) -> BTreeSet<String> {
    let lower = lowercase_ascii_quotes(feature).replace('\'', "");
    TERM_RE
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|term| term.len() >= 3 && !STOPWORDS.contains(term))
        .map(|term| {
            if term.len() > 4 && term.ends_with('s') && !term.ends_with("ss") {
                term[..term.len() - 1].to_string()
            } else {
                term.to_string()
            }
        })
        .collect()
}

fn hinted_categories(feature: &str) -> BTreeSet<SectionCategory> {
    let lower = lowercase_ascii_quotes(feature);
    FEATURE_HINTS
        .iter()
        .filter(|(fragment, _)| lower.contains(fragment))
        .flat_map(|(_, categories)| categories.iter().copied())
        .collect()
}

/// Relevance of a section to the feature: term hits in the body, heavier hits in the heading,
/// whole-phrase hits, and a bonus when the section kind is where the feature is usually reported.
pub fn score_section(
    section: &Section,
    feature: &str,
    terms: &BTreeSet<String>,
    hints: &BTreeSet<SectionCategory>,
) -> usize {
    let body = lowercase_ascii_quotes(&section.text());
    let heading = section.heading.map(lowercase_ascii_quotes).unwrap_or_default();
    let phrase = lowercase_ascii_quotes(feature.trim());

    let mut score = 0;
    for term in terms {
        score += body.matches(term.as_str()).count();
        score += heading.matches(term.as_str()).count() * HEADING_WEIGHT;
    }
    if phrase.contains(' ') {
        score += body.matches(phrase.as_str()).count() * PHRASE_WEIGHT;
    }
    if section.category.map_or(false, |c| hints.contains(&c)) {
        score += CATEGORY_BONUS;
    }
    score
}

pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Fits cleaned text into `max_chars`, keeping the sections most relevant to `feature`.
///
/// Returns the excerpt and whether anything was cut. Same input and feature always give the
/// same excerpt.
pub fn fit_to_budget(text: &str, feature: &str, max_chars: usize) -> (String, bool) {
    if text.chars().count() <= max_chars {
        return (text.to_string(), false);
    }

    let sections = split_sections(text);
    let terms = feature_terms(feature);
    let hints = hinted_categories(feature);
    let scores: Vec<usize> = sections
        .iter()
        .map(|s| score_section(s, feature, &terms, &hints))
        .collect();

    if scores.iter().all(|s| *s == 0) {
        log::debug!("No section matches {:?}, keeping the leading {} chars", feature, max_chars);
        return (prefix_excerpt(text, max_chars), true);
    }

    let mut ranked: Vec<usize> = (0..sections.len()).filter(|i| scores[*i] > 0).collect();
    ranked.sort_by(|a, b| scores[*b].cmp(&scores[*a]).then(a.cmp(b)));

    let separator_len = SECTION_SEPARATOR.chars().count();
    let mut remaining = max_chars;
    let mut chosen: Vec<(usize, String)> = Vec::new();
    for idx in ranked {
        let cost = if chosen.is_empty() { 0 } else { separator_len };
        if !chosen.is_empty() && remaining <= cost + MIN_PARTIAL_CHARS {
            break;
        }
        let section = &sections[idx];
        let len = section.char_len();
        if len + cost <= remaining {
            chosen.push((idx, section.text()));
            remaining -= len + cost;
        } else {
            let available = remaining - cost;
            chosen.push((idx, truncate_chars(&section.text(), available).to_string()));
            remaining = 0;
        }
    }
    chosen.sort_by_key(|(idx, _)| *idx);

    log::debug!(
        "Kept sections {:?} of {} for {:?}",
        chosen.iter().map(|(idx, _)| *idx).collect::<Vec<_>>(),
        sections.len(),
        feature
    );

    let mut excerpt = chosen
        .into_iter()
        .map(|(_, text)| text)
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR);
    excerpt.push_str(TRUNCATION_MARKER);
    (excerpt, true)
}

fn prefix_excerpt(text: &str, max_chars: usize) -> String {
    let mut excerpt = truncate_chars(text, max_chars).to_string();
    excerpt.push_str(TRUNCATION_MARKER);
    excerpt
}
