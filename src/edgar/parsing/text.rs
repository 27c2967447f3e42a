use html_escape::decode_html_entities;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use unicode_normalization::UnicodeNormalization;

static MARKUP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<(html|body|div|p|table|font|span|document)[\s>]").unwrap()
});
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\f\v\u{a0}]+").unwrap());

/// Subtrees that never carry narrative or tabular text.
const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "head", "title", "meta", "link", "noscript", "nav", "header", "footer",
    "ix:header", "svg", "img",
];

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "section",
    "article", "blockquote", "pre", "hr", "center", "dt", "dd", "body", "document", "text",
];

const SNIFF_LEN: usize = 4096;

pub fn looks_like_html(text: &str, content_type: Option<&str>) -> bool {
    if let Some(ct) = content_type {
        let ct = ct.to_ascii_lowercase();
        if ct.contains("html") || ct.contains("xml") {
            return true;
        }
    }
    MARKUP_RE.is_match(head(text, SNIFF_LEN))
}

/// PDFs and binary blobs occasionally sit behind a primary-document link.
pub fn non_textual_reason(text: &str) -> Option<String> {
    let sample = head(text, SNIFF_LEN);
    if sample.trim_start().starts_with("%PDF") {
        return Some("PDF payload".to_string());
    }

    let total = sample.chars().count();
    if total == 0 {
        return None;
    }
    let control = sample
        .chars()
        .filter(|c| (c.is_control() && !matches!(c, '\n' | '\r' | '\t')) || *c == '\u{FFFD}')
        .count();
    if control * 10 > total {
        return Some(format!(
            "{} of {} leading characters are control bytes",
            control, total
        ));
    }
    None
}

/// Converts an HTML filing into plain lines, with tables flattened into pipe-delimited rows.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = TextBuilder::default();
    walk(document.root_element(), &mut out);
    finish(&out.buffer)
}

/// Normalizes whitespace and Unicode of a document that carries no markup.
pub fn plain_text(text: &str) -> String {
    finish(&decode_html_entities(text))
}

fn head(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Default)]
struct TextBuilder {
    buffer: String,
}

impl TextBuilder {
    /// Whitespace inside inline text, line breaks included, collapses to one space.
    fn push_text(&mut self, text: &str) {
        for c in text.chars() {
            if c.is_whitespace() && c != '\u{a0}' {
                if !self.buffer.is_empty() && !self.buffer.ends_with([' ', '\n']) {
                    self.buffer.push(' ');
                }
            } else {
                self.buffer.push(c);
            }
        }
    }

    fn newline(&mut self) {
        if !self.buffer.ends_with('\n') {
            self.buffer.push('\n');
        }
    }

    fn push_block(&mut self, block: &str) {
        self.newline();
        self.buffer.push_str(block);
        self.newline();
    }
}

fn is_hidden(element: &scraper::node::Element) -> bool {
    element
        .attr("style")
        .map(|style| {
            style
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_ascii_lowercase()
                .contains("display:none")
        })
        .unwrap_or(false)
}

fn is_skipped(element: &scraper::node::Element) -> bool {
    SKIPPED_ELEMENTS.contains(&element.name()) || is_hidden(element)
}

fn visible_children<'a>(element: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    element
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| !is_skipped(child.value()))
}

fn walk(element: ElementRef, out: &mut TextBuilder) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_text(&text.text),
            Node::Element(el) => {
                let name = el.name();
                if is_skipped(el) {
                    continue;
                }
                let Some(child_element) = ElementRef::wrap(child) else {
                    continue;
                };
                if name == "table" {
                    out.push_block(&table_to_markdown(child_element));
                    continue;
                }
                let block = BLOCK_ELEMENTS.contains(&name);
                if block {
                    out.newline();
                }
                walk(child_element, out);
                if block {
                    out.newline();
                }
            }
            _ => {}
        }
    }
}

/// Rows owned by this table; rows of tables nested in its cells stay inside their cell.
fn table_rows(table: ElementRef) -> Vec<ElementRef> {
    let mut rows = Vec::new();
    for child in visible_children(table) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => {
                rows.extend(visible_children(child).filter(|row| row.value().name() == "tr"))
            }
            _ => {}
        }
    }
    rows
}

fn cell_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(&text.text);
                out.push(' ');
            }
            Node::Element(el) if !is_skipped(el) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    cell_text(child_element, out);
                }
            }
            _ => {}
        }
    }
}

fn table_to_markdown(table: ElementRef) -> String {
    let rows: Vec<Vec<String>> = table_rows(table)
        .into_iter()
        .map(|tr| {
            merge_cells(
                visible_children(tr)
                    .filter(|cell| matches!(cell.value().name(), "td" | "th"))
                    .map(|cell| {
                        let mut text = String::new();
                        cell_text(cell, &mut text);
                        clean_cell(&text)
                    }),
            )
        })
        .filter(|cells| !cells.is_empty())
        .collect();

    // Layout tables wrap a single cell per row; those read better as plain lines.
    if rows.iter().all(|cells| cells.len() <= 1) {
        return rows
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n");
    }

    let mut lines: Vec<String> = rows
        .iter()
        .map(|cells| format!("| {} |", cells.join(" | ")))
        .collect();
    if lines.len() > 1 {
        let columns = rows[0].len();
        lines.insert(1, format!("| {} |", vec!["---"; columns].join(" | ")));
    }
    lines.join("\n")
}

fn clean_cell(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "/")
}

/// Drops spacer cells and glues currency and sign fragments onto the value they belong to.
fn merge_cells(cells: impl Iterator<Item = String>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    let mut prefix: Option<String> = None;

    for cell in cells {
        let cell = cell.trim();
        if cell.is_empty() {
            continue;
        }
        if matches!(cell, "$" | "€" | "£" | "¥" | "(" | "$(") {
            prefix = Some(prefix.take().unwrap_or_default() + cell);
            continue;
        }
        if matches!(cell, ")" | "%" | ")%" | "%)") {
            if let Some(last) = merged.last_mut() {
                last.push_str(cell);
                continue;
            }
        }
        match prefix.take() {
            Some(p) => merged.push(format!("{}{}", p, cell)),
            None => merged.push(cell.to_string()),
        }
    }
    if let Some(p) = prefix {
        merged.push(p);
    }
    merged
}

fn finish(raw: &str) -> String {
    let text = raw.nfkc().collect::<String>();
    text.lines()
        .map(|line| WHITESPACE_RE.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
