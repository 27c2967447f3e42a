use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::core::types::ProgressEvent;

const RUNNING_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tickers {msg}";
const DONE_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} tickers {msg}";

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// Terminal progress bar driven by pipeline progress events. Hidden when disabled.
#[derive(Clone)]
pub struct ProgressTracker {
    progress_bar: Option<ProgressBar>,
}

impl ProgressTracker {
    pub fn new(tickers_total: usize, enabled: bool) -> Self {
        let progress_bar = enabled.then(|| {
            let pb = ProgressBar::new(tickers_total as u64);
            pb.set_style(style(RUNNING_TEMPLATE));
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        });
        Self { progress_bar }
    }

    pub fn update(&self, event: &ProgressEvent) {
        if let Some(pb) = &self.progress_bar {
            pb.set_length(event.tickers_total as u64);
            pb.set_position(event.tickers_completed as u64);
            pb.set_message(format!(
                "({} filings) {}",
                event.filings_completed, event.message
            ));
        }
    }

    pub fn finish(&self, message: &str) {
        if let Some(pb) = &self.progress_bar {
            pb.set_style(style(DONE_TEMPLATE));
            pb.finish_with_message(message.to_string());
        }
    }

    pub fn abandon(&self, message: &str) {
        if let Some(pb) = &self.progress_bar {
            pb.abandon_with_message(message.to_string());
        }
    }

    /// Prints a line above the bar without tearing it.
    pub fn println(&self, line: &str) {
        match &self.progress_bar {
            Some(pb) => pb.println(line),
            None => eprintln!("{}", line),
        }
    }
}
