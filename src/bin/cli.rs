use anyfactor::{
    core::config::ExtractorConfig,
    edgar::report::ReportType,
    ExtractRequest, ExtractionResult, Orchestrator, ProgressSink, ProgressTracker, StreamEvent,
};
use anyhow::{anyhow, Result};
use colored::*;
use std::str::FromStr;
use structopt::StructOpt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "anyfactor-cli",
    about = "Extract a named feature from recent SEC filings with an LLM"
)]
struct Opt {
    /// Feature to extract, in your own words (e.g. "book value", "litigation risk score")
    #[structopt(short, long)]
    feature: String,

    /// Filings considered per ticker (1-20)
    #[structopt(short, long, default_value = "5")]
    limit: usize,

    /// Comma-separated form types to consider
    #[structopt(long, default_value = "10-K,10-Q")]
    forms: String,

    /// Print the raw NDJSON event stream instead of a table
    #[structopt(long)]
    json: bool,

    /// Ticker symbols, in the order results should be reported
    #[structopt(required = true)]
    tickers: Vec<String>,
}

fn parse_forms(raw: &str) -> Result<Vec<ReportType>> {
    let forms = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            ReportType::from_str(s).map_err(|e| anyhow!("{} (known forms: {})", e, ReportType::list_types()))
        })
        .collect::<Result<Vec<_>>>()?;
    if forms.is_empty() {
        return Err(anyhow!("at least one form type is required"));
    }
    Ok(forms)
}

fn format_value(result: &ExtractionResult) -> ColoredString {
    match (&result.error, result.value) {
        (Some(_), _) => "error".red(),
        (None, Some(value)) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{}", value as i64).green()
        }
        (None, Some(value)) => format!("{}", value).green(),
        (None, None) => "n/a".yellow(),
    }
}

fn print_table(results: &[ExtractionResult]) {
    println!(
        "\n{:<8} {:<8} {:<11} {:<10} {:>20}  {}",
        "TICKER".bold(),
        "FORM".bold(),
        "FILED".bold(),
        "PERIOD".bold(),
        "VALUE".bold(),
        "DETAIL".bold()
    );
    for result in results {
        let detail = result
            .error
            .clone()
            .or_else(|| result.evidence.clone())
            .unwrap_or_default();
        let detail: String = detail.chars().take(80).collect();
        println!(
            "{:<8} {:<8} {:<11} {:<10} {:>20}  {}",
            result.ticker.cyan(),
            result.form_type.as_deref().unwrap_or("-"),
            result
                .filing_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
            result.period_type.to_string(),
            format_value(result),
            if result.is_error() {
                detail.red()
            } else {
                detail.normal()
            }
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let opt = Opt::from_args();
    let request = ExtractRequest::new(opt.tickers.clone(), &opt.feature, opt.limit)?;
    let config = ExtractorConfig::from_env()?;

    let report_types = parse_forms(&opt.forms)?;
    let orchestrator = Orchestrator::from_config(&config)?.with_report_types(report_types);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("{}", "\nInterrupted, cancelling...".yellow());
        on_interrupt.cancel();
    })?;

    let (sink, mut rx) = ProgressSink::channel(anyfactor::pipeline::progress::DEFAULT_CAPACITY, cancel);
    let tracker = ProgressTracker::new(request.tickers.len(), !opt.json);
    let json = opt.json;

    let printer = tokio::spawn(async move {
        let mut results = None;
        while let Some(event) = rx.recv().await {
            if json {
                print!("{}", event.to_ndjson().unwrap_or_default());
                continue;
            }
            match event {
                StreamEvent::Progress(progress) => tracker.update(&progress),
                StreamEvent::Complete { results: done } => {
                    tracker.finish("done");
                    results = Some(done);
                }
                StreamEvent::Error { message } => {
                    tracker.abandon(&message);
                    tracker.println(&format!("{} {}", "error:".red().bold(), message));
                }
            }
        }
        results
    });

    let outcome = orchestrator.run(&request, &sink).await;
    drop(sink);
    let results = printer.await?;

    if let Some(results) = results {
        print_table(&results);
    }
    outcome.map(|_| ()).map_err(Into::into)
}
