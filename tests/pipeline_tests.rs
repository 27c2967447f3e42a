mod common;

use anyfactor::core::types::{PeriodType, ProgressEvent, StreamEvent, ValueType};
use anyfactor::{PipelineError, ProgressSink};
use common::{filing, orchestrator, request, run_collecting, FakeProvider, FakeRegistry};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn progress_events(events: &[StreamEvent]) -> Vec<&ProgressEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Progress(p) => Some(p),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_single_filing_extraction() {
    let registry = Arc::new(
        FakeRegistry::new().with_filings("AAPL", vec![filing("AAPL", "10-K", "2024-11-01", 1)]),
    );
    let provider = Arc::new(FakeProvider::new(
        r#"{"value": 391000000000, "value_type": "number", "evidence": "Total net sales $391,035 million"}"#,
    ));
    let orchestrator = orchestrator(registry, provider, 4);

    let (outcome, events) = run_collecting(&orchestrator, &request(&["AAPL"], "total revenue", 1)).await;
    let summary = outcome.unwrap();

    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.failures, 0);
    let result = &summary.results[0];
    assert_eq!(result.ticker, "AAPL");
    assert_eq!(result.value, Some(391000000000.0));
    assert_eq!(result.value_type, ValueType::Number);
    assert_eq!(result.period_type, PeriodType::Annual);
    assert_eq!(result.form_type.as_deref(), Some("10-K"));
    assert!(result.error.is_none());

    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], StreamEvent::Progress(_)));
    match &events[1] {
        StreamEvent::Complete { results } => assert_eq!(results, &summary.results),
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_ticker_yields_one_error() {
    let registry = Arc::new(FakeRegistry::new());
    let provider = Arc::new(FakeProvider::new(r#"{"value": 1}"#));
    let orchestrator = orchestrator(registry.clone(), provider.clone(), 4);

    let (outcome, events) = run_collecting(&orchestrator, &request(&["ZZZZ"], "book value", 5)).await;
    let summary = outcome.unwrap();

    assert_eq!(summary.results.len(), 1);
    let result = &summary.results[0];
    assert_eq!(result.ticker, "ZZZZ");
    assert!(result.error.as_deref().unwrap().contains("ZZZZ"));
    assert_eq!(result.value, None);
    assert_eq!(registry.fetch_calls.load(Ordering::SeqCst), 0);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

    let progress = progress_events(&events);
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].filing_index, 0);
    assert_eq!(progress[0].filings_total, 0);
    assert_eq!(progress[0].tickers_completed, 1);
}

#[tokio::test]
async fn test_fetch_failure_is_isolated_to_its_filing() {
    let msft = vec![
        filing("MSFT", "10-Q", "2024-10-30", 3),
        filing("MSFT", "10-K", "2024-07-30", 2),
        filing("MSFT", "10-Q", "2024-04-25", 1),
    ];
    let broken = msft[1].document_url.clone();
    let registry = Arc::new(
        FakeRegistry::new()
            .with_filings(
                "AAPL",
                vec![
                    filing("AAPL", "10-K", "2024-11-01", 2),
                    filing("AAPL", "10-Q", "2024-08-02", 1),
                ],
            )
            .with_filings("MSFT", msft)
            .failing_document(&broken),
    );
    let provider = Arc::new(FakeProvider::new(r#"{"value": 56950000000}"#));
    let orchestrator = orchestrator(registry, provider, 3);

    let (outcome, _) = run_collecting(&orchestrator, &request(&["AAPL", "MSFT"], "book value", 5)).await;
    let summary = outcome.unwrap();

    let tickers: Vec<&str> = summary.results.iter().map(|r| r.ticker.as_str()).collect();
    assert_eq!(tickers, vec!["AAPL", "AAPL", "MSFT", "MSFT", "MSFT"]);
    assert_eq!(summary.failures, 1);

    let msft: Vec<_> = summary.results.iter().filter(|r| r.ticker == "MSFT").collect();
    let dates: Vec<String> = msft.iter().map(|r| r.filing_date.unwrap().to_string()).collect();
    assert_eq!(dates, vec!["2024-10-30", "2024-07-30", "2024-04-25"]);
    assert!(msft[0].error.is_none());
    assert!(msft[1].error.as_deref().unwrap().starts_with("Fetch failed"));
    assert_eq!(msft[1].value, None);
    assert_eq!(msft[1].filing_url.as_deref(), Some(broken.as_str()));
    assert_eq!(msft[2].value, Some(56950000000.0));
}

#[tokio::test]
async fn test_registry_outage_aborts_with_error_event() {
    let registry = Arc::new(
        FakeRegistry::new()
            .with_filings("AAPL", vec![filing("AAPL", "10-K", "2024-11-01", 1)])
            .unavailable_for("MSFT"),
    );
    let provider = Arc::new(FakeProvider::new(r#"{"value": 1}"#));
    let orchestrator = orchestrator(registry, provider, 2);

    let (outcome, events) = run_collecting(&orchestrator, &request(&["AAPL", "MSFT", "GOOG"], "book value", 2)).await;

    assert!(matches!(outcome, Err(PipelineError::RegistryUnavailable(_))));
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Complete { .. })));
    match events.last() {
        Some(StreamEvent::Error { message }) => assert!(message.contains("unavailable")),
        other => panic!("expected a terminal error event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_scores_stay_in_range() {
    let registry = Arc::new(
        FakeRegistry::new()
            .with_filings(
                "AAPL",
                vec![
                    filing("AAPL", "10-K", "2024-11-01", 2),
                    filing("AAPL", "10-Q", "2024-08-02", 1),
                ],
            ),
    );
    let provider = Arc::new(
        FakeProvider::new(r#"{"value": 6.5, "value_type": "score", "evidence": "several pending suits"}"#)
            .reply_when("2024-08-02", r#"{"value": 42, "value_type": "score"}"#),
    );
    let orchestrator = orchestrator(registry, provider.clone(), 2);

    let (outcome, _) = run_collecting(&orchestrator, &request(&["AAPL"], "litigation risk score", 5)).await;
    let summary = outcome.unwrap();

    assert_eq!(summary.results.len(), 2);
    for result in &summary.results {
        assert_eq!(result.value_type, ValueType::Score);
        if let Some(value) = result.value {
            assert!((0.0..=10.0).contains(&value));
        }
    }
    assert_eq!(summary.results[0].value, Some(6.5));
    assert_eq!(summary.results[0].evidence.as_deref(), Some("several pending suits"));
    assert!(summary.results[1].error.is_some());

    let prompts = provider.prompts.lock().unwrap();
    assert!(prompts.iter().all(|p| p.contains("litigation risk score")));
}

#[tokio::test]
async fn test_progress_is_monotonic_and_totals_reached_once() {
    let registry = Arc::new(
        FakeRegistry::new()
            .with_filings(
                "AAPL",
                vec![
                    filing("AAPL", "10-K", "2024-11-01", 3),
                    filing("AAPL", "10-Q", "2024-08-02", 2),
                    filing("AAPL", "10-Q", "2024-05-03", 1),
                ],
            )
            .with_filings("MSFT", vec![filing("MSFT", "10-K", "2024-07-30", 1)])
            .with_filings(
                "NVDA",
                vec![
                    filing("NVDA", "10-Q", "2024-11-20", 2),
                    filing("NVDA", "10-Q", "2024-08-28", 1),
                ],
            ),
    );
    let provider = Arc::new(
        FakeProvider::new(r#"{"value": 10}"#)
            .delay_when("2024-11-01", Duration::from_millis(40))
            .delay_when("2024-07-30", Duration::from_millis(20)),
    );
    let orchestrator = orchestrator(registry, provider, 2);

    let (outcome, events) = run_collecting(
        &orchestrator,
        &request(&["AAPL", "ZZZZ", "MSFT", "NVDA"], "number of employees", 5),
    )
    .await;
    let summary = outcome.unwrap();
    assert_eq!(summary.results.len(), 7);

    let progress = progress_events(&events);
    assert_eq!(progress.len(), 7);
    for pair in progress.windows(2) {
        assert!(pair[1].tickers_completed >= pair[0].tickers_completed);
        assert!(pair[1].filings_completed >= pair[0].filings_completed);
    }
    let at_totals: Vec<_> = progress
        .iter()
        .filter(|p| p.tickers_completed == 4 && p.filings_completed == 6)
        .collect();
    assert_eq!(at_totals.len(), 1);
    let last = progress.last().unwrap();
    assert_eq!((last.tickers_completed, last.filings_completed), (4, 6));
    assert!(matches!(events.last(), Some(StreamEvent::Complete { .. })));
    assert!(progress.iter().all(|p| p.tickers_total == 4));

    // Final ordering follows submission order, whatever the completion order was.
    let order: Vec<(String, Option<String>)> = summary
        .results
        .iter()
        .map(|r| (r.ticker.clone(), r.filing_date.map(|d| d.to_string())))
        .collect();
    assert_eq!(
        order,
        vec![
            ("AAPL".to_string(), Some("2024-11-01".to_string())),
            ("AAPL".to_string(), Some("2024-08-02".to_string())),
            ("AAPL".to_string(), Some("2024-05-03".to_string())),
            ("ZZZZ".to_string(), None),
            ("MSFT".to_string(), Some("2024-07-30".to_string())),
            ("NVDA".to_string(), Some("2024-11-20".to_string())),
            ("NVDA".to_string(), Some("2024-08-28".to_string())),
        ]
    );
}

#[tokio::test]
async fn test_result_count_bounds_and_membership() {
    let registry = Arc::new(
        FakeRegistry::new()
            .with_filings(
                "AAPL",
                (1..=6)
                    .map(|i| filing("AAPL", "10-Q", &format!("2024-0{}-01", 7 - i), i))
                    .collect(),
            )
            .with_filings("TSLA", vec![filing("TSLA", "8-K", "2024-10-23", 1)]),
    );
    let provider = Arc::new(FakeProvider::new("null"));
    let orchestrator = orchestrator(registry, provider, 4);

    let req = request(&["aapl", "TSLA", "ZZZZ", "AAPL"], "free cash flow", 3);
    assert_eq!(req.tickers.len(), 3);
    let (outcome, _) = run_collecting(&orchestrator, &req).await;
    let summary = outcome.unwrap();

    let requested: HashSet<&str> = ["AAPL", "TSLA", "ZZZZ"].into_iter().collect();
    assert!(summary.results.len() >= 3);
    assert!(summary.results.len() <= 3 * req.limit);
    assert_eq!(summary.results.iter().filter(|r| r.ticker == "AAPL").count(), 3);
    for result in &summary.results {
        assert!(requested.contains(result.ticker.as_str()));
        if result.error.is_some() {
            assert_eq!(result.value, None);
        }
    }

    // The 8-K is not a default form, so TSLA reports a ticker-level error.
    let tsla: Vec<_> = summary.results.iter().filter(|r| r.ticker == "TSLA").collect();
    assert_eq!(tsla.len(), 1);
    assert!(tsla[0].error.as_deref().unwrap().contains("No matching filings"));

    // A "null" reply is a successful extraction of nothing.
    let aapl = summary.results.iter().find(|r| r.ticker == "AAPL").unwrap();
    assert_eq!(aapl.value, None);
    assert!(aapl.error.is_none());
}

#[tokio::test]
async fn test_cancelled_run_emits_no_completion() {
    let registry = Arc::new(
        FakeRegistry::new().with_filings("AAPL", vec![filing("AAPL", "10-K", "2024-11-01", 1)]),
    );
    let provider = Arc::new(FakeProvider::new(r#"{"value": 1}"#));
    let orchestrator = orchestrator(registry.clone(), provider.clone(), 1);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let (sink, mut rx) = ProgressSink::channel(16, cancel);
    let outcome = orchestrator.run(&request(&["AAPL"], "book value", 1), &sink).await;
    drop(sink);

    assert!(matches!(outcome, Err(PipelineError::Cancelled)));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Complete { .. })));
}

#[tokio::test]
async fn test_disconnected_consumer_cancels_remaining_work() {
    let filings = (1..=6)
        .map(|i| filing("AAPL", "10-Q", &format!("2024-0{}-01", 7 - i), i))
        .collect();
    let registry = Arc::new(FakeRegistry::new().with_filings("AAPL", filings));
    let provider = Arc::new(FakeProvider::new(r#"{"value": 1}"#).delay_when("AAPL", Duration::from_millis(20)));
    let orchestrator = orchestrator(registry, provider.clone(), 1);

    let cancel = CancellationToken::new();
    let (sink, mut rx) = ProgressSink::channel(1, cancel.clone());
    let reader = tokio::spawn(async move {
        // Read one event, then hang up.
        rx.recv().await
    });
    let outcome = orchestrator.run(&request(&["AAPL"], "book value", 6), &sink).await;

    assert!(reader.await.unwrap().is_some());
    assert!(matches!(outcome, Err(PipelineError::Cancelled)));
    assert!(cancel.is_cancelled());
    assert!(provider.calls.load(Ordering::SeqCst) < 6);
}

#[tokio::test]
async fn test_panicking_unit_still_reports_its_filing() {
    let aapl = vec![
        filing("AAPL", "10-K", "2024-11-01", 2),
        filing("AAPL", "10-Q", "2024-08-02", 1),
    ];
    let broken = aapl[1].document_url.clone();
    let registry = Arc::new(
        FakeRegistry::new()
            .with_filings("AAPL", aapl)
            .panicking_document(&broken),
    );
    let provider = Arc::new(FakeProvider::new(r#"{"value": 74100000000}"#));
    let orchestrator = orchestrator(registry, provider, 2);

    let (outcome, events) = run_collecting(&orchestrator, &request(&["AAPL"], "book value", 2)).await;
    let summary = outcome.unwrap();

    assert_eq!(summary.results.len(), 2);
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.results[0].value, Some(74100000000.0));
    let failed = &summary.results[1];
    assert_eq!(failed.filing_url.as_deref(), Some(broken.as_str()));
    assert_eq!(failed.value, None);
    let error = failed.error.as_deref().unwrap();
    assert!(error.starts_with("Unit aborted"));
    assert!(error.contains("decoder blew up"));

    let progress = progress_events(&events);
    let last = progress.last().unwrap();
    assert_eq!((last.tickers_completed, last.filings_completed), (1, 2));
    match events.last() {
        Some(StreamEvent::Complete { results }) => assert_eq!(results.len(), 2),
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_consumer_leaving_interrupts_in_flight_extraction() {
    let registry = Arc::new(
        FakeRegistry::new().with_filings("AAPL", vec![filing("AAPL", "10-K", "2024-11-01", 1)]),
    );
    let provider = Arc::new(FakeProvider::new(r#"{"value": 1}"#).delay_when("AAPL", Duration::from_secs(600)));
    let orchestrator = orchestrator(registry, provider.clone(), 1);

    let cancel = CancellationToken::new();
    let (sink, rx) = ProgressSink::channel(4, cancel.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(rx);
    });

    let started = tokio::time::Instant::now();
    let outcome = orchestrator.run(&request(&["AAPL"], "book value", 1), &sink).await;

    assert!(matches!(outcome, Err(PipelineError::Cancelled)));
    assert!(cancel.is_cancelled());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}
