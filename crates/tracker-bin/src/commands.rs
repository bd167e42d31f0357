//! Subcommand implementations.

use anyhow::Context;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracker_config_and_utils::{Config, Paths};
use tracker_emitter::{CycleResult, CycleStop, Emitter, EventPayload, EventStore};

/// Parse one JSON object per item, skipping blank items.
pub fn parse_events<'a>(
    items: impl IntoIterator<Item = &'a str>,
) -> anyhow::Result<Vec<EventPayload>> {
    items
        .into_iter()
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .enumerate()
        .map(|(index, item)| {
            let value: serde_json::Value = serde_json::from_str(item)
                .with_context(|| format!("event {} is not valid JSON", index + 1))?;
            EventPayload::from_json(value)
                .with_context(|| format!("event {} is not a flat JSON object", index + 1))
        })
        .collect()
}

/// Read JSON lines from `reader`.
pub fn read_events(reader: impl BufRead) -> anyhow::Result<Vec<EventPayload>> {
    let lines = reader
        .lines()
        .collect::<Result<Vec<_>, _>>()
        .context("failed to read events from stdin")?;
    parse_events(lines.iter().map(String::as_str))
}

fn emitter(config: &Config, paths: &Paths) -> anyhow::Result<(Emitter, Arc<dyn EventStore>)> {
    let store: Arc<dyn EventStore> = Arc::new(config.open_store(paths)?);
    let emitter = Emitter::with_http(config.emitter_config()?, store.clone())?;
    Ok((emitter, store))
}

pub async fn track(
    config: &Config,
    paths: &Paths,
    payloads: Vec<EventPayload>,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let (emitter, store) = emitter(config, paths)?;
    // Persist everything before the driver starts sending.
    emitter.pause();
    emitter.start()?;

    let mut stored = 0usize;
    for payload in payloads {
        if emitter.add(payload)?.id().is_some() {
            stored += 1;
        }
    }
    info!(stored, "Events queued");
    println!("queued {} event(s)", stored);

    emitter.resume();
    let result = emitter
        .shutdown(Duration::from_secs(timeout_secs))
        .await
        .context("delivery did not finish in time; events stay queued")?;
    print_result(&result, store.count()?);
    Ok(())
}

pub async fn flush(config: &Config, paths: &Paths, timeout_secs: u64) -> anyhow::Result<()> {
    let (emitter, store) = emitter(config, paths)?;
    emitter.start()?;

    let result = emitter
        .shutdown(Duration::from_secs(timeout_secs))
        .await
        .context("delivery did not finish in time; events stay queued")?;
    print_result(&result, store.count()?);
    Ok(())
}

pub fn status(config: &Config, paths: &Paths) -> anyhow::Result<()> {
    let store = config.open_store(paths)?;
    let pending = store.count()?;

    println!("endpoint: {} ({})", config.endpoint, config.method);
    println!("pending:  {}", pending);
    if let Some(oldest) = store.query(1)?.first() {
        println!("oldest:   #{} queued at {}", oldest.id, oldest.created_at.to_rfc3339());
    }
    Ok(())
}

fn print_result(result: &CycleResult, pending: usize) {
    let outcome = match result.stop {
        CycleStop::Drained => "queue drained",
        CycleStop::Paused => "paused",
        CycleStop::RetryableFailure { rate_limited: true } => "collector rate limited, will retry",
        CycleStop::RetryableFailure { .. } => "delivery failed, will retry",
        CycleStop::StoreUnavailable => "event store unavailable",
    };
    println!(
        "sent {}, dropped {}, pending {}: {}",
        result.sent_count, result.dropped_count, pending, outcome
    );
}
