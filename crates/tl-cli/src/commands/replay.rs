use std::path::Path;

use anyhow::Context;
use tl_bridge::protocol::InboundEvent;
use tl_bridge::reconcile::{ApplyOutcome, TaskView};
use tl_core::config::Config;
use tl_core::types::{MessageData, Task};

/// Counters for one replay.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub events: usize,
    pub applied: usize,
    pub ignored: usize,
    pub unparsable: usize,
}

/// Apply every event in `input` (one JSON object per line) to `view`.
///
/// Blank lines and lines starting with `#` are skipped. Lines that are not
/// inbound events are counted and logged, never fatal.
pub fn replay_lines(view: &mut TaskView, input: &str) -> ReplayStats {
    let mut stats = ReplayStats::default();
    for (lineno, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: InboundEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(line = lineno + 1, error = %e, "skipping unparsable line");
                stats.unparsable += 1;
                continue;
            }
        };
        stats.events += 1;
        match view.apply(&event) {
            ApplyOutcome::Ignored(reason) => {
                tracing::debug!(line = lineno + 1, ?reason, "event ignored");
                stats.ignored += 1;
            }
            _ => stats.applied += 1,
        }
    }
    stats
}

/// Run the `replay` subcommand.
pub fn run(config: &Config, file: &Path, task_id: &str, json: bool) -> anyhow::Result<()> {
    let input = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let mut view = TaskView::from_config(Task::with_id(task_id, task_id), &config.reconcile);
    let stats = replay_lines(&mut view, &input);

    if json {
        println!("{}", serde_json::to_string_pretty(&view.snapshot())?);
        return Ok(());
    }

    let task = view.task();
    println!(
        "task {}  [{}] {}",
        task.id,
        task.status.glyph(),
        task.status_message.as_deref().unwrap_or(task.status.as_str())
    );
    println!(
        "events: {} applied, {} ignored, {} unparsable",
        stats.applied, stats.ignored, stats.unparsable
    );

    println!("\nmessages ({}):", task.messages.len());
    for msg in task.messages.iter() {
        println!("  {:?} [{}] {}", msg.role, msg.message_type, msg.text());
    }

    let in_flight = view.in_flight();
    if !in_flight.is_empty() {
        println!("\nopen streams ({}):", in_flight.len());
        for (stream_id, msg) in in_flight.iter() {
            println!("  {stream_id}{}: {}", chunk_progress(&msg.data), msg.text());
        }
    }

    Ok(())
}

/// `" (chunk 2/5)"` style suffix; indices on the wire are zero-based.
fn chunk_progress(data: &MessageData) -> String {
    match (data.chunk_index, data.total_chunks) {
        (Some(i), Some(n)) => format!(" (chunk {}/{})", i.saturating_add(1), n),
        (Some(i), None) => format!(" (chunk {})", i.saturating_add(1)),
        _ => String::new(),
    }
}
