//! Batch progress reporting.
//!
//! Reports per-item progress during `litrev index`, `litrev query run` and
//! `litrev project run` so users see how much of a long batch is left.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use litreview_core::engine::{BatchEvent, BatchReporter, NoReport};

/// Human-friendly progress on stderr: "query design  1,234 / 5,000 items".
pub struct StderrProgress;

impl StderrProgress {
    fn line(event: &BatchEvent) -> String {
        match event {
            BatchEvent::Started { label, total } => {
                format!("{}  {} items\n", label, format_number(*total as u64))
            }
            BatchEvent::Item { label, n, total, .. } => format!(
                "{}  {} / {} items\n",
                label,
                format_number(*n as u64),
                format_number(*total as u64)
            ),
            BatchEvent::Finished {
                label,
                done,
                skipped,
            } => format!(
                "{}  done: {}, skipped: {}\n",
                label,
                format_number(*done as u64),
                format_number(*skipped as u64)
            ),
        }
    }
}

impl BatchReporter for StderrProgress {
    fn report(&self, event: BatchEvent) {
        let line = Self::line(&event);
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn object(event: &BatchEvent) -> serde_json::Value {
        match event {
            BatchEvent::Started { label, total } => serde_json::json!({
                "event": "started",
                "batch": label,
                "total": total
            }),
            BatchEvent::Item {
                label,
                n,
                total,
                item_key,
                outcome,
            } => serde_json::json!({
                "event": "progress",
                "batch": label,
                "n": n,
                "total": total,
                "item_key": item_key,
                "outcome": outcome
            }),
            BatchEvent::Finished {
                label,
                done,
                skipped,
            } => serde_json::json!({
                "event": "finished",
                "batch": label,
                "done": done,
                "skipped": skipped
            }),
        }
    }
}

impl BatchReporter for JsonProgress {
    fn report(&self, event: BatchEvent) {
        if let Ok(line) = serde_json::to_string(&Self::object(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn BatchReporter> {
        match self {
            ProgressMode::Off => Box::new(NoReport),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
