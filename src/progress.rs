//! Ingest progress reporting.
//!
//! Loading and embedding a mailbox can take minutes, so `eqa ingest` reports
//! how far along each user is. Progress goes to **stderr** so the summary
//! on stdout stays parseable.

use std::io::{IsTerminal, Write};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestProgressEvent {
    /// `n` of `total` files loaded for `user`.
    Loading { user: String, n: u64, total: u64 },
    /// `n` of `total` chunks embedded for `user`.
    Embedding { user: String, n: u64, total: u64 },
}

pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// "ingest Ken  embedding  1,234 / 5,000 chunks"
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Loading { user, n, total } => format!(
                "ingest {}  loading  {} / {} files\n",
                user,
                format_number(*n),
                format_number(*total)
            ),
            IngestProgressEvent::Embedding { user, n, total } => format!(
                "ingest {}  embedding  {} / {} chunks\n",
                user,
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Loading { user, n, total } => serde_json::json!({
                "event": "progress",
                "user": user,
                "phase": "loading",
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Embedding { user, n, total } => serde_json::json!({
                "event": "progress",
                "user": user,
                "phase": "embedding",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a terminal, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
