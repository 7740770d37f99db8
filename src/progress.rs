//! Document ingestion progress reporting.
//!
//! Reports observable progress while a document moves through classification, chunking,
//! extraction, and embedding. Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;

/// A single progress event for one document's ingestion.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    Classifying { document_id: String },
    Chunking { document_id: String, n: usize },
    Extracting { document_id: String, n: usize, total: usize },
    Embedding { document_id: String, n: usize, total: usize },
    Done { document_id: String, status: crate::models::DocumentStatus },
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest doc-123  embedding  12 / 40 chunks".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Classifying { document_id } => {
                format!("ingest {document_id}  classifying...\n")
            }
            IngestProgressEvent::Chunking { document_id, n } => {
                format!("ingest {document_id}  chunking  {} chunks\n", format_number(*n as u64))
            }
            IngestProgressEvent::Extracting { document_id, n, total } => {
                format!(
                    "ingest {document_id}  extracting  {} / {} chunks\n",
                    format_number(*n as u64),
                    format_number(*total as u64)
                )
            }
            IngestProgressEvent::Embedding { document_id, n, total } => {
                format!(
                    "ingest {document_id}  embedding  {} / {} chunks\n",
                    format_number(*n as u64),
                    format_number(*total as u64)
                )
            }
            IngestProgressEvent::Done { document_id, status } => {
                format!("ingest {document_id}  done  {status}\n")
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Classifying { document_id } => serde_json::json!({
                "event": "progress", "document_id": document_id, "phase": "classifying"
            }),
            IngestProgressEvent::Chunking { document_id, n } => serde_json::json!({
                "event": "progress", "document_id": document_id, "phase": "chunking", "n": n
            }),
            IngestProgressEvent::Extracting { document_id, n, total } => serde_json::json!({
                "event": "progress", "document_id": document_id, "phase": "extracting", "n": n, "total": total
            }),
            IngestProgressEvent::Embedding { document_id, n, total } => serde_json::json!({
                "event": "progress", "document_id": document_id, "phase": "embedding", "n": n, "total": total
            }),
            IngestProgressEvent::Done { document_id, status } => serde_json::json!({
                "event": "progress", "document_id": document_id, "phase": "done", "status": status.to_string()
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
