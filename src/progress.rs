//! Import progress reporting.
//!
//! Imports run for minutes on the full catalogs, so the pipeline emits
//! observable progress: which sheet is being worked, how far along the
//! run is, and the closing summary. Progress goes to **stderr** so
//! stdout stays parseable for scripts; the HTTP path routes the same
//! events into the durable job row instead.

use std::io::Write;

/// A single progress event: percentage (0-100) plus a human message.
#[derive(Clone, Debug)]
pub struct ProgressEvent {
    pub percent: u8,
    pub message: String,
}

/// Receives progress events from the import pipeline.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "import  42%  Processando aba CCD".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = format!("import  {:>3}%  {}\n", event.percent, event.message);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "percent": event.percent,
            "message": event.message,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
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

    /// Build a reporter for this mode. Caller passes it to the import.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Captures events for assertions.
    pub struct CaptureProgress(pub Arc<Mutex<Vec<ProgressEvent>>>);

    impl ProgressReporter for CaptureProgress {
        fn report(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn capture_reporter_records_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let reporter = CaptureProgress(events.clone());
        reporter.report(ProgressEvent {
            percent: 10,
            message: "lendo arquivo".into(),
        });
        assert_eq!(events.lock().unwrap().len(), 1);
    }
}
