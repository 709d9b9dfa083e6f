//! Scan progress reporting.
//!
//! Reports observable progress during `clausemap scan` and `clausemap rescan`
//! so users see which folder is being walked and how many files are left.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::sync::Arc;

/// A single progress event for a scan.
#[derive(Clone, Debug, PartialEq)]
pub enum ScanProgressEvent {
    /// Walking the folder tree. Total unknown.
    Discovering { folder: String },
    /// Files extracted and scored so far.
    Analyzing { n: u64, total: u64 },
    /// Files committed to the store so far.
    Reconciling { n: u64, total: u64 },
}

/// Reports scan progress. Implementations write to stderr (human or JSON).
pub trait ScanProgressReporter: Send + Sync {
    fn report(&self, event: ScanProgressEvent);
}

/// Human-friendly progress on stderr: "scan  analyzing  1,234 / 5,000 files".
pub struct StderrProgress;

impl ScanProgressReporter for StderrProgress {
    fn report(&self, event: ScanProgressEvent) {
        let line = match &event {
            ScanProgressEvent::Discovering { folder } => {
                format!("scan {}  discovering...\n", folder)
            }
            ScanProgressEvent::Analyzing { n, total } => format!(
                "scan  analyzing  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
            ScanProgressEvent::Reconciling { n, total } => format!(
                "scan  reconciling  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ScanProgressReporter for JsonProgress {
    fn report(&self, event: ScanProgressEvent) {
        let obj = match &event {
            ScanProgressEvent::Discovering { folder } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "folder": folder
            }),
            ScanProgressEvent::Analyzing { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "analyzing",
                "n": n,
                "total": total
            }),
            ScanProgressEvent::Reconciling { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "reconciling",
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

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ScanProgressReporter for NoProgress {
    fn report(&self, _event: ScanProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
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

    /// Parses `auto`, `human`, `json`, or `off`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(Self::default_for_tty()),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            "off" => Some(ProgressMode::Off),
            _ => None,
        }
    }

    /// Build a reporter for this mode. Shared with spawned scan tasks.
    pub fn reporter(&self) -> Arc<dyn ScanProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn parse_modes() {
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("off"), Some(ProgressMode::Off));
        assert_eq!(ProgressMode::parse("human"), Some(ProgressMode::Human));
        assert!(ProgressMode::parse("auto").is_some());
        assert_eq!(ProgressMode::parse("verbose"), None);
    }
}
