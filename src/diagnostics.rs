//! Non-fatal diagnostics surfaced to the user
//!
//! Worker jobs that fail are reported here instead of taking the viewer down.
//! The host decides how a [`DiagnosticReport`] is shown; the default sink logs it.

use std::any::Any;
use std::backtrace::Backtrace;

use chrono::{DateTime, Local};
use parking_lot::Mutex;

/// A user visible error report
#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    pub title: String,
    pub message: String,
    pub trace: String,
    pub timestamp: DateTime<Local>,
}

impl DiagnosticReport {
    pub fn new(title: impl Into<String>, message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            trace: trace.into(),
            timestamp: Local::now(),
        }
    }

    /// Build a report from a caught panic payload
    pub fn from_panic(title: impl Into<String>, context: &str, payload: &(dyn Any + Send)) -> Self {
        let message = format!("{}: {}", context, panic_message(payload));
        Self::new(title, message, Backtrace::force_capture().to_string())
    }
}

/// Extract the message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic message".to_string()
    }
}

/// Receives diagnostics from any thread
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, report: DiagnosticReport);
}

/// Writes reports to the log
#[derive(Debug, Default)]
pub struct LogDiagnosticSink;

impl DiagnosticSink for LogDiagnosticSink {
    fn report(&self, report: DiagnosticReport) {
        log::error!(
            "[{}] {}: {}\n{}",
            report.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            report.title,
            report.message,
            report.trace
        );
    }
}

/// Keeps every report so it can be inspected later
#[derive(Debug, Default)]
pub struct CollectingDiagnosticSink {
    reports: Mutex<Vec<DiagnosticReport>>,
}

impl CollectingDiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }

    /// Remove and return all collected reports
    pub fn take(&self) -> Vec<DiagnosticReport> {
        std::mem::take(&mut *self.reports.lock())
    }
}

impl DiagnosticSink for CollectingDiagnosticSink {
    fn report(&self, report: DiagnosticReport) {
        log::warn!("[CollectingDiagnosticSink] {}: {}", report.title, report.message);
        self.reports.lock().push(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload = std::panic::catch_unwind(|| panic!("chunk {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "chunk 7");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic message");
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingDiagnosticSink::new();
        sink.report(DiagnosticReport::new("title", "message", "trace"));
        assert_eq!(sink.len(), 1);

        let reports = sink.take();
        assert_eq!(reports[0].title, "title");
        assert!(sink.is_empty());
    }
}
