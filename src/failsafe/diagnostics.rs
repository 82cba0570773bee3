use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// Raw diagnostic channel of last resort.
///
/// Emitting can never fail from the caller's point of view: implementations
/// swallow their own I/O errors. The failsafe responder only ever writes here
/// once everything else has failed.
pub trait RawErrorSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// Writes straight to the process standard-error stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl RawErrorSink for StderrSink {
    fn emit(&self, line: &str) {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = writeln!(handle, "{line}");
        let _ = handle.flush();
    }
}

/// Keeps every emitted line in memory.
#[derive(Debug, Default)]
pub struct CapturedSink {
    lines: Mutex<Vec<String>>,
}

impl CapturedSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// All captured output joined with newlines.
    #[must_use]
    pub fn contents(&self) -> String {
        self.lines().join("\n")
    }
}

impl RawErrorSink for CapturedSink {
    fn emit(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}
