//! Append-only log sink injected into the engine
//!
//! The host application decides where engine messages end up (a log file
//! shown by a UI, a journal, a test buffer). The engine formats and
//! timestamps every line itself; a sink only appends.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Destination for engine log lines
///
/// Appending is best effort: implementations must swallow their own I/O
/// errors instead of failing the caller.
pub trait LogSink: Send + Sync {
    fn append(&self, line: &str);
}

/// Sink that forwards lines to `tracing` at TRACE level
///
/// The engine already logs every message itself; this sink is for hosts
/// that have no file to write to.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn append(&self, line: &str) {
        tracing::trace!(target: "ipguard::sink", "{}", line);
    }
}

/// Bounded in-memory sink, oldest lines dropped first
#[derive(Debug)]
pub struct MemoryLogSink {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl MemoryLogSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: Mutex::new(VecDeque::new()),
        }
    }

    /// Copy of the retained lines, oldest first
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// Whether any retained line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

impl Default for MemoryLogSink {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, line: &str) {
        let mut lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }
}
