//! Append-only log file sink

use ipguard_core::traits::LogSink;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Appends each engine line to a file
pub struct FileLogSink {
    file: Mutex<File>,
}

impl FileLogSink {
    /// Open `path` for appending, creating it if needed
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LogSink for FileLogSink {
    fn append(&self, line: &str) {
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{}", line) {
            tracing::warn!("Failed to write log file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipguard.log");

        FileLogSink::open(&path).unwrap().append("first");
        FileLogSink::open(&path).unwrap().append("second");

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }
}
