//! Append-only JSONL audit sink
//!
//! Used when no database is available (dev mode) or when a local copy of the
//! trail is wanted. One entry per line.

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::{AuditLogEntry, AuditSink, AuditWriteFailure};

/// Appends on the blocking pool so file I/O never stalls a runtime worker
#[derive(Clone)]
pub struct JsonlAuditSink {
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl JsonlAuditSink {
    /// Open (or create) the log file in append mode
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        info!("Audit trail appending to {}", path.display());

        Ok(Self {
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), AuditWriteFailure> {
        let line = serde_json::to_string(&entry)
            .map_err(|e| AuditWriteFailure(format!("serialize: {}", e)))?;
        let writer = Arc::clone(&self.writer);

        tokio::task::spawn_blocking(move || {
            let mut writer = writer
                .lock()
                .map_err(|_| AuditWriteFailure("audit writer poisoned".into()))?;
            writeln!(writer, "{}", line).map_err(|e| AuditWriteFailure(e.to_string()))?;
            writer.flush().map_err(|e| AuditWriteFailure(e.to_string()))
        })
        .await
        .map_err(|e| AuditWriteFailure(format!("audit writer task: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditEntity};

    #[tokio::test]
    async fn test_appends_one_line_per_entry() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonlAuditSink::open(&path).unwrap();

        for id in ["s1", "s2"] {
            sink.append(AuditLogEntry::new(
                None,
                AuditAction::Read,
                &AuditEntity::new("Student", id),
            ))
            .await
            .unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AuditLogEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.entity_id, "s1");
        assert_eq!(first.action, AuditAction::Read);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_append_keeps_runtime_responsive() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonlAuditSink::open(&path).unwrap();

        // Hold the file lock so the write has to wait on the blocking pool
        let held = sink.writer.lock().unwrap();
        let pending = tokio::spawn({
            let sink = sink.clone();
            async move {
                sink.append(AuditLogEntry::new(
                    None,
                    AuditAction::Write,
                    &AuditEntity::new("IntakeMessage", "m1"),
                ))
                .await
            }
        });

        // A single-threaded runtime still makes progress while the write waits
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!pending.is_finished());
        drop(held);

        pending.await.unwrap().unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
