use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use conductor_core::event::SnapshotBus;
use conductor_core::types::{PlanningSnapshot, SessionId};

const OUTPUT_PREVIEW_CHARS: usize = 200;

/// JSONL snapshot logger.
///
/// Subscribes to the [`SnapshotBus`] and appends one JSON object per
/// snapshot. Lines are flushed as they are written, so a crash loses at
/// most the line in flight.
pub struct SnapshotLogger {
    log_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct LogEntry {
    timestamp: String,
    session_id: String,
    sequence: u64,
    node_id: String,
    block_id: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_preview: Option<String>,
}

impl SnapshotLogger {
    /// Logs go to `{log_dir}/{session_id}/{timestamp}.jsonl`.
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    pub fn log_path(&self, session_id: &SessionId) -> PathBuf {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        self.log_dir
            .join(&session_id.0)
            .join(format!("{}.jsonl", timestamp))
    }

    /// Run until cancelled, the bus closes, or the session finishes.
    /// Snapshots for other sessions are skipped.
    pub async fn run(self, bus: Arc<SnapshotBus>, session_id: SessionId, cancel: CancellationToken) {
        // Subscribe first so snapshots published while the file opens are buffered.
        let mut rx = bus.subscribe();
        let log_path = self.log_path(&session_id);

        let Some(mut writer) = open_log(&log_path).await else {
            return;
        };
        info!(path = %log_path.display(), "SnapshotLogger started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("SnapshotLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(snapshot) => {
                            if snapshot.session_id != session_id {
                                continue;
                            }
                            let entry = snapshot_to_entry(&snapshot);
                            if let Ok(json) = serde_json::to_string(&entry) {
                                let line = format!("{}\n", json);
                                if let Err(e) = writer.write_all(line.as_bytes()).await {
                                    error!(error = %e, "Failed to write snapshot entry");
                                    break;
                                }
                                if let Err(e) = writer.flush().await {
                                    error!(error = %e, "Failed to flush snapshot log");
                                }
                            }
                            if snapshot.is_terminal {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "SnapshotLogger lagged, skipped snapshots");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            debug!("SnapshotBus closed, SnapshotLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "SnapshotLogger finished");
    }
}

async fn open_log(path: &Path) -> Option<tokio::io::BufWriter<tokio::fs::File>> {
    if let Some(dir) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            error!(error = %e, "Failed to create snapshot log directory");
            return None;
        }
    }
    match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
    {
        Ok(f) => Some(tokio::io::BufWriter::new(f)),
        Err(e) => {
            error!(error = %e, path = %path.display(), "Failed to open snapshot log");
            None
        }
    }
}

fn snapshot_to_entry(snapshot: &PlanningSnapshot) -> LogEntry {
    let status = if snapshot.is_halted {
        "halted"
    } else if snapshot.is_terminal {
        "finished"
    } else {
        "running"
    };
    LogEntry {
        timestamp: snapshot.timestamp.to_rfc3339(),
        session_id: snapshot.session_id.to_string(),
        sequence: snapshot.sequence,
        node_id: snapshot.node_id.clone(),
        block_id: snapshot.current_block_id.clone(),
        status,
        error: snapshot.error_message.clone(),
        output_preview: snapshot
            .last_output
            .as_deref()
            .map(|o| truncate_str(o, OUTPUT_PREVIEW_CHARS)),
    }
}

/// Truncate on a char boundary.
fn truncate_str(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
