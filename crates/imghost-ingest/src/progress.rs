//! Upload counters shared by concurrent uploads of one run, and size formatting

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub completed_count: usize,
    pub failed_count: usize,
    /// Planned items, fixed when the run starts
    pub total_count: usize,
}

impl UploadProgress {
    pub fn attempted(&self) -> usize {
        self.completed_count + self.failed_count
    }
}

/// Mutex-guarded [`UploadProgress`]; every update returns the new value
#[derive(Debug, Clone)]
pub struct UploadTracker {
    inner: Arc<Mutex<UploadProgress>>,
}

impl UploadTracker {
    pub fn new(total_count: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(UploadProgress {
                total_count,
                ..Default::default()
            })),
        }
    }

    pub async fn record_success(&self) -> UploadProgress {
        let mut progress = self.inner.lock().await;
        progress.completed_count += 1;
        *progress
    }

    pub async fn record_failure(&self) -> UploadProgress {
        let mut progress = self.inner.lock().await;
        progress.failed_count += 1;
        *progress
    }

    pub async fn snapshot(&self) -> UploadProgress {
        *self.inner.lock().await
    }
}

/// Format bytes the way archive previews show them: `0 B`, `512 B`, `1.5 KB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        // Two decimals, trailing zeros dropped
        let rounded = format!("{:.2}", size);
        let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
        format!("{} {}", trimmed, UNITS[unit_idx])
    }
}
