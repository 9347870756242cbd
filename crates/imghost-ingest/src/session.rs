//! Ingestion session
//!
//! Drives one archive at a time through its phases:
//!
//! ```text
//! idle -> loading -> analyzing -> preview -> extracting <-> uploading -> completed
//! ```
//!
//! `cancel` returns any non-idle session to `idle`. Failures while loading, analyzing,
//! extracting or uploading move it to `error`, and `reset` returns `error` or
//! `completed` to `idle`.
//!
//! Every run gets a fresh `run_id`. Work belonging to an older run (a late progress
//! callback, an analysis that finished after a cancel) is discarded by comparing ids.

use imghost_common::media::MAX_IMAGE_BYTES;
use imghost_common::types::UploadOptions;
use imghost_common::ImghostError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::archive::{AnalysisResult, AnalyzeError, Archive, ArchiveAnalyzer, ArchiveSource};
use crate::dispatch::{UploadDispatcher, DEFAULT_UPLOAD_CONCURRENCY};
use crate::extract::{BatchExtractor, ExtractProgress, DEFAULT_BATCH_SIZE};
use crate::progress::{UploadProgress, UploadTracker};
use crate::uploader::ImageUploader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Loading,
    Analyzing,
    Preview,
    Extracting,
    Uploading,
    Completed,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Loading => "loading",
            Phase::Analyzing => "analyzing",
            Phase::Preview => "preview",
            Phase::Extracting => "extracting",
            Phase::Uploading => "uploading",
            Phase::Completed => "completed",
            Phase::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Cannot {action} while the session is {phase}")]
    InvalidTransition { action: &'static str, phase: Phase },

    #[error(transparent)]
    Analyze(#[from] AnalyzeError),

    #[error(transparent)]
    InvalidOptions(#[from] ImghostError),

    #[error("Ingestion was cancelled")]
    Cancelled,

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Final counts of one run
///
/// `total` is the number of images planned at confirm time. For a run that was not
/// cancelled, `completed + failed + extraction_skipped == total`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionReport {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub extraction_skipped: usize,
    pub cancelled: bool,
}

impl IngestionReport {
    pub fn is_reconciled(&self) -> bool {
        self.completed + self.failed + self.extraction_skipped == self.total
    }
}

/// Read-only view of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub run_id: u64,
    pub phase: Phase,
    pub analysis: Option<Arc<AnalysisResult>>,
    pub extract_progress: Option<ExtractProgress>,
    pub upload_progress: UploadProgress,
    pub report: Option<IngestionReport>,
    pub error: Option<String>,
}

impl SessionSnapshot {
    fn idle(run_id: u64) -> Self {
        Self {
            run_id,
            phase: Phase::Idle,
            analysis: None,
            extract_progress: None,
            upload_progress: UploadProgress::default(),
            report: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub batch_size: usize,
    pub upload_concurrency: usize,
    /// Per-item limit applied both when analyzing and when extracting
    pub max_item_bytes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            max_item_bytes: MAX_IMAGE_BYTES,
        }
    }
}

struct RunState {
    run_id: u64,
    cancel: CancellationToken,
    archive: Option<Archive>,
}

struct RunOutcome {
    cancelled: bool,
    skipped: usize,
}

async fn blocking<T, F>(f: F) -> Result<T, IngestError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IngestError::Task(e.to_string()))
}

pub struct IngestSession {
    config: SessionConfig,
    dispatcher: UploadDispatcher,
    state: Arc<watch::Sender<SessionSnapshot>>,
    run: Mutex<RunState>,
}

impl IngestSession {
    pub fn new(uploader: Arc<dyn ImageUploader>, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::idle(0));
        Self {
            config,
            dispatcher: UploadDispatcher::new(uploader).with_concurrency(config.upload_concurrency),
            state: Arc::new(state),
            run: Mutex::new(RunState {
                run_id: 0,
                cancel: CancellationToken::new(),
                archive: None,
            }),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    /// Receiver that observes every phase and progress change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// Apply `update` if `run_id` is still the current run
    fn publish(&self, run_id: u64, update: impl FnOnce(&mut SessionSnapshot)) -> bool {
        self.state.send_if_modified(|snapshot| {
            if snapshot.run_id != run_id {
                return false;
            }
            update(snapshot);
            true
        })
    }

    async fn fail(&self, run_id: u64, err: &IngestError) {
        let mut run = self.run.lock().await;
        if run.run_id != run_id {
            return;
        }
        run.archive = None;

        let phase = self.phase();
        error!(run_id, phase = %phase, error = %err, "Ingestion failed");
        self.publish(run_id, |snapshot| {
            snapshot.phase = Phase::Error;
            snapshot.error = Some(err.to_string());
        });
    }

    fn check_cancelled(cancel: &CancellationToken) -> Result<(), IngestError> {
        if cancel.is_cancelled() {
            Err(IngestError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Open and analyze an archive; only valid while idle
    #[tracing::instrument(skip(self, source), fields(source = %source))]
    pub async fn select_archive(
        &self,
        source: ArchiveSource,
    ) -> Result<Arc<AnalysisResult>, IngestError> {
        let (run_id, cancel) = {
            let mut run = self.run.lock().await;
            let phase = self.phase();
            if phase != Phase::Idle {
                return Err(IngestError::InvalidTransition {
                    action: "select an archive",
                    phase,
                });
            }

            run.run_id += 1;
            run.cancel = CancellationToken::new();
            self.state.send_replace(SessionSnapshot {
                phase: Phase::Loading,
                ..SessionSnapshot::idle(run.run_id)
            });
            (run.run_id, run.cancel.clone())
        };

        let analyzer = ArchiveAnalyzer::with_max_item_bytes(self.config.max_item_bytes);
        let loaded = async {
            let mut archive = blocking(move || source.open()).await??;
            Self::check_cancelled(&cancel)?;

            self.publish(run_id, |snapshot| snapshot.phase = Phase::Analyzing);
            let (archive, analysis) = blocking(move || {
                let analysis = analyzer.analyze(&mut archive);
                (archive, analysis)
            })
            .await?;
            Self::check_cancelled(&cancel)?;

            Ok::<_, IngestError>((archive, analysis?))
        }
        .await;

        let (archive, analysis) = match loaded {
            Ok(loaded) => loaded,
            Err(IngestError::Cancelled) => return Err(IngestError::Cancelled),
            Err(e) => {
                self.fail(run_id, &e).await;
                return Err(e);
            },
        };

        let analysis = Arc::new(analysis);
        let mut run = self.run.lock().await;
        if run.run_id != run_id || cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        run.archive = Some(archive);
        self.publish(run_id, |snapshot| {
            snapshot.phase = Phase::Preview;
            snapshot.analysis = Some(analysis.clone());
        });

        Ok(analysis)
    }

    /// Extract and upload every analyzed image with `options`
    ///
    /// Returns the run's report. A run stopped by [`cancel`](Self::cancel) still
    /// returns its partial report with `cancelled` set; uploaded images stay uploaded.
    #[tracing::instrument(skip(self, options))]
    pub async fn confirm(&self, options: UploadOptions) -> Result<IngestionReport, IngestError> {
        let (run_id, cancel, archive, analysis) = {
            let mut run = self.run.lock().await;
            let phase = self.phase();
            let analysis = self.state.borrow().analysis.clone();
            let (Phase::Preview, Some(analysis)) = (phase, analysis) else {
                return Err(IngestError::InvalidTransition {
                    action: "confirm",
                    phase,
                });
            };
            options.validate()?;

            let archive = run.archive.take().ok_or(IngestError::InvalidTransition {
                action: "confirm",
                phase,
            })?;

            let total = analysis.total_images;
            self.publish(run.run_id, |snapshot| {
                snapshot.phase = Phase::Extracting;
                snapshot.upload_progress = UploadProgress {
                    total_count: total,
                    ..Default::default()
                };
            });
            (run.run_id, run.cancel.clone(), archive, analysis)
        };

        info!(run_id, images = analysis.total_images, "Ingestion started");

        let state = self.state.clone();
        let extractor = BatchExtractor::new(archive, analysis.images.clone())
            .batch_size(self.config.batch_size)
            .max_item_bytes(self.config.max_item_bytes)
            .on_progress(move |progress| {
                state.send_if_modified(|snapshot| {
                    if snapshot.run_id != run_id {
                        return false;
                    }
                    snapshot.extract_progress = Some(progress.clone());
                    true
                });
            });

        let tracker = UploadTracker::new(analysis.total_images);
        let outcome = self
            .run_batches(run_id, &cancel, extractor, &options, &tracker)
            .await;

        let RunOutcome { cancelled, skipped } = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail(run_id, &e).await;
                return Err(e);
            },
        };

        let progress = tracker.snapshot().await;
        let mut report = IngestionReport {
            total: analysis.total_images,
            completed: progress.completed_count,
            failed: progress.failed_count,
            extraction_skipped: skipped,
            cancelled,
        };

        if !cancelled {
            let finished = self.publish(run_id, |snapshot| {
                snapshot.phase = Phase::Completed;
                snapshot.upload_progress = progress;
                snapshot.report = Some(report.clone());
            });
            report.cancelled = !finished;
        }

        info!(
            run_id,
            completed = report.completed,
            failed = report.failed,
            extraction_skipped = report.extraction_skipped,
            cancelled = report.cancelled,
            "Ingestion finished"
        );

        Ok(report)
    }

    async fn run_batches(
        &self,
        run_id: u64,
        cancel: &CancellationToken,
        extractor: BatchExtractor<Box<dyn crate::archive::ReadSeek>>,
        options: &UploadOptions,
        tracker: &UploadTracker,
    ) -> Result<RunOutcome, IngestError> {
        let mut extractor = extractor;
        let state = &self.state;

        loop {
            if cancel.is_cancelled() {
                return Ok(RunOutcome {
                    cancelled: true,
                    skipped: extractor.skipped(),
                });
            }

            let (returned, batch) = blocking(move || {
                let mut extractor = extractor;
                let batch = extractor.next();
                (extractor, batch)
            })
            .await?;
            extractor = returned;

            let Some(batch) = batch else {
                break;
            };

            // A batch pulled after the cancel is discarded
            if cancel.is_cancelled() {
                return Ok(RunOutcome {
                    cancelled: true,
                    skipped: extractor.skipped(),
                });
            }

            debug!(run_id, items = batch.len(), "Uploading batch");
            self.publish(run_id, |snapshot| snapshot.phase = Phase::Uploading);

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(RunOutcome {
                        cancelled: true,
                        skipped: extractor.skipped(),
                    });
                },
                _ = self.dispatcher.dispatch(batch, options, tracker, |progress| {
                    state.send_if_modified(|snapshot| {
                        if snapshot.run_id != run_id {
                            return false;
                        }
                        snapshot.upload_progress = progress;
                        true
                    });
                }) => {},
            }

            self.publish(run_id, |snapshot| snapshot.phase = Phase::Extracting);
        }

        Ok(RunOutcome {
            cancelled: false,
            skipped: extractor.skipped(),
        })
    }

    /// Return to idle from any other phase, dropping the archive and all results
    ///
    /// Returns `false` when the session was already idle.
    pub async fn cancel(&self) -> bool {
        let mut run = self.run.lock().await;
        let phase = self.phase();
        if phase == Phase::Idle {
            return false;
        }

        run.cancel.cancel();
        run.cancel = CancellationToken::new();
        run.archive = None;
        run.run_id += 1;
        self.state.send_replace(SessionSnapshot::idle(run.run_id));

        info!(from = %phase, "Ingestion cancelled");
        true
    }

    /// Clear a completed or failed session
    pub async fn reset(&self) -> Result<(), IngestError> {
        match self.phase() {
            Phase::Idle => Ok(()),
            Phase::Completed | Phase::Error => {
                self.cancel().await;
                Ok(())
            },
            phase => Err(IngestError::InvalidTransition {
                action: "reset",
                phase,
            }),
        }
    }
}
