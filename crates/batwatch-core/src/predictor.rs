//! Folder prediction runner: walks the audio files of a recording folder one at a time,
//! reuses cached predictions, asks the prediction API for the rest and stores the ranked
//! result. A [`CancelToken`] stops the walk between files or mid-request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Notify;

use crate::error::BatwatchResult;
use crate::models::{rank_species, JobProgress, JobState, Prediction};
use crate::predict_api::PredictionBackend;
use crate::store::DashboardStore;

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

/// Shared stop flag for a running job. Clones observe the same flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Outcome of one folder run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PredictionReport {
    pub folder: String,
    pub total: usize,
    pub predicted: usize,
    pub cached: usize,
    pub failed: Vec<String>,
    pub cancelled: bool,
}

pub struct PredictionRunner<B: PredictionBackend> {
    backend: Arc<B>,
    store: DashboardStore,
    top_k: usize,
}

impl<B: PredictionBackend> Clone for PredictionRunner<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            store: self.store.clone(),
            top_k: self.top_k,
        }
    }
}

impl<B: PredictionBackend> PredictionRunner<B> {
    pub fn new(backend: Arc<B>, store: DashboardStore, top_k: usize) -> Self {
        Self {
            backend,
            store,
            top_k,
        }
    }

    fn write_progress(
        &self,
        report: &PredictionReport,
        state: JobState,
        current_file: Option<&str>,
        error: Option<String>,
    ) {
        let progress = JobProgress {
            folder: report.folder.clone(),
            state,
            total: report.total,
            done: report.predicted + report.cached + report.failed.len(),
            cached: report.cached,
            failed: report.failed.len(),
            current_file: current_file.map(str::to_string),
            error,
            updated_at: Utc::now(),
        };
        if let Err(e) = self.store.put_job_progress(&progress) {
            tracing::warn!(folder = %report.folder, "progress not written: {}", e);
        }
    }

    /// Predict every audio file of `folder` that has no cached prediction yet.
    ///
    /// Listing failures abort the run and are returned. Per-file failures are logged,
    /// counted in the report and skipped.
    pub async fn run_folder(
        &self,
        folder: &str,
        cancel: &CancelToken,
    ) -> BatwatchResult<PredictionReport> {
        let mut report = PredictionReport {
            folder: folder.to_string(),
            ..Default::default()
        };
        self.write_progress(&report, JobState::Running, None, None);

        let listing = tokio::select! {
            r = self.backend.list_files(folder) => r,
            _ = cancel.cancelled() => {
                tracing::info!(folder, "prediction run cancelled while listing");
                report.cancelled = true;
                self.write_progress(&report, JobState::Cancelled, None, None);
                return Ok(report);
            }
        };
        let files = match listing {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(folder, "listing files failed: {}", e);
                self.write_progress(&report, JobState::Failed, None, Some(e.to_string()));
                return Err(e);
            }
        };
        let audio: Vec<_> = files.into_iter().filter(|f| f.is_audio()).collect();
        report.total = audio.len();
        tracing::info!(folder, files = report.total, "prediction run started");

        for file in &audio {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.store.get_prediction(folder, &file.name) {
                Ok(Some(_)) => {
                    report.cached += 1;
                    self.write_progress(&report, JobState::Running, Some(&file.name), None);
                    continue;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(folder, file = %file.name, "cache lookup failed: {}", e),
            }

            self.write_progress(&report, JobState::Running, Some(&file.name), None);
            let result = tokio::select! {
                r = self.backend.predict(folder, &file.name) => r,
                _ = cancel.cancelled() => {
                    tracing::info!(folder, file = %file.name, "prediction aborted");
                    report.cancelled = true;
                    break;
                }
            };

            match result {
                Ok(scores) => {
                    let prediction = Prediction {
                        folder: folder.to_string(),
                        file: file.name.clone(),
                        species: rank_species(scores, self.top_k),
                        predicted_at: Utc::now(),
                    };
                    match self.store.put_prediction(&prediction) {
                        Ok(()) => report.predicted += 1,
                        Err(e) => {
                            tracing::warn!(folder, file = %file.name, "prediction not stored: {}", e);
                            report.failed.push(file.name.clone());
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(folder, file = %file.name, "processing failed: {}", e);
                    report.failed.push(file.name.clone());
                }
            }
        }

        let state = if report.cancelled {
            JobState::Cancelled
        } else {
            JobState::Completed
        };
        self.write_progress(&report, state, None, None);
        tracing::info!(
            folder,
            predicted = report.predicted,
            cached = report.cached,
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "prediction run finished"
        );
        Ok(report)
    }
}
