//! Background prediction jobs, at most one per folder.
//!
//! A job keeps its slot until its task has finished, including after cancellation, so
//! a restarted run never overlaps the tail of the previous one.

use std::time::Duration;

use batwatch_core::{CancelToken, PredictionBackend, PredictionRunner};
use dashmap::DashMap;
use tokio::task::JoinHandle;

struct JobHandle {
    cancel: CancelToken,
    task: JoinHandle<()>,
}

pub struct JobRegistry<B: PredictionBackend + 'static> {
    runner: PredictionRunner<B>,
    jobs: DashMap<String, JobHandle>,
}

impl<B: PredictionBackend + 'static> JobRegistry<B> {
    pub fn new(runner: PredictionRunner<B>) -> Self {
        Self {
            runner,
            jobs: DashMap::new(),
        }
    }

    pub fn is_running(&self, folder: &str) -> bool {
        self.jobs
            .get(folder)
            .map(|j| !j.task.is_finished())
            .unwrap_or(false)
    }

    /// Start predicting `folder` in the background. Returns false while a job for the
    /// folder is still running, even one that has been asked to stop.
    pub fn start(&self, folder: &str) -> bool {
        let entry = self.jobs.entry(folder.to_string());
        if let dashmap::mapref::entry::Entry::Occupied(ref existing) = entry {
            if !existing.get().task.is_finished() {
                return false;
            }
        }
        let cancel = CancelToken::new();
        let runner = self.runner.clone();
        let job_cancel = cancel.clone();
        let job_folder = folder.to_string();
        let task = tokio::spawn(async move {
            if let Err(e) = runner.run_folder(&job_folder, &job_cancel).await {
                tracing::error!(folder = %job_folder, "prediction job failed: {}", e);
            }
        });
        entry.insert(JobHandle { cancel, task });
        tracing::info!(folder, "prediction job started");
        true
    }

    /// Signal the folder's job to stop. Returns false when nothing was running.
    pub fn cancel(&self, folder: &str) -> bool {
        match self.jobs.get(folder) {
            Some(job) if !job.task.is_finished() => {
                job.cancel.cancel();
                tracing::info!(folder, "prediction job cancelled");
                true
            }
            _ => false,
        }
    }

    /// Cancel every job and wait up to `grace` for each to write its final progress.
    pub async fn shutdown(&self, grace: Duration) {
        for job in self.jobs.iter() {
            job.cancel.cancel();
        }
        let folders: Vec<String> = self.jobs.iter().map(|j| j.key().clone()).collect();
        for folder in folders {
            let Some((_, job)) = self.jobs.remove(&folder) else {
                continue;
            };
            match tokio::time::timeout(grace, job.task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(folder = %folder, "prediction job panicked: {}", e),
                Err(_) => tracing::warn!(folder = %folder, "prediction job did not stop in time"),
            }
        }
    }
}
