//! Single-flight download coordination
//!
//! At most one resolution runs per blob. Callers that arrive while a
//! resolution is in flight wait for it and receive the same outcome,
//! success or failure. Each resolution runs on its own task, so it keeps
//! going when the callers that triggered it go away.

use blobserver_core::{BlobError, BlobId, BlobResult};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::resolver::{Resolution, TieredResolver};

type SharedOutcome = Shared<BoxFuture<'static, BlobResult<Resolution>>>;
type JobsMap = HashMap<BlobId, InFlightJob>;

/// A resolution that has been admitted and not yet finished
struct InFlightJob {
    job_id: Uuid,
    destination: PathBuf,
    started_at: Instant,
    outcome: SharedOutcome,
}

/// Snapshot of an in-flight job
#[derive(Debug, Clone, Serialize)]
pub struct InFlightJobInfo {
    pub blob: BlobId,
    pub job_id: Uuid,
    pub destination: PathBuf,
    pub elapsed_ms: u64,
}

/// Removes the job entry when its task ends, however it ends
struct JobGuard {
    jobs: Arc<Mutex<JobsMap>>,
    blob: BlobId,
    job_id: Uuid,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if jobs.get(&self.blob).map_or(false, |job| job.job_id == self.job_id) {
            jobs.remove(&self.blob);
        }
    }
}

/// Per-blob single-flight controller
pub struct DownloadCoordinator {
    resolver: Arc<TieredResolver>,
    /// Held only while the map is read or mutated, never across I/O
    jobs: Arc<Mutex<JobsMap>>,
}

impl DownloadCoordinator {
    pub fn new(resolver: Arc<TieredResolver>) -> Self {
        Self {
            resolver,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_jobs(&self) -> MutexGuard<'_, JobsMap> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Populate `destination` with blob `id`
    ///
    /// Joins the in-flight resolution for `id` if there is one; joiners share
    /// the destination chosen by the caller that started it.
    pub async fn materialize(&self, id: &BlobId, destination: &Path) -> BlobResult<Resolution> {
        let (outcome, task) = {
            let mut jobs = self.lock_jobs();
            match jobs.get(id) {
                Some(job) => {
                    debug!(blob = %id, job_id = %job.job_id, "Joining in-flight download");
                    (job.outcome.clone(), None)
                }
                None => {
                    let (job, task) = self.prepare_job(id.clone(), destination.to_path_buf());
                    let outcome = job.outcome.clone();
                    jobs.insert(id.clone(), job);
                    (outcome, Some(task))
                }
            }
        };

        // Spawned with the map unlocked: a runtime that is shutting down
        // drops the task in place, and its guard needs the lock.
        if let Some(task) = task {
            tokio::spawn(task);
        }

        outcome.await
    }

    /// Build the job entry and the task that drives it
    ///
    /// The task owns the map guard, so the entry goes away however the task
    /// ends, including never being polled.
    fn prepare_job(&self, blob: BlobId, destination: PathBuf) -> (InFlightJob, BoxFuture<'static, ()>) {
        let job_id = Uuid::new_v4();
        let guard = JobGuard {
            jobs: Arc::clone(&self.jobs),
            blob: blob.clone(),
            job_id,
        };
        let resolver = Arc::clone(&self.resolver);
        let path = destination.clone();
        let span = tracing::info_span!("download", blob = %blob, job_id = %job_id);
        let (tx, rx) = oneshot::channel();

        let task = async move {
            let _guard = guard;
            let started_at = Instant::now();
            let result = resolver.resolve(&blob, &path).await;
            match &result {
                Ok(resolution) => info!(
                    tier = %resolution.tier,
                    bytes = resolution.bytes,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Resolved blob"
                ),
                Err(e) => warn!(error = %e, "Failed to resolve blob"),
            }
            // Every waiter may have gone away
            let _ = tx.send(result);
        }
        .instrument(span)
        .boxed();

        let outcome = async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(BlobError::Internal(
                    "download task ended without a result".to_string(),
                )),
            }
        }
        .boxed()
        .shared();

        let job = InFlightJob {
            job_id,
            destination,
            started_at: Instant::now(),
            outcome,
        };
        (job, task)
    }

    /// Whether a resolution for `id` is running
    pub fn is_in_flight(&self, id: &BlobId) -> bool {
        self.lock_jobs().contains_key(id)
    }

    /// Snapshot of running resolutions, oldest first
    pub fn in_flight(&self) -> Vec<InFlightJobInfo> {
        let jobs = self.lock_jobs();
        let mut infos: Vec<InFlightJobInfo> = jobs
            .iter()
            .map(|(blob, job)| InFlightJobInfo {
                blob: blob.clone(),
                job_id: job.job_id,
                destination: job.destination.clone(),
                elapsed_ms: job.started_at.elapsed().as_millis() as u64,
            })
            .collect();
        infos.sort_by(|a, b| b.elapsed_ms.cmp(&a.elapsed_ms));
        infos
    }
}
