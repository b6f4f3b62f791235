//! Background indexing jobs: at most one running job per project key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexingProgress {
    pub project: String,
    pub state: JobState,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items_done: usize,
    pub items_total: Option<usize>,
    pub current_item: Option<String>,
    pub last_error: Option<String>,
}

impl IndexingProgress {
    pub fn idle(project: &str) -> Self {
        Self {
            project: project.to_string(),
            state: JobState::Idle,
            started_at: None,
            completed_at: None,
            items_done: 0,
            items_total: None,
            current_item: None,
            last_error: None,
        }
    }
}

/// Partial progress reported by a running job; `None` fields keep their value.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub items_done: Option<usize>,
    pub items_total: Option<usize>,
    pub current_item: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub status: StartStatus,
    pub progress: IndexingProgress,
}

struct Jobs {
    progress: HashMap<String, IndexingProgress>,
    last_completed: HashMap<String, DateTime<Utc>>,
    handles: HashMap<String, JoinHandle<()>>,
    cancel: CancellationToken,
}

/// Runs indexing jobs on the runtime it was created in.
#[derive(Clone)]
pub struct JobScheduler {
    jobs: Arc<Mutex<Jobs>>,
    runtime: Handle,
    yield_every: usize,
}

/// Handed to every runner: progress reporting plus the cooperative
/// cancellation point.
pub struct JobContext {
    project: String,
    scheduler: JobScheduler,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn update(&self, update: ProgressUpdate) {
        self.scheduler.update(&self.project, update);
    }

    /// Call once per processed item. Yields to the runtime every
    /// `yield_every` items and fails with [`AppError::Cancelled`] once an
    /// abort has been requested.
    pub async fn checkpoint(&self, processed: usize) -> Result<()> {
        if processed > 0 && processed % self.scheduler.yield_every == 0 {
            tokio::task::yield_now().await;
        }
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }
}

impl JobScheduler {
    /// Must be called from within a tokio runtime; jobs are spawned on it.
    pub fn new(yield_every: usize) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(Jobs {
                progress: HashMap::new(),
                last_completed: HashMap::new(),
                handles: HashMap::new(),
                cancel: CancellationToken::new(),
            })),
            runtime: Handle::current(),
            yield_every: yield_every.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Jobs> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start `runner` for `project` unless a job for it is already running.
    /// Never waits for the runner.
    pub fn start<F, Fut>(&self, project: &str, runner: F) -> StartOutcome
    where
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (progress, cancel) = {
            let mut jobs = self.lock();
            if let Some(current) = jobs.progress.get(project) {
                if current.state == JobState::Running {
                    tracing::debug!("indexing already running for {project}");
                    return StartOutcome {
                        status: StartStatus::AlreadyRunning,
                        progress: current.clone(),
                    };
                }
            }
            let progress = IndexingProgress {
                state: JobState::Running,
                started_at: Some(Utc::now()),
                ..IndexingProgress::idle(project)
            };
            jobs.progress.insert(project.to_string(), progress.clone());
            (progress, jobs.cancel.clone())
        };

        let ctx = JobContext {
            project: project.to_string(),
            scheduler: self.clone(),
            cancel,
        };
        let job = runner(ctx);
        let scheduler = self.clone();
        let key = project.to_string();

        tracing::info!("indexing started for {project}");
        // Spawned under the lock: `finish` needs it too, so the handle is
        // recorded before this job can end or a newer one can start.
        let mut jobs = self.lock();
        let handle = self.runtime.spawn(async move {
            // The inner task isolates panics so they surface as a JoinError.
            let outcome = match tokio::spawn(job).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(e) if e.is_panic() => Err(panic_message(e.into_panic())),
                Err(e) => Err(e.to_string()),
            };
            scheduler.finish(&key, outcome);
        });
        jobs.handles.insert(project.to_string(), handle);
        drop(jobs);

        StartOutcome {
            status: StartStatus::Started,
            progress,
        }
    }

    fn finish(&self, project: &str, outcome: std::result::Result<(), String>) {
        let mut jobs = self.lock();
        let now = Utc::now();
        if outcome.is_ok() {
            jobs.last_completed.insert(project.to_string(), now);
        }
        let Some(progress) = jobs.progress.get_mut(project) else {
            return;
        };
        progress.completed_at = Some(now);
        progress.current_item = None;
        match outcome {
            Ok(()) => {
                progress.state = JobState::Complete;
                tracing::info!(
                    "indexing complete for {project} ({} items)",
                    progress.items_done
                );
            }
            Err(message) => {
                progress.state = JobState::Failed;
                tracing::error!("indexing failed for {project}: {message}");
                progress.last_error = Some(message);
            }
        }
    }

    /// Merge a partial update into the project's progress record.
    pub fn update(&self, project: &str, update: ProgressUpdate) {
        let mut jobs = self.lock();
        if let Some(progress) = jobs.progress.get_mut(project) {
            if let Some(done) = update.items_done {
                progress.items_done = done;
            }
            if update.items_total.is_some() {
                progress.items_total = update.items_total;
            }
            if update.current_item.is_some() {
                progress.current_item = update.current_item;
            }
        }
    }

    pub fn is_running(&self, project: &str) -> bool {
        self.lock()
            .progress
            .get(project)
            .is_some_and(|p| p.state == JobState::Running)
    }

    pub fn progress(&self, project: &str) -> IndexingProgress {
        self.lock()
            .progress
            .get(project)
            .cloned()
            .unwrap_or_else(|| IndexingProgress::idle(project))
    }

    /// When the last successful job for `project` finished in this process.
    pub fn last_completed_at(&self, project: &str) -> Option<DateTime<Utc>> {
        self.lock().last_completed.get(project).copied()
    }

    /// Wait for the current job of `project`, if any, to finish.
    pub async fn wait(&self, project: &str) {
        let handle = self.lock().handles.remove(project);
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Ask every running job to stop at its next checkpoint. Jobs started
    /// afterwards are unaffected.
    pub fn abort_all(&self) {
        let mut jobs = self.lock();
        let running = jobs
            .progress
            .values()
            .filter(|p| p.state == JobState::Running)
            .count();
        jobs.cancel.cancel();
        jobs.cancel = CancellationToken::new();
        tracing::info!("abort requested for {running} running indexing job(s)");
    }

    /// Wait for every job spawned so far.
    pub async fn join_all(&self) {
        let handles: Vec<_> = self.lock().handles.drain().map(|(_, h)| h).collect();
        futures::future::join_all(handles).await;
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("indexing panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("indexing panicked: {s}")
    } else {
        "indexing panicked".to_string()
    }
}
