use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::broadcast::ProgressBroadcaster;
use super::db::DbHandle;
use super::models::*;
use crate::errors::RegistryError;

/// Default and maximum row counts for [`RunRegistry::list_recent`].
pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

/// `web_YYYYMMDD_HHMMSS_<6 hex>`.
pub fn new_run_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("web_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..6])
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn db_err(e: anyhow::Error) -> RegistryError {
    RegistryError::Database(e)
}

/// Owner of every run record and its state machine.
///
/// Mutations of one run are serialized by a per-run lock. Status events are
/// published while that lock is held, so observers see them in transition
/// order. Different runs never contend beyond the brief SQLite access.
#[derive(Clone)]
pub struct RunRegistry {
    db: DbHandle,
    broadcaster: ProgressBroadcaster,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl RunRegistry {
    pub fn new(db: DbHandle, broadcaster: ProgressBroadcaster) -> Self {
        Self {
            db,
            broadcaster,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.broadcaster
    }

    fn lock_for(&self, run_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load(&self, run_id: &str) -> Result<Run, RegistryError> {
        let id = run_id.to_string();
        self.db
            .call(move |db| db.get_run(&id))
            .await
            .map_err(db_err)?
            .ok_or_else(|| RegistryError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn store(&self, run: &Run, from: RunStatus) -> Result<(), RegistryError> {
        let run = run.clone();
        self.db
            .call(move |db| {
                db.update_run(&run)?;
                db.insert_transition(&run.run_id, &from, &run.status, run.progress, &run.updated_at)
            })
            .await
            .map_err(db_err)
    }

    /// Register a new run in `queued` with progress 0.
    pub async fn create(&self, input: RunInput) -> Result<Run, RegistryError> {
        let created_at = now();
        let run = Run {
            run_id: new_run_id(),
            input,
            status: RunStatus::Queued,
            progress: 0,
            current_step: None,
            verdict: None,
            initial_verdict: None,
            revision_attempted: false,
            error_message: None,
            suggestions: Vec::new(),
            created_at: created_at.clone(),
            updated_at: created_at,
        };
        let stored = run.clone();
        self.db
            .call(move |db| db.insert_run(&stored))
            .await
            .map_err(db_err)?;
        tracing::info!(run_id = %run.run_id, "Run created");
        Ok(run)
    }

    pub async fn get(&self, run_id: &str) -> Result<Run, RegistryError> {
        self.load(run_id).await
    }

    /// Apply a state change.
    ///
    /// Rejects edges outside the forward graph, progress that moves
    /// backwards, and a verdict that would replace a different one, except
    /// for the single replacement made during the revision pass. Emits a `status` event, followed by `done` when
    /// the new state is terminal.
    pub async fn transition(&self, run_id: &str, update: RunUpdate) -> Result<Run, RegistryError> {
        let lock = self.lock_for(run_id);
        let _guard = lock.lock().await;

        let mut run = self.load(run_id).await?;
        let from = run.status;

        if !is_valid_transition(&from, &update.status) {
            return Err(RegistryError::InvalidTransition {
                run_id: run_id.to_string(),
                from: from.to_string(),
                to: update.status.to_string(),
            });
        }
        if let Some(progress) = update.progress
            && progress < run.progress
        {
            return Err(RegistryError::ProgressRegression {
                run_id: run_id.to_string(),
                from: run.progress,
                to: progress,
            });
        }
        // The one permitted overwrite is the revision pass replacing the
        // verdict it copied into `initial_verdict`.
        if let (Some(current), Some(next)) = (run.verdict, update.verdict)
            && current != next
            && !(run.revision_attempted && run.verdict == run.initial_verdict)
        {
            return Err(RegistryError::VerdictOverwrite {
                run_id: run_id.to_string(),
                current: current.to_string(),
            });
        }

        run.status = update.status;
        if let Some(progress) = update.progress {
            run.progress = progress;
        }
        if let Some(step) = update.current_step {
            run.current_step = step;
        }
        if let Some(verdict) = update.verdict {
            run.verdict = Some(verdict);
        }
        if let Some(message) = update.error_message {
            run.error_message = Some(message);
        }
        if let Some(suggestions) = update.suggestions {
            run.suggestions = suggestions;
        }
        run.updated_at = now();

        self.store(&run, from).await?;

        if from != run.status {
            tracing::info!(
                run_id = %run_id,
                from = %from,
                to = %run.status,
                progress = run.progress,
                "Run transition"
            );
        }

        self.broadcaster.publish(ProgressEvent::status(&run));
        if run.status.is_terminal() {
            self.broadcaster.publish(ProgressEvent::done(&run));
            // Still under the guard. Any other holder of this lock (ours and
            // the map's make two) keeps the entry alive.
            self.locks
                .remove_if(run_id, |_, lock| Arc::strong_count(lock) <= 2);
        }
        Ok(run)
    }

    /// Enter the revision pass. The only backwards move the registry allows.
    ///
    /// Requires `analyzing` with a NO or HOLD verdict and no earlier
    /// revision. Copies the verdict into `initial_verdict` and resets
    /// progress to 0 for the tail pass.
    pub async fn begin_revision(&self, run_id: &str) -> Result<Run, RegistryError> {
        let lock = self.lock_for(run_id);
        let _guard = lock.lock().await;

        let mut run = self.load(run_id).await?;
        if run.revision_attempted {
            return Err(RegistryError::RevisionAlreadyAttempted {
                run_id: run_id.to_string(),
            });
        }
        let failing = run.verdict.is_some_and(|v| v.is_failing());
        if run.status != RunStatus::Analyzing || !failing {
            return Err(RegistryError::RevisionNotApplicable {
                run_id: run_id.to_string(),
            });
        }

        let from = run.status;
        run.revision_attempted = true;
        run.initial_verdict = run.verdict;
        run.progress = 0;
        run.updated_at = now();
        self.store(&run, from).await?;

        tracing::info!(
            run_id = %run_id,
            initial_verdict = ?run.initial_verdict,
            "Revision pass started"
        );
        self.broadcaster.publish(ProgressEvent::status(&run));
        Ok(run)
    }

    /// Publish a log line to the run's observers.
    pub async fn log(&self, run_id: &str, message: impl Into<String>) {
        let lock = self.lock_for(run_id);
        let _guard = lock.lock().await;
        self.broadcaster.publish(ProgressEvent::log(run_id, message));
    }

    /// Most recent runs first. `limit` is clamped to `1..=100`.
    pub async fn list_recent(&self, limit: Option<usize>) -> Result<Vec<RunSummary>, RegistryError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        self.db
            .call(move |db| db.list_recent_runs(limit))
            .await
            .map_err(db_err)
    }

    pub async fn transitions(&self, run_id: &str) -> Result<Vec<TransitionRecord>, RegistryError> {
        self.load(run_id).await?;
        let id = run_id.to_string();
        self.db
            .call(move |db| db.list_transitions(&id))
            .await
            .map_err(db_err)
    }

    // ── Artifacts and usage ───────────────────────────────────────────

    pub async fn record_artifact(&self, artifact: StageArtifact) -> Result<(), RegistryError> {
        self.db
            .call(move |db| {
                db.upsert_artifact(&artifact)?;
                db.insert_usage(
                    &artifact.run_id,
                    artifact.stage,
                    artifact.pass,
                    &artifact.usage,
                    &artifact.created_at,
                )
            })
            .await
            .map_err(db_err)
    }

    pub async fn artifacts(&self, run_id: &str) -> Result<Vec<StageArtifact>, RegistryError> {
        self.load(run_id).await?;
        let id = run_id.to_string();
        self.db
            .call(move |db| db.list_artifacts(&id))
            .await
            .map_err(db_err)
    }

    pub async fn artifact(
        &self,
        run_id: &str,
        stage: Stage,
    ) -> Result<Option<StageArtifact>, RegistryError> {
        let id = run_id.to_string();
        self.db
            .call(move |db| db.get_artifact(&id, stage))
            .await
            .map_err(db_err)
    }

    pub async fn usage(&self, run_id: &str) -> Result<UsageMetrics, RegistryError> {
        self.load(run_id).await?;
        let id = run_id.to_string();
        self.db
            .call(move |db| db.sum_usage(&id))
            .await
            .map_err(db_err)
    }
}
