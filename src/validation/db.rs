use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::*;

const IDEA_PREVIEW_CHARS: usize = 50;

/// Async-safe handle to the validation database.
///
/// Wraps `ValidationDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ValidationDb>>,
}

impl DbHandle {
    pub fn new(db: ValidationDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ValidationDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup and tests only,
    /// never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, ValidationDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

/// Outcome of a report write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportWrite {
    Inserted,
    Rewritten,
    /// The one allowed rewrite was already used; nothing was written.
    Refused,
}

pub struct ValidationDb {
    conn: Connection,
}

impl ValidationDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS runs (
                    run_id TEXT PRIMARY KEY,
                    input_json TEXT NOT NULL,
                    idea_one_liner TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'queued',
                    progress INTEGER NOT NULL DEFAULT 0,
                    current_step TEXT,
                    verdict TEXT,
                    initial_verdict TEXT,
                    revision_attempted INTEGER NOT NULL DEFAULT 0,
                    error_message TEXT,
                    suggestions TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS run_transitions (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
                    from_status TEXT NOT NULL,
                    to_status TEXT NOT NULL,
                    progress INTEGER NOT NULL,
                    at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS stage_artifacts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
                    stage_key TEXT NOT NULL,
                    ordinal INTEGER NOT NULL,
                    pass TEXT NOT NULL,
                    content TEXT NOT NULL,
                    context TEXT NOT NULL,
                    verdict TEXT,
                    usage_json TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    UNIQUE(run_id, stage_key)
                );

                CREATE TABLE IF NOT EXISTS stage_usage (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
                    stage_key TEXT NOT NULL,
                    pass TEXT NOT NULL,
                    prompt_tokens INTEGER NOT NULL DEFAULT 0,
                    completion_tokens INTEGER NOT NULL DEFAULT 0,
                    total_tokens INTEGER NOT NULL DEFAULT 0,
                    successful_requests INTEGER NOT NULL DEFAULT 0,
                    estimated_cost_usd REAL NOT NULL DEFAULT 0,
                    elapsed_ms INTEGER NOT NULL DEFAULT 0,
                    recorded_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS reports (
                    run_id TEXT PRIMARY KEY REFERENCES runs(run_id) ON DELETE CASCADE,
                    verdict TEXT,
                    initial_verdict TEXT,
                    markdown TEXT NOT NULL,
                    saved_count INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_runs_created ON runs(created_at);
                CREATE INDEX IF NOT EXISTS idx_run_transitions_run ON run_transitions(run_id);
                CREATE INDEX IF NOT EXISTS idx_stage_artifacts_run ON stage_artifacts(run_id);
                CREATE INDEX IF NOT EXISTS idx_stage_usage_run ON stage_usage(run_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Runs ──────────────────────────────────────────────────────────

    pub fn insert_run(&self, run: &Run) -> Result<()> {
        let input_json =
            serde_json::to_string(&run.input).context("Failed to serialize run input")?;
        let suggestions =
            serde_json::to_string(&run.suggestions).context("Failed to serialize suggestions")?;
        self.conn
            .execute(
                "INSERT INTO runs (run_id, input_json, idea_one_liner, status, progress, current_step,
                                   verdict, initial_verdict, revision_attempted, error_message,
                                   suggestions, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    run.run_id,
                    input_json,
                    run.input.idea_one_liner,
                    run.status.as_str(),
                    run.progress,
                    run.current_step,
                    run.verdict.map(|v| v.as_str()),
                    run.initial_verdict.map(|v| v.as_str()),
                    run.revision_attempted,
                    run.error_message,
                    suggestions,
                    run.created_at,
                    run.updated_at,
                ],
            )
            .context("Failed to insert run")?;
        Ok(())
    }

    /// Overwrite every mutable column of a run.
    pub fn update_run(&self, run: &Run) -> Result<()> {
        let suggestions =
            serde_json::to_string(&run.suggestions).context("Failed to serialize suggestions")?;
        let changed = self
            .conn
            .execute(
                "UPDATE runs SET status = ?1, progress = ?2, current_step = ?3, verdict = ?4,
                                 initial_verdict = ?5, revision_attempted = ?6, error_message = ?7,
                                 suggestions = ?8, updated_at = ?9
                 WHERE run_id = ?10",
                params![
                    run.status.as_str(),
                    run.progress,
                    run.current_step,
                    run.verdict.map(|v| v.as_str()),
                    run.initial_verdict.map(|v| v.as_str()),
                    run.revision_attempted,
                    run.error_message,
                    suggestions,
                    run.updated_at,
                    run.run_id,
                ],
            )
            .context("Failed to update run")?;
        anyhow::ensure!(changed == 1, "Run {} not found for update", run.run_id);
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let row = self
            .conn
            .query_row(
                "SELECT run_id, input_json, status, progress, current_step, verdict, initial_verdict,
                        revision_attempted, error_message, suggestions, created_at, updated_at
                 FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok(RunRow {
                        run_id: row.get(0)?,
                        input_json: row.get(1)?,
                        status: row.get(2)?,
                        progress: row.get(3)?,
                        current_step: row.get(4)?,
                        verdict: row.get(5)?,
                        initial_verdict: row.get(6)?,
                        revision_attempted: row.get(7)?,
                        error_message: row.get(8)?,
                        suggestions: row.get(9)?,
                        created_at: row.get(10)?,
                        updated_at: row.get(11)?,
                    })
                },
            )
            .optional()
            .context("Failed to query run")?;
        row.map(RunRow::into_run).transpose()
    }

    /// Most recent runs first.
    pub fn list_recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT run_id, status, verdict, progress, created_at, idea_one_liner
                 FROM runs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            )
            .context("Failed to prepare list_recent_runs")?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, u8>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .context("Failed to query recent runs")?;

        let mut runs = Vec::new();
        for row in rows {
            let (run_id, status, verdict, progress, created_at, idea) =
                row.context("Failed to read run summary row")?;
            runs.push(RunSummary {
                run_id,
                status: parse_status(&status)?,
                verdict: parse_verdict(verdict.as_deref())?,
                progress,
                created_at,
                idea_preview: idea_preview(&idea),
            });
        }
        Ok(runs)
    }

    // ── Transition log ────────────────────────────────────────────────

    pub fn insert_transition(
        &self,
        run_id: &str,
        from: &RunStatus,
        to: &RunStatus,
        progress: u8,
        at: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO run_transitions (run_id, from_status, to_status, progress, at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![run_id, from.as_str(), to.as_str(), progress, at],
            )
            .context("Failed to insert run transition")?;
        Ok(())
    }

    pub fn list_transitions(&self, run_id: &str) -> Result<Vec<TransitionRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT seq, from_status, to_status, progress, at
                 FROM run_transitions WHERE run_id = ?1 ORDER BY seq ASC",
            )
            .context("Failed to prepare list_transitions")?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u8>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .context("Failed to query run transitions")?;

        let mut records = Vec::new();
        for row in rows {
            let (seq, from, to, progress, at) = row.context("Failed to read transition row")?;
            records.push(TransitionRecord {
                seq,
                from_status: parse_status(&from)?,
                to_status: parse_status(&to)?,
                progress,
                at,
            });
        }
        Ok(records)
    }

    // ── Stage artifacts ───────────────────────────────────────────────

    /// Insert or replace the artifact for `(run_id, stage)`.
    pub fn upsert_artifact(&self, artifact: &StageArtifact) -> Result<()> {
        let usage_json =
            serde_json::to_string(&artifact.usage).context("Failed to serialize stage usage")?;
        self.conn
            .execute(
                "INSERT INTO stage_artifacts (run_id, stage_key, ordinal, pass, content, context, verdict, usage_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(run_id, stage_key) DO UPDATE SET
                    pass = ?4,
                    content = ?5,
                    context = ?6,
                    verdict = ?7,
                    usage_json = ?8,
                    created_at = ?9",
                params![
                    artifact.run_id,
                    artifact.stage.key(),
                    artifact.ordinal,
                    artifact.pass.as_str(),
                    artifact.content,
                    artifact.context,
                    artifact.verdict.map(|v| v.as_str()),
                    usage_json,
                    artifact.created_at,
                ],
            )
            .context("Failed to upsert stage artifact")?;
        Ok(())
    }

    /// All artifacts of a run, in stage order.
    pub fn list_artifacts(&self, run_id: &str) -> Result<Vec<StageArtifact>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT run_id, stage_key, ordinal, pass, content, context, verdict, usage_json, created_at
                 FROM stage_artifacts WHERE run_id = ?1 ORDER BY ordinal ASC",
            )
            .context("Failed to prepare list_artifacts")?;
        let rows = stmt
            .query_map(params![run_id], ArtifactRow::from_row)
            .context("Failed to query stage artifacts")?;

        let mut artifacts = Vec::new();
        for row in rows {
            artifacts.push(row.context("Failed to read artifact row")?.into_artifact()?);
        }
        Ok(artifacts)
    }

    pub fn get_artifact(&self, run_id: &str, stage: Stage) -> Result<Option<StageArtifact>> {
        let row = self
            .conn
            .query_row(
                "SELECT run_id, stage_key, ordinal, pass, content, context, verdict, usage_json, created_at
                 FROM stage_artifacts WHERE run_id = ?1 AND stage_key = ?2",
                params![run_id, stage.key()],
                ArtifactRow::from_row,
            )
            .optional()
            .context("Failed to query stage artifact")?;
        row.map(ArtifactRow::into_artifact).transpose()
    }

    // ── Usage ledger ──────────────────────────────────────────────────

    pub fn insert_usage(
        &self,
        run_id: &str,
        stage: Stage,
        pass: PassMode,
        usage: &UsageMetrics,
        recorded_at: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO stage_usage (run_id, stage_key, pass, prompt_tokens, completion_tokens, total_tokens,
                                          successful_requests, estimated_cost_usd, elapsed_ms, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    run_id,
                    stage.key(),
                    pass.as_str(),
                    usage.prompt_tokens as i64,
                    usage.completion_tokens as i64,
                    usage.total_tokens as i64,
                    usage.successful_requests,
                    usage.estimated_cost_usd,
                    usage.elapsed_ms as i64,
                    recorded_at,
                ],
            )
            .context("Failed to insert stage usage")?;
        Ok(())
    }

    /// Sum of every ledger entry for a run. Zero when nothing was recorded.
    pub fn sum_usage(&self, run_id: &str) -> Result<UsageMetrics> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(prompt_tokens), 0), COALESCE(SUM(completion_tokens), 0),
                        COALESCE(SUM(total_tokens), 0), COALESCE(SUM(successful_requests), 0),
                        COALESCE(SUM(estimated_cost_usd), 0.0), COALESCE(SUM(elapsed_ms), 0)
                 FROM stage_usage WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok(UsageMetrics {
                        prompt_tokens: row.get::<_, i64>(0)? as u64,
                        completion_tokens: row.get::<_, i64>(1)? as u64,
                        total_tokens: row.get::<_, i64>(2)? as u64,
                        successful_requests: row.get::<_, i64>(3)? as u32,
                        estimated_cost_usd: row.get(4)?,
                        elapsed_ms: row.get::<_, i64>(5)? as u64,
                    })
                },
            )
            .context("Failed to sum stage usage")
    }

    // ── Reports ───────────────────────────────────────────────────────

    /// Insert the report, or rewrite it once.
    pub fn save_report(&self, run_id: &str, report: &NewReport, now: &str) -> Result<ReportWrite> {
        let saved_count: Option<u32> = self
            .conn
            .query_row(
                "SELECT saved_count FROM reports WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query report")?;

        match saved_count {
            None => {
                self.conn
                    .execute(
                        "INSERT INTO reports (run_id, verdict, initial_verdict, markdown, saved_count, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
                        params![
                            run_id,
                            report.verdict.map(|v| v.as_str()),
                            report.initial_verdict.map(|v| v.as_str()),
                            report.markdown,
                            now,
                        ],
                    )
                    .context("Failed to insert report")?;
                Ok(ReportWrite::Inserted)
            }
            Some(1) => {
                self.conn
                    .execute(
                        "UPDATE reports SET verdict = ?1, initial_verdict = ?2, markdown = ?3,
                                            saved_count = 2, updated_at = ?4
                         WHERE run_id = ?5",
                        params![
                            report.verdict.map(|v| v.as_str()),
                            report.initial_verdict.map(|v| v.as_str()),
                            report.markdown,
                            now,
                            run_id,
                        ],
                    )
                    .context("Failed to rewrite report")?;
                Ok(ReportWrite::Rewritten)
            }
            Some(_) => Ok(ReportWrite::Refused),
        }
    }

    /// Remove a run's report. Returns whether a row existed.
    pub fn delete_report(&self, run_id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM reports WHERE run_id = ?1", params![run_id])
            .context("Failed to delete report")?;
        Ok(deleted > 0)
    }

    pub fn get_report(&self, run_id: &str) -> Result<Option<Report>> {
        let row = self
            .conn
            .query_row(
                "SELECT run_id, verdict, initial_verdict, markdown, saved_count, created_at, updated_at
                 FROM reports WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query report")?;

        match row {
            Some((run_id, verdict, initial, markdown, saved_count, created_at, updated_at)) => {
                Ok(Some(Report {
                    run_id,
                    verdict: parse_verdict(verdict.as_deref())?,
                    initial_verdict: parse_verdict(initial.as_deref())?,
                    markdown,
                    saved_count,
                    created_at,
                    updated_at,
                }))
            }
            None => Ok(None),
        }
    }
}

// ── Internal row helpers ──────────────────────────────────────────────

fn parse_status(s: &str) -> Result<RunStatus> {
    RunStatus::from_str(s)
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to parse run status")
}

fn parse_verdict(s: Option<&str>) -> Result<Option<Verdict>> {
    s.map(|v| {
        Verdict::from_str(v)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse verdict")
    })
    .transpose()
}

fn idea_preview(idea: &str) -> String {
    if idea.chars().count() > IDEA_PREVIEW_CHARS {
        let head: String = idea.chars().take(IDEA_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        idea.to_string()
    }
}

/// Intermediate row struct for runs before converting the status, verdict
/// and JSON columns into typed values.
struct RunRow {
    run_id: String,
    input_json: String,
    status: String,
    progress: u8,
    current_step: Option<String>,
    verdict: Option<String>,
    initial_verdict: Option<String>,
    revision_attempted: bool,
    error_message: Option<String>,
    suggestions: String,
    created_at: String,
    updated_at: String,
}

impl RunRow {
    fn into_run(self) -> Result<Run> {
        let input: RunInput =
            serde_json::from_str(&self.input_json).context("Failed to parse run input JSON")?;
        let suggestions: Vec<String> =
            serde_json::from_str(&self.suggestions).context("Failed to parse suggestions JSON")?;
        Ok(Run {
            run_id: self.run_id,
            input,
            status: parse_status(&self.status)?,
            progress: self.progress,
            current_step: self.current_step,
            verdict: parse_verdict(self.verdict.as_deref())?,
            initial_verdict: parse_verdict(self.initial_verdict.as_deref())?,
            revision_attempted: self.revision_attempted,
            error_message: self.error_message,
            suggestions,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct ArtifactRow {
    run_id: String,
    stage_key: String,
    ordinal: u8,
    pass: String,
    content: String,
    context: String,
    verdict: Option<String>,
    usage_json: String,
    created_at: String,
}

impl ArtifactRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            stage_key: row.get(1)?,
            ordinal: row.get(2)?,
            pass: row.get(3)?,
            content: row.get(4)?,
            context: row.get(5)?,
            verdict: row.get(6)?,
            usage_json: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_artifact(self) -> Result<StageArtifact> {
        let stage = Stage::from_str(&self.stage_key)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse stage key")?;
        let pass = PassMode::from_str(&self.pass)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse pass mode")?;
        let usage: UsageMetrics =
            serde_json::from_str(&self.usage_json).context("Failed to parse stage usage JSON")?;
        Ok(StageArtifact {
            run_id: self.run_id,
            stage,
            ordinal: self.ordinal,
            pass,
            content: self.content,
            context: self.context,
            verdict: parse_verdict(self.verdict.as_deref())?,
            usage,
            created_at: self.created_at,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input(idea: &str) -> RunInput {
        RunInput {
            idea_one_liner: idea.to_string(),
            target_customer: "Freelance developers".to_string(),
            problem_statement: "Tax filing takes days every May".to_string(),
            current_alternatives: "Accountants".to_string(),
            geo_market: GeoMarket::Kr,
            business_type: BusinessType::B2c,
            constraints: None,
            success_definition: Some("100 paying users".to_string()),
        }
    }

    fn sample_run(run_id: &str, idea: &str, created_at: &str) -> Run {
        Run {
            run_id: run_id.to_string(),
            input: sample_input(idea),
            status: RunStatus::Queued,
            progress: 0,
            current_step: None,
            verdict: None,
            initial_verdict: None,
            revision_attempted: false,
            error_message: None,
            suggestions: Vec::new(),
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
        }
    }

    fn sample_artifact(run_id: &str, stage: Stage, content: &str) -> StageArtifact {
        StageArtifact {
            run_id: run_id.to_string(),
            stage,
            ordinal: stage.ordinal(),
            pass: PassMode::Full,
            content: content.to_string(),
            context: content.to_string(),
            verdict: None,
            usage: UsageMetrics::default(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = ValidationDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table'
             AND name IN ('runs', 'run_transitions', 'stage_artifacts', 'stage_usage', 'reports')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 5, "Expected 5 tables to exist");

        // Re-running migrations is harmless.
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_insert_and_get_run() -> Result<()> {
        let db = ValidationDb::new_in_memory()?;
        let run = sample_run("web_1", "Tax automation", "2026-01-01T00:00:00Z");
        db.insert_run(&run)?;

        let fetched = db.get_run("web_1")?.expect("run should exist");
        assert_eq!(fetched.input, run.input);
        assert_eq!(fetched.status, RunStatus::Queued);
        assert!(!fetched.revision_attempted);
        assert!(db.get_run("missing")?.is_none());
        Ok(())
    }

    #[test]
    fn test_update_run_roundtrips_all_fields() -> Result<()> {
        let db = ValidationDb::new_in_memory()?;
        let mut run = sample_run("web_1", "Tax automation", "2026-01-01T00:00:00Z");
        db.insert_run(&run)?;

        run.status = RunStatus::Analyzing;
        run.progress = 42;
        run.current_step = Some("Mining market gaps".to_string());
        run.verdict = Some(Verdict::Hold);
        run.initial_verdict = Some(Verdict::No);
        run.revision_attempted = true;
        run.suggestions = vec!["be specific".to_string()];
        db.update_run(&run)?;

        let fetched = db.get_run("web_1")?.expect("run should exist");
        assert_eq!(fetched.status, RunStatus::Analyzing);
        assert_eq!(fetched.progress, 42);
        assert_eq!(fetched.current_step.as_deref(), Some("Mining market gaps"));
        assert_eq!(fetched.verdict, Some(Verdict::Hold));
        assert_eq!(fetched.initial_verdict, Some(Verdict::No));
        assert!(fetched.revision_attempted);
        assert_eq!(fetched.suggestions, vec!["be specific".to_string()]);
        Ok(())
    }

    #[test]
    fn test_update_missing_run_fails() -> Result<()> {
        let db = ValidationDb::new_in_memory()?;
        let run = sample_run("ghost", "Idea", "2026-01-01T00:00:00Z");
        assert!(db.update_run(&run).is_err());
        Ok(())
    }

    #[test]
    fn test_list_recent_runs_order_and_preview() -> Result<()> {
        let db = ValidationDb::new_in_memory()?;
        db.insert_run(&sample_run("a", "first", "2026-01-01T00:00:00Z"))?;
        db.insert_run(&sample_run("b", &"x".repeat(80), "2026-01-02T00:00:00Z"))?;
        db.insert_run(&sample_run("c", "third", "2026-01-03T00:00:00Z"))?;

        let runs = db.list_recent_runs(2)?;
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "c");
        assert_eq!(runs[1].run_id, "b");
        assert_eq!(runs[1].idea_preview, format!("{}...", "x".repeat(50)));
        assert_eq!(runs[0].idea_preview, "third");
        Ok(())
    }

    #[test]
    fn test_transitions_are_ordered() -> Result<()> {
        let db = ValidationDb::new_in_memory()?;
        db.insert_run(&sample_run("r", "idea", "2026-01-01T00:00:00Z"))?;
        db.insert_transition("r", &RunStatus::Queued, &RunStatus::PregateChecking, 0, "t1")?;
        db.insert_transition("r", &RunStatus::PregateChecking, &RunStatus::Researching, 0, "t2")?;

        let log = db.list_transitions("r")?;
        assert_eq!(log.len(), 2);
        assert!(log[0].seq < log[1].seq);
        assert_eq!(log[1].to_status, RunStatus::Researching);
        Ok(())
    }

    #[test]
    fn test_artifact_upsert_replaces_content() -> Result<()> {
        let db = ValidationDb::new_in_memory()?;
        db.insert_run(&sample_run("r", "idea", "2026-01-01T00:00:00Z"))?;
        db.upsert_artifact(&sample_artifact("r", Stage::MineGaps, "v1"))?;
        db.upsert_artifact(&sample_artifact("r", Stage::DiscoverCompetitors, "comp"))?;
        db.upsert_artifact(&sample_artifact("r", Stage::MineGaps, "v2"))?;

        let all = db.list_artifacts("r")?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].stage, Stage::DiscoverCompetitors);
        let gaps = db.get_artifact("r", Stage::MineGaps)?.expect("artifact should exist");
        assert_eq!(gaps.content, "v2");
        assert!(db.get_artifact("r", Stage::FinalReport)?.is_none());
        Ok(())
    }

    #[test]
    fn test_usage_ledger_sums() -> Result<()> {
        let db = ValidationDb::new_in_memory()?;
        db.insert_run(&sample_run("r", "idea", "2026-01-01T00:00:00Z"))?;
        assert_eq!(db.sum_usage("r")?, UsageMetrics::default());

        let usage = UsageMetrics {
            prompt_tokens: 100,
            completion_tokens: 20,
            total_tokens: 120,
            successful_requests: 1,
            estimated_cost_usd: 0.5,
            elapsed_ms: 7,
        };
        db.insert_usage("r", Stage::MineGaps, PassMode::Full, &usage, "t")?;
        db.insert_usage("r", Stage::FinalReport, PassMode::RevisionTail, &usage, "t")?;

        let total = db.sum_usage("r")?;
        assert_eq!(total.total_tokens, 240);
        assert_eq!(total.successful_requests, 2);
        assert!((total.estimated_cost_usd - 1.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_report_allows_one_rewrite() -> Result<()> {
        let db = ValidationDb::new_in_memory()?;
        db.insert_run(&sample_run("r", "idea", "2026-01-01T00:00:00Z"))?;
        let report = NewReport {
            verdict: Some(Verdict::No),
            initial_verdict: None,
            markdown: "# first".to_string(),
        };
        assert_eq!(db.save_report("r", &report, "t1")?, ReportWrite::Inserted);

        let rewrite = NewReport {
            markdown: "# second".to_string(),
            ..report.clone()
        };
        assert_eq!(db.save_report("r", &rewrite, "t2")?, ReportWrite::Rewritten);
        assert_eq!(db.save_report("r", &report, "t3")?, ReportWrite::Refused);

        let stored = db.get_report("r")?.expect("report should exist");
        assert_eq!(stored.markdown, "# second");
        assert_eq!(stored.saved_count, 2);
        assert_eq!(stored.created_at, "t1");
        assert_eq!(stored.updated_at, "t2");
        Ok(())
    }
}
