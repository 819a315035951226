use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use super::capability::{AnalysisCapability, StageParams};
use super::models::*;
use super::registry::RunRegistry;
use super::report::{ReportSections, ReportStore, compose_report};
use super::revision::RevisionController;
use super::store::ArtifactStore;
use crate::compaction::{ContextBundle, compact_competitors_output, hard_truncate, summarize_markdown};
use crate::config::PipelineConfig;
use crate::errors::{CapabilityError, RunError};
use crate::pregate::PregateChecker;

/// Step label shown while the input gate runs inside the pipeline.
pub const PREGATE_STEP: &str = "Checking input specificity";

/// How a pass ended.
#[derive(Debug, Clone)]
pub struct PassOutcome {
    /// Run snapshot after the pass.
    pub run: Run,
    /// True when a full pass handed off to the revision tail, which then
    /// finished the run.
    pub revised: bool,
}

/// Drives one run through its stages.
///
/// Cheap to clone; every clone shares the same registry, stores and
/// capability. Stages of a run execute strictly in order on one task, while
/// different runs proceed concurrently.
#[derive(Clone)]
pub struct PipelineExecutor {
    registry: RunRegistry,
    reports: ReportStore,
    artifacts: ArtifactStore,
    capability: Arc<dyn AnalysisCapability>,
    config: Arc<PipelineConfig>,
    pregate: Arc<PregateChecker>,
    revision: RevisionController,
}

impl PipelineExecutor {
    pub fn new(
        registry: RunRegistry,
        reports: ReportStore,
        artifacts: ArtifactStore,
        capability: Arc<dyn AnalysisCapability>,
        config: PipelineConfig,
        pregate: Arc<PregateChecker>,
        revision: RevisionController,
    ) -> Self {
        Self {
            registry,
            reports,
            artifacts,
            capability,
            config: Arc::new(config),
            pregate,
            revision,
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn reports(&self) -> &ReportStore {
        &self.reports
    }

    pub fn artifact_store(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn capability_name(&self) -> &'static str {
        self.capability.name()
    }

    /// Run the whole drive in the background. Failures end up on the run
    /// record, never out of the task.
    pub fn start(&self, run_id: &str) -> JoinHandle<()> {
        let executor = self.clone();
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            let _ = executor.drive(&run_id).await;
        })
    }

    /// Pregate stage, full pass, and the revision tail when needed.
    ///
    /// Returns the final run snapshot. On error the run has already been
    /// moved to `failed`.
    pub async fn drive(&self, run_id: &str) -> Result<Run, RunError> {
        match self.drive_inner(run_id).await {
            Ok(run) => Ok(run),
            Err(e) => {
                self.fail_run(run_id, &e).await;
                Err(e)
            }
        }
    }

    async fn drive_inner(&self, run_id: &str) -> Result<Run, RunError> {
        let run = self.registry.get(run_id).await?;
        self.artifacts
            .write_input(run_id, &run.input)
            .await
            .map_err(RunError::Persistence)?;

        if let Some(rejected) = self.run_pregate(&run).await? {
            return Ok(rejected);
        }
        Ok(self.run(run_id, PassMode::Full).await?.run)
    }

    /// Execute one pass.
    ///
    /// `Full` runs stages 01–08, lets the revision controller decide, and
    /// synthesizes the report itself only when no revision happened.
    /// `RevisionTail` runs 09–11.
    pub async fn run(&self, run_id: &str, mode: PassMode) -> Result<PassOutcome, RunError> {
        match mode {
            PassMode::Full => {
                let input = self.registry.get(run_id).await?.input;
                for stage in mode.stages() {
                    if *stage == Stage::FinalReport {
                        continue;
                    }
                    self.execute_stage(run_id, &input, mode, *stage).await?;
                }

                if self.revision.maybe_revise(self, run_id).await? {
                    let run = self.registry.get(run_id).await?;
                    return Ok(PassOutcome { run, revised: true });
                }

                let run = self.synthesize(run_id, &input, mode).await?;
                Ok(PassOutcome { run, revised: false })
            }
            PassMode::RevisionTail => {
                let run = self.run_tail(run_id).await?;
                Ok(PassOutcome { run, revised: false })
            }
        }
    }

    /// Stages 09–11. Expects the registry to have entered revision already.
    pub async fn run_tail(&self, run_id: &str) -> Result<Run, RunError> {
        let input = self.registry.get(run_id).await?.input;
        for stage in PassMode::RevisionTail.stages() {
            if *stage == Stage::FinalReport {
                continue;
            }
            self.execute_stage(run_id, &input, PassMode::RevisionTail, *stage)
                .await?;
        }
        self.synthesize(run_id, &input, PassMode::RevisionTail).await
    }

    /// `queued → pregate_checking → researching`, or `pregate_failed` with
    /// the reasons and suggestions. Returns the rejected run in that case.
    async fn run_pregate(&self, run: &Run) -> Result<Option<Run>, RunError> {
        let run_id = run.run_id.as_str();
        self.registry
            .transition(run_id, RunUpdate::to(RunStatus::PregateChecking).step(PREGATE_STEP))
            .await?;

        let input = &run.input;
        let report = self.pregate.check(
            &input.idea_one_liner,
            &input.target_customer,
            &input.problem_statement,
            &input.current_alternatives,
        );

        if !report.is_valid {
            tracing::info!(
                run_id = %run_id,
                score = report.score,
                reasons = ?report.fail_reasons,
                "Pregate rejected run"
            );
            let rejected = self
                .registry
                .transition(
                    run_id,
                    RunUpdate::to(RunStatus::PregateFailed)
                        .progress(100)
                        .verdict(Verdict::No)
                        .error(report.fail_reasons.join("; "))
                        .suggestions(report.suggestions),
                )
                .await?;
            return Ok(Some(rejected));
        }

        self.registry
            .log(run_id, format!("Input gate passed (score {:.2})", report.score))
            .await;
        Ok(None)
    }

    /// Invoke one stage and record its artifact.
    async fn execute_stage(
        &self,
        run_id: &str,
        input: &RunInput,
        mode: PassMode,
        stage: Stage,
    ) -> Result<Run, RunError> {
        let started = self
            .registry
            .transition(run_id, RunUpdate::to(stage.status()).step(stage.label()))
            .await?;
        self.registry
            .log(run_id, format!("Started {}", stage.label()))
            .await;

        let bundle = self.build_bundle(run_id, input, stage).await?;
        let params = StageParams {
            run_id: run_id.to_string(),
            input: input.clone(),
            pass: mode,
            max_output_chars: self.config.stage_output_ceiling_chars,
        };

        tracing::debug!(
            run_id = %run_id,
            stage = %stage,
            context_chars = bundle.raw_len(),
            provider = self.capability.name(),
            "Invoking stage"
        );
        let output = self
            .capability
            .invoke(stage, &bundle, &params)
            .await
            .map_err(|source| stage_error(stage, source))?;

        let content = hard_truncate(&output.text, self.config.stage_output_ceiling_chars);
        let verdict = if stage.is_review() {
            let verdict = Verdict::parse_from_text(&content).ok_or_else(|| {
                stage_error(
                    stage,
                    CapabilityError::MalformedOutput {
                        stage: stage.key().to_string(),
                        reason: "no VERDICT line found".to_string(),
                    },
                )
            })?;
            Some(verdict)
        } else {
            None
        };

        let context = self.forward_context(run_id, stage, &content);
        let artifact = StageArtifact {
            run_id: run_id.to_string(),
            stage,
            ordinal: stage.ordinal(),
            pass: mode,
            content,
            context,
            verdict,
            usage: output.usage,
            created_at: Utc::now().to_rfc3339(),
        };
        self.artifacts
            .write_stage(run_id, stage, &artifact.content)
            .await
            .map_err(RunError::Persistence)?;
        let chars = artifact.content.chars().count();
        self.registry.record_artifact(artifact).await?;

        let weight = self.config.weights.weight(mode, stage);
        let progress = started.progress.saturating_add(weight).min(100);
        let mut update = RunUpdate::to(stage.status())
            .progress(progress)
            .step(stage.label());
        if let Some(verdict) = verdict {
            update = update.verdict(verdict);
        }
        let run = self.registry.transition(run_id, update).await?;

        tracing::info!(
            run_id = %run_id,
            stage = %stage,
            pass = mode.as_str(),
            chars,
            tokens = output.usage.total_tokens,
            progress,
            verdict = ?verdict,
            "Stage finished"
        );
        let message = match verdict {
            Some(v) => format!("Finished {}: {}", stage.label(), v.landing_label()),
            None => format!("Finished {} ({} chars)", stage.label(), chars),
        };
        self.registry.log(run_id, message).await;
        Ok(run)
    }

    /// Compress a stage's output for downstream use, then cap it.
    fn forward_context(&self, run_id: &str, stage: Stage, content: &str) -> String {
        let ceiling = self.config.context_ceiling_chars;
        let compressed = match stage {
            Stage::DiscoverCompetitors => {
                let (compacted, cut) = compact_competitors_output(content);
                if cut {
                    tracing::debug!(run_id = %run_id, "Competitor list compacted");
                }
                compacted
            }
            Stage::AnalyzeChannels => summarize_markdown(content, ceiling / 3),
            _ => content.to_string(),
        };
        hard_truncate(&compressed, ceiling)
    }

    /// Upstream contexts for `stage`, fitted to the context ceiling.
    ///
    /// The report stage reads the latest positioning and review: the revised
    /// ones when a revision ran, the originals otherwise.
    async fn build_bundle(
        &self,
        run_id: &str,
        input: &RunInput,
        stage: Stage,
    ) -> Result<ContextBundle, RunError> {
        let stored: HashMap<Stage, StageArtifact> = self
            .registry
            .artifacts(run_id)
            .await?
            .into_iter()
            .map(|a| (a.stage, a))
            .collect();

        let mut sources = stage.inputs().to_vec();
        if stage == Stage::FinalReport {
            sources.push(latest(&stored, Stage::RevisePositioning, Stage::CreatePositioning));
            sources.push(latest(&stored, Stage::RedTeamRecheck, Stage::RedTeamReview));
        }

        let mut bundle = ContextBundle::new(input.anchor_markdown(), self.config.context_ceiling_chars);
        for source in sources {
            match stored.get(&source) {
                Some(artifact) => bundle.push(source, artifact.context.clone()),
                None => tracing::warn!(
                    run_id = %run_id,
                    stage = %stage,
                    missing = %source,
                    "Upstream artifact missing from context"
                ),
            }
        }
        Ok(bundle)
    }

    /// Stage 11 plus report composition and completion.
    async fn synthesize(&self, run_id: &str, input: &RunInput, mode: PassMode) -> Result<Run, RunError> {
        let run = self
            .execute_stage(run_id, input, mode, Stage::FinalReport)
            .await?;

        let artifacts = self.registry.artifacts(run_id).await?;
        let usage = self.registry.usage(run_id).await?;
        let content_of = |stage: Stage| {
            artifacts
                .iter()
                .find(|a| a.stage == stage)
                .map(|a| a.content.clone())
        };
        let sections = ReportSections {
            final_body: content_of(Stage::FinalReport).unwrap_or_default(),
            original_review: content_of(Stage::RedTeamReview),
            recheck: content_of(Stage::RedTeamRecheck),
            usage,
        };
        let markdown = compose_report(&run, &sections);

        // Files first: the report row is the last write before `completed`.
        self.artifacts
            .write_report(run_id, &markdown)
            .await
            .map_err(RunError::Persistence)?;
        self.artifacts
            .write_index(run_id, &artifacts)
            .await
            .map_err(RunError::Persistence)?;
        self.artifacts
            .write_usage(run_id, &usage)
            .await
            .map_err(RunError::Persistence)?;
        self.reports
            .save(
                run_id,
                NewReport {
                    verdict: run.verdict,
                    initial_verdict: run.initial_verdict,
                    markdown,
                },
            )
            .await?;

        let run = self
            .registry
            .transition(run_id, RunUpdate::to(RunStatus::Completed).progress(100).clear_step())
            .await?;
        tracing::info!(
            run_id = %run_id,
            verdict = ?run.verdict,
            initial_verdict = ?run.initial_verdict,
            cost_usd = usage.estimated_cost_usd,
            "Run completed"
        );
        Ok(run)
    }

    /// Record a terminal failure. `current_step` keeps the stage that failed.
    async fn fail_run(&self, run_id: &str, err: &RunError) {
        let message = if err.is_state_machine_violation() {
            tracing::error!(run_id = %run_id, error = %err, "Orchestration bug: state machine violation");
            format!("Internal error: {}", err)
        } else {
            tracing::warn!(run_id = %run_id, error = %err, "Run failed");
            err.to_string()
        };

        if let Err(e) = self
            .registry
            .transition(run_id, RunUpdate::to(RunStatus::Failed).error(message))
            .await
        {
            tracing::error!(run_id = %run_id, error = %e, "Could not record run failure");
        }
        // A failed run has no report, even if one was saved before the failure.
        if let Err(e) = self.reports.discard(run_id).await {
            tracing::error!(run_id = %run_id, error = %e, "Could not discard report of failed run");
        }
    }
}

fn stage_error(stage: Stage, source: CapabilityError) -> RunError {
    RunError::Capability {
        stage: stage.key().to_string(),
        source,
    }
}

fn latest(stored: &HashMap<Stage, StageArtifact>, preferred: Stage, fallback: Stage) -> Stage {
    if stored.contains_key(&preferred) {
        preferred
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, RevisionConfig};
    use crate::errors::ReportError;
    use crate::validation::broadcast::ProgressBroadcaster;
    use crate::validation::capability::ScriptedCapability;
    use crate::validation::db::{DbHandle, ValidationDb};

    struct Harness {
        executor: PipelineExecutor,
        capability: Arc<ScriptedCapability>,
        _tmp: tempfile::TempDir,
    }

    fn harness_with(capability: ScriptedCapability, config: AppConfig) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let db = DbHandle::new(ValidationDb::new_in_memory().unwrap());
        let registry = RunRegistry::new(db.clone(), ProgressBroadcaster::new(64));
        let capability = Arc::new(capability);
        let executor = PipelineExecutor::new(
            registry,
            ReportStore::new(db),
            ArtifactStore::new(tmp.path().join("runs")),
            capability.clone(),
            config.pipeline.clone(),
            Arc::new(PregateChecker::new(&config.pregate).unwrap()),
            RevisionController::new(config.revision.clone()),
        );
        Harness {
            executor,
            capability,
            _tmp: tmp,
        }
    }

    fn harness(capability: ScriptedCapability) -> Harness {
        harness_with(capability, AppConfig::default())
    }

    fn input() -> RunInput {
        RunInput {
            idea_one_liner: "Automatically calculate quarterly tax estimates for freelance developers"
                .to_string(),
            target_customer: "Freelance software developers in Seoul".to_string(),
            problem_statement: "They underpay estimated tax and get penalty notices every year"
                .to_string(),
            current_alternatives: "Spreadsheets and a yearly visit to an accountant".to_string(),
            geo_market: GeoMarket::Kr,
            business_type: BusinessType::B2c,
            constraints: None,
            success_definition: None,
        }
    }

    #[tokio::test]
    async fn test_full_pass_without_revision() {
        let h = harness(ScriptedCapability::new().with_verdicts([Verdict::Go]));
        let run = h.executor.registry().create(input()).await.unwrap();

        let done = h.executor.drive(&run.run_id).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.current_step, None);
        assert_eq!(done.verdict, Some(Verdict::Go));
        assert!(!done.revision_attempted);
        assert_eq!(h.capability.invoked_stages(), Stage::FULL.to_vec());

        let report = h.executor.reports().get(&run.run_id).await.unwrap();
        assert!(report.markdown.contains("Single review pass"));
        assert_eq!(report.saved_count, 1);
    }

    #[tokio::test]
    async fn test_failing_verdict_runs_tail_once() {
        let h = harness(ScriptedCapability::new().with_verdicts([Verdict::Hold, Verdict::Go]));
        let run = h.executor.registry().create(input()).await.unwrap();

        let done = h.executor.drive(&run.run_id).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.verdict, Some(Verdict::Go));
        assert_eq!(done.initial_verdict, Some(Verdict::Hold));

        let stages = h.capability.invoked_stages();
        assert_eq!(stages.len(), 11);
        assert_eq!(stages.iter().filter(|s| **s == Stage::FinalReport).count(), 1);
        assert_eq!(
            &stages[8..],
            &[Stage::RevisePositioning, Stage::RedTeamRecheck, Stage::FinalReport]
        );
    }

    #[tokio::test]
    async fn test_revision_disabled_keeps_failing_verdict() {
        let mut config = AppConfig::default();
        config.revision = RevisionConfig {
            enabled: false,
            ..Default::default()
        };
        let h = harness_with(ScriptedCapability::new().with_verdicts([Verdict::No]), config);
        let run = h.executor.registry().create(input()).await.unwrap();

        let done = h.executor.drive(&run.run_id).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.verdict, Some(Verdict::No));
        assert!(!done.revision_attempted);
        assert!(!h.capability.invoked_stages().contains(&Stage::RevisePositioning));
    }

    #[tokio::test]
    async fn test_missing_verdict_fails_review_stage() {
        let h = harness(
            ScriptedCapability::new().with_output(Stage::RedTeamReview, "Looks risky, no conclusion."),
        );
        let run = h.executor.registry().create(input()).await.unwrap();

        let err = h.executor.drive(&run.run_id).await.unwrap_err();
        assert!(matches!(
            err,
            RunError::Capability {
                source: CapabilityError::MalformedOutput { .. },
                ..
            }
        ));
        let failed = h.executor.registry().get(&run.run_id).await.unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.current_step.as_deref(), Some(Stage::RedTeamReview.label()));
        assert!(failed.error_message.unwrap().contains("red_team_review"));
    }

    #[tokio::test]
    async fn test_pregate_rejection_inside_pipeline() {
        let h = harness(ScriptedCapability::new());
        let mut bad = input();
        bad.idea_one_liner = "app".to_string();
        let run = h.executor.registry().create(bad).await.unwrap();

        let done = h.executor.drive(&run.run_id).await.unwrap();
        assert_eq!(done.status, RunStatus::PregateFailed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.verdict, Some(Verdict::No));
        assert_eq!(done.current_step.as_deref(), Some(PREGATE_STEP));
        assert!(done.error_message.is_some());
        assert!(h.capability.invoked_stages().is_empty());
    }

    #[tokio::test]
    async fn test_contexts_never_exceed_ceiling() {
        let mut config = AppConfig::default();
        config.pipeline.context_ceiling_chars = 1_500;
        let big = "Long analysis sentence that keeps going. ".repeat(500);
        let h = harness_with(
            ScriptedCapability::new()
                .with_output(Stage::AnalyzeChannels, big.clone())
                .with_output(Stage::ExtractValueProps, big),
            config,
        );
        let run = h.executor.registry().create(input()).await.unwrap();
        h.executor.drive(&run.run_id).await.unwrap();

        for call in h.capability.calls() {
            assert_eq!(call.context_ceiling, 1_500);
            assert!(call.context_chars <= 1_500, "{:?}", call);
        }
        for artifact in h.executor.registry().artifacts(&run.run_id).await.unwrap() {
            assert!(artifact.context.chars().count() <= 1_500);
        }
    }

    #[tokio::test]
    async fn test_artifact_folder_written() {
        let h = harness(ScriptedCapability::new());
        let run = h.executor.registry().create(input()).await.unwrap();
        h.executor.drive(&run.run_id).await.unwrap();

        let dir = h.executor.artifact_store().run_dir(&run.run_id).unwrap();
        for file in [
            "_input.json",
            "01_discover_competitors.md",
            "08_red_team_review.md",
            "11_final_report.md",
            "_index.json",
            "_usage_metrics.json",
            "report.md",
        ] {
            assert!(dir.join(file).exists(), "missing {}", file);
        }
    }

    #[tokio::test]
    async fn test_failed_report_write_leaves_no_report() {
        let h = harness(ScriptedCapability::new());
        let run = h.executor.registry().create(input()).await.unwrap();
        let dir = h.executor.artifact_store().run_dir(&run.run_id).unwrap();
        std::fs::create_dir_all(dir.join("report.md")).unwrap();

        assert!(h.executor.drive(&run.run_id).await.is_err());

        let failed = h.executor.registry().get(&run.run_id).await.unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        let err = h.executor.reports().get(&run.run_id).await.unwrap_err();
        assert!(matches!(err, ReportError::NotFound { .. }));
    }
}
