use super::models::Verdict;
use super::pipeline::PipelineExecutor;
use crate::config::RevisionConfig;
use crate::errors::RunError;

/// Decides whether a failing review earns the one revision pass.
///
/// The one-shot rule lives on the run record (`revision_attempted`), so a
/// second failing verdict can never trigger another tail.
#[derive(Debug, Clone, Default)]
pub struct RevisionController {
    config: RevisionConfig,
}

impl RevisionController {
    pub fn new(config: RevisionConfig) -> Self {
        Self { config }
    }

    fn wants(&self, verdict: Verdict) -> bool {
        self.config.enabled
            && match verdict {
                Verdict::Go => false,
                Verdict::Hold => self.config.revise_on_hold,
                Verdict::No => self.config.revise_on_no,
            }
    }

    /// Run the revision tail if the review verdict calls for it.
    ///
    /// Returns true when the tail ran, in which case it has already
    /// synthesized the report and completed the run.
    pub async fn maybe_revise(&self, executor: &PipelineExecutor, run_id: &str) -> Result<bool, RunError> {
        let run = executor.registry().get(run_id).await?;
        let Some(verdict) = run.verdict else {
            return Ok(false);
        };
        if run.revision_attempted || !self.wants(verdict) {
            return Ok(false);
        }

        executor.registry().begin_revision(run_id).await?;
        executor
            .registry()
            .log(
                run_id,
                format!(
                    "Review returned {}; revising positioning once",
                    verdict.landing_label()
                ),
            )
            .await;

        let run = executor.run_tail(run_id).await?;
        if run.verdict.is_some_and(|v| v.is_failing()) {
            tracing::info!(
                run_id = %run_id,
                verdict = ?run.verdict,
                "Revision did not clear the gate"
            );
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_never_revises() {
        let controller = RevisionController::default();
        assert!(!controller.wants(Verdict::Go));
        assert!(controller.wants(Verdict::Hold));
        assert!(controller.wants(Verdict::No));
    }

    #[test]
    fn test_config_switches() {
        let controller = RevisionController::new(RevisionConfig {
            enabled: true,
            revise_on_hold: false,
            revise_on_no: true,
        });
        assert!(!controller.wants(Verdict::Hold));
        assert!(controller.wants(Verdict::No));

        let disabled = RevisionController::new(RevisionConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(!disabled.wants(Verdict::No));
    }
}
