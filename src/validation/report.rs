use chrono::Utc;

use super::db::{DbHandle, ReportWrite};
use super::models::{NewReport, Report, Run, RunStatus, UsageMetrics, Verdict};
use crate::errors::ReportError;

/// Stored reports for completed runs.
///
/// A report is written once, and may be rewritten exactly once more (the
/// revision pass). Anything beyond that is refused.
#[derive(Clone)]
pub struct ReportStore {
    db: DbHandle,
}

impl ReportStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub async fn save(&self, run_id: &str, report: NewReport) -> Result<Report, ReportError> {
        let id = run_id.to_string();
        let now = Utc::now().to_rfc3339();
        let write = self
            .db
            .call(move |db| db.save_report(&id, &report, &now))
            .await
            .map_err(ReportError::Database)?;
        match write {
            ReportWrite::Refused => Err(ReportError::AlreadyFinal {
                run_id: run_id.to_string(),
            }),
            ReportWrite::Inserted | ReportWrite::Rewritten => {
                tracing::info!(run_id = %run_id, write = ?write, "Report saved");
                self.get(run_id).await
            }
        }
    }

    pub async fn get(&self, run_id: &str) -> Result<Report, ReportError> {
        let id = run_id.to_string();
        self.db
            .call(move |db| db.get_report(&id))
            .await
            .map_err(ReportError::Database)?
            .ok_or_else(|| ReportError::NotFound {
                run_id: run_id.to_string(),
            })
    }

    /// Drop a report that belongs to a run which did not complete.
    pub async fn discard(&self, run_id: &str) -> Result<bool, ReportError> {
        let id = run_id.to_string();
        let removed = self
            .db
            .call(move |db| db.delete_report(&id))
            .await
            .map_err(ReportError::Database)?;
        if removed {
            tracing::warn!(run_id = %run_id, "Discarded report of unfinished run");
        }
        Ok(removed)
    }

    /// The report of a run, provided the run has completed.
    pub async fn for_run(&self, run: &Run) -> Result<Report, ReportError> {
        if run.status != RunStatus::Completed {
            return Err(ReportError::NotReady {
                run_id: run.run_id.clone(),
                status: run.status.to_string(),
            });
        }
        self.get(&run.run_id).await
    }

    /// UTF-8 markdown bytes for download.
    pub async fn download(&self, run_id: &str) -> Result<Vec<u8>, ReportError> {
        Ok(self.get(run_id).await?.markdown.into_bytes())
    }

    /// Sum of the usage ledger. Independent of whether a report exists.
    pub async fn usage(&self, run_id: &str) -> Result<UsageMetrics, ReportError> {
        let id = run_id.to_string();
        self.db
            .call(move |db| db.sum_usage(&id))
            .await
            .map_err(ReportError::Database)
    }
}

// ── Composition ───────────────────────────────────────────────────────

/// Inputs to [`compose_report`] gathered from the run's artifacts.
#[derive(Debug, Clone, Default)]
pub struct ReportSections {
    /// Body produced by the final report stage.
    pub final_body: String,
    pub original_review: Option<String>,
    pub recheck: Option<String>,
    pub usage: UsageMetrics,
}

fn verdict_marker(verdict: Option<Verdict>) -> &'static str {
    match verdict {
        Some(Verdict::Go) => "🟢",
        Some(Verdict::Hold) => "🟡",
        Some(Verdict::No) => "🔴",
        None => "⚪",
    }
}

fn verdict_message(verdict: Option<Verdict>) -> &'static str {
    match verdict {
        Some(Verdict::Go) => "worth running a market test",
        Some(Verdict::Hold) => "tighten the experiment design before testing",
        Some(Verdict::No) => "sharpen the input or rethink the idea",
        None => "no verdict recorded",
    }
}

fn label(verdict: Option<Verdict>) -> &'static str {
    verdict.map(|v| v.landing_label()).unwrap_or("PENDING")
}

/// Build the final markdown report for a run.
///
/// `run.verdict` is the verdict the report is issued under. When
/// `run.initial_verdict` is set a revision happened, and both verdicts are
/// shown along with whether the revision cleared the gate.
pub fn compose_report(run: &Run, sections: &ReportSections) -> String {
    let input = &run.input;
    let mut out = String::new();

    // Header
    out.push_str("# Gap Foundry Validation Report\n\n");
    out.push_str(&format!(
        "**{} {}: {}**\n\n",
        verdict_marker(run.verdict),
        label(run.verdict),
        verdict_message(run.verdict)
    ));
    out.push_str(&format!("- **Run ID:** `{}`\n", run.run_id));
    out.push_str(&format!(
        "- **Market:** {} | **Type:** {}\n",
        input.geo_market.as_str(),
        input.business_type.as_str()
    ));
    out.push_str(&format!("- **Started:** {}\n\n---\n\n", run.created_at));

    // Idea anchor
    out.push_str("## Idea Anchor\n\n");
    out.push_str(&input.anchor_markdown());
    out.push_str(
        "\n\nEvery judgement below was made against this idea as submitted, without reshaping it.\n\n---\n\n",
    );

    // Verdict summary
    out.push_str("## Validation Gate\n\n");
    match run.initial_verdict {
        Some(initial) => {
            out.push_str("| Pass | Verdict |\n|---|---|\n");
            out.push_str(&format!("| Initial review | {} |\n", initial.landing_label()));
            out.push_str(&format!("| After revision | {} |\n\n", label(run.verdict)));
            if run.verdict.is_some_and(|v| v.is_failing()) {
                out.push_str(&format!(
                    "> The revision did not clear the gate. The recheck still returned {}.\n\n",
                    label(run.verdict)
                ));
            } else {
                out.push_str("> The revision cleared the gate.\n\n");
            }
        }
        None => {
            out.push_str(&format!(
                "Single review pass: **{}**\n\n",
                label(run.verdict)
            ));
        }
    }
    out.push_str("---\n\n");

    // Body
    out.push_str("## Final Report\n\n");
    out.push_str(sections.final_body.trim());
    out.push_str("\n\n---\n\n");

    // Audit trail
    out.push_str("## Review Audit Trail\n\n");
    match &sections.original_review {
        Some(review) => {
            out.push_str("### Red-team review\n\n");
            out.push_str(review.trim());
            out.push_str("\n\n");
        }
        None => out.push_str("_No review recorded._\n\n"),
    }
    if let Some(recheck) = &sections.recheck {
        out.push_str("### Red-team recheck\n\n");
        out.push_str(recheck.trim());
        out.push_str("\n\n");
    }
    out.push_str("---\n\n");

    // Usage footer
    let u = &sections.usage;
    out.push_str("## Usage\n\n| Metric | Value |\n|---|---|\n");
    out.push_str(&format!("| Total tokens | {} |\n", u.total_tokens));
    out.push_str(&format!("| Prompt tokens | {} |\n", u.prompt_tokens));
    out.push_str(&format!("| Completion tokens | {} |\n", u.completion_tokens));
    out.push_str(&format!("| Requests | {} |\n", u.successful_requests));
    out.push_str(&format!("| Estimated cost | ${:.4} USD |\n", u.estimated_cost_usd));
    out.push_str(&format!("| Elapsed | {:.1}s |\n", u.elapsed_ms as f64 / 1000.0));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::db::ValidationDb;
    use crate::validation::models::{BusinessType, GeoMarket, RunInput};

    fn run(verdict: Option<Verdict>, initial: Option<Verdict>) -> Run {
        Run {
            run_id: "web_20260101_000000_abcdef".to_string(),
            input: RunInput {
                idea_one_liner: "Automatic tax filing for freelance developers".to_string(),
                target_customer: "Freelance developers".to_string(),
                problem_statement: "Filing takes two nights every May".to_string(),
                current_alternatives: "Accountants".to_string(),
                geo_market: GeoMarket::Kr,
                business_type: BusinessType::B2c,
                constraints: None,
                success_definition: None,
            },
            status: RunStatus::Completed,
            progress: 100,
            current_step: None,
            verdict,
            initial_verdict: initial,
            revision_attempted: initial.is_some(),
            error_message: None,
            suggestions: Vec::new(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:10:00Z".to_string(),
        }
    }

    fn sections() -> ReportSections {
        ReportSections {
            final_body: "## Executive summary\n\nBody".to_string(),
            original_review: Some("Review text\n\nVERDICT: LANDING_NO".to_string()),
            recheck: None,
            usage: UsageMetrics {
                total_tokens: 1234,
                successful_requests: 9,
                estimated_cost_usd: 0.0123,
                elapsed_ms: 4500,
                ..Default::default()
            },
        }
    }

    fn store_with_run(id: &str) -> ReportStore {
        let db = ValidationDb::new_in_memory().unwrap();
        let mut r = run(None, None);
        r.run_id = id.to_string();
        db.insert_run(&r).unwrap();
        ReportStore::new(DbHandle::new(db))
    }

    fn new_report(markdown: &str) -> NewReport {
        NewReport {
            verdict: Some(Verdict::Go),
            initial_verdict: None,
            markdown: markdown.to_string(),
        }
    }

    #[test]
    fn test_compose_single_pass() {
        let md = compose_report(&run(Some(Verdict::Go), None), &sections());
        assert!(md.starts_with("# Gap Foundry Validation Report"));
        assert!(md.contains("🟢 LANDING_GO"));
        assert!(md.contains("## Idea Anchor"));
        assert!(md.contains("Automatic tax filing for freelance developers"));
        assert!(md.contains("Single review pass: **LANDING_GO**"));
        assert!(md.contains("## Executive summary"));
        assert!(md.contains("### Red-team review"));
        assert!(!md.contains("### Red-team recheck"));
        assert!(md.contains("| Total tokens | 1234 |"));
        assert!(md.contains("$0.0123 USD"));
        assert!(md.contains("| Elapsed | 4.5s |"));
    }

    #[test]
    fn test_compose_revision_not_cleared() {
        let mut s = sections();
        s.recheck = Some("Still weak\n\nVERDICT: LANDING_NO".to_string());
        let md = compose_report(&run(Some(Verdict::No), Some(Verdict::No)), &s);
        assert!(md.contains("| Initial review | LANDING_NO |"));
        assert!(md.contains("| After revision | LANDING_NO |"));
        assert!(md.contains("The revision did not clear the gate"));
        assert!(md.contains("### Red-team recheck"));
        assert!(md.contains("Still weak"));
    }

    #[test]
    fn test_compose_revision_cleared() {
        let md = compose_report(&run(Some(Verdict::Go), Some(Verdict::Hold)), &sections());
        assert!(md.contains("| Initial review | LANDING_HOLD |"));
        assert!(md.contains("The revision cleared the gate."));
    }

    #[tokio::test]
    async fn test_save_then_rewrite_once() {
        let store = store_with_run("r1");
        let first = store.save("r1", new_report("# one")).await.unwrap();
        assert_eq!(first.saved_count, 1);
        let second = store.save("r1", new_report("# two")).await.unwrap();
        assert_eq!(second.saved_count, 2);
        assert_eq!(second.markdown, "# two");

        let err = store.save("r1", new_report("# three")).await.unwrap_err();
        assert!(matches!(err, ReportError::AlreadyFinal { .. }));
        assert_eq!(store.download("r1").await.unwrap(), b"# two".to_vec());
    }

    #[tokio::test]
    async fn test_missing_report_and_not_ready() {
        let store = store_with_run("r1");
        assert!(matches!(
            store.get("r1").await.unwrap_err(),
            ReportError::NotFound { .. }
        ));

        let mut analyzing = run(None, None);
        analyzing.run_id = "r1".to_string();
        analyzing.status = RunStatus::Analyzing;
        let err = store.for_run(&analyzing).await.unwrap_err();
        assert_eq!(err.to_string(), "Report not ready. Current status: analyzing");
    }

    #[tokio::test]
    async fn test_usage_without_ledger_is_zero() {
        let store = store_with_run("r1");
        assert_eq!(store.usage("r1").await.unwrap(), UsageMetrics::default());
    }

    #[tokio::test]
    async fn test_discard_removes_saved_report() {
        let store = store_with_run("r1");
        store.save("r1", new_report("# one")).await.unwrap();

        assert!(store.discard("r1").await.unwrap());
        assert!(matches!(
            store.get("r1").await.unwrap_err(),
            ReportError::NotFound { .. }
        ));
        assert!(!store.discard("r1").await.unwrap());
    }
}
