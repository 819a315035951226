use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{AnalysisCapability, StageOutput, StageParams};
use crate::compaction::ContextBundle;
use crate::errors::CapabilityError;
use crate::validation::models::{Stage, UsageMetrics, Verdict};

/// Flat price used for scripted usage, per million tokens.
const SCRIPTED_COST_PER_MILLION: f64 = 1.5;

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub stage: Stage,
    /// Characters of rendered context the stage received.
    pub context_chars: usize,
    pub context_ceiling: usize,
}

/// Deterministic stand-in for the analysis provider.
///
/// Every stage gets a canned markdown answer. Review stages consume the
/// queued verdicts in order and fall back to GO once the queue is empty.
/// Used by tests and by `serve --dry-run`.
#[derive(Default)]
pub struct ScriptedCapability {
    outputs: HashMap<Stage, String>,
    verdicts: Mutex<VecDeque<Verdict>>,
    failures: HashSet<Stage>,
    delay: Option<Duration>,
    calls: Mutex<Vec<ScriptedCall>>,
}

impl ScriptedCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verdicts handed out to review and recheck, in call order.
    pub fn with_verdicts(self, verdicts: impl IntoIterator<Item = Verdict>) -> Self {
        *self.verdicts.lock().unwrap_or_else(|e| e.into_inner()) = verdicts.into_iter().collect();
        self
    }

    /// Replace a stage's canned answer. Review answers are used verbatim,
    /// so omitting the verdict line exercises the malformed-output path.
    pub fn with_output(mut self, stage: Stage, text: impl Into<String>) -> Self {
        self.outputs.insert(stage, text.into());
        self
    }

    /// Make a stage fail as if the provider were down.
    pub fn failing_at(mut self, stage: Stage) -> Self {
        self.failures.insert(stage);
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn invoked_stages(&self) -> Vec<Stage> {
        self.calls().into_iter().map(|c| c.stage).collect()
    }

    fn next_verdict(&self) -> Verdict {
        self.verdicts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Verdict::Go)
    }

    fn answer(&self, stage: Stage) -> String {
        if let Some(text) = self.outputs.get(&stage) {
            return text.clone();
        }
        match stage {
            Stage::RedTeamReview | Stage::RedTeamRecheck => format!(
                "{}\n\nVERDICT: {}",
                canned_output(stage),
                self.next_verdict().landing_label()
            ),
            _ => canned_output(stage),
        }
    }
}

fn canned_output(stage: Stage) -> String {
    match stage {
        Stage::DiscoverCompetitors => {
            let items: Vec<String> = (1..=10)
                .map(|i| {
                    format!(
                        "{{\"name\": \"Competitor {i}\", \"url\": \"https://competitor{i}.example\", \
                         \"segment\": \"SMB\", \"pricing\": \"$19/mo\", \
                         \"notes\": \"Strong search presence, weak onboarding, no mobile app, generic messaging\"}}"
                    )
                })
                .collect();
            let candidates: Vec<String> = (1..=20).map(|i| format!("\"Candidate {i}\"")).collect();
            format!(
                "Competitor scan complete.\n```json\n{{\"items\": [{}], \"candidates\": [{}]}}\n```",
                items.join(", "),
                candidates.join(", ")
            )
        }
        Stage::CompactCompetitors => "| Competitor | Segment | Promise | Price |\n|---|---|---|---|\n\
             | Competitor 1 | SMB | Faster filing | $19/mo |\n| Competitor 2 | SMB | Fewer errors | $25/mo |\n\n\
             - All target generalist small businesses\n- Pricing clusters around $20/mo\n- None specialize by profession"
            .to_string(),
        Stage::AnalyzeChannels => "# Channel analysis\n\nSearch ads dominate acquisition across the field.\n\
             Most competitors also run generic webinars with low attendance.\n\n\
             ## Saturated\n- Paid search on tax keywords\n- Accountant referral programs\n\n\
             ## Underused\n- Profession-specific communities\n- Invoicing tool integrations"
            .to_string(),
        Stage::ExtractValueProps => "# Value propositions\n\n- Competitor 1: file in minutes\n\
             - Competitor 2: never miss a deduction\n\n## Unaddressed pains\n- Irregular income planning"
            .to_string(),
        Stage::SummarizeResearch => "# Research summary\n\n- Crowded generalist market\n\
             - Channels: search saturated, communities open\n- Gap candidates: profession focus, income smoothing"
            .to_string(),
        Stage::MineGaps => "# Market gaps\n\n1. Profession-specific filing for freelance developers\n\
             2. Quarterly estimate planning for irregular income\n\nTarget: gap 1."
            .to_string(),
        Stage::CreatePositioning => "# Positioning\n\n**For** freelance developers **who** dread tax season, \
             a filing assistant that knows developer expenses.\n\n\
             Headline: Taxes that understand your stack."
            .to_string(),
        Stage::RedTeamReview => "# Red-team review\n\n- Differentiation is thin against generalists\n\
             - Willingness to pay is unproven"
            .to_string(),
        Stage::RevisePositioning => "# Revised positioning\n\nNarrowed to freelance developers with \
             foreign clients, where currency and withholding rules create real pain.\n\n\
             ## Changelog\n- Narrowed segment\n- Added proof point on withholding"
            .to_string(),
        Stage::RedTeamRecheck => "# Red-team recheck\n\n- Segment now specific\n- Pricing evidence still thin"
            .to_string(),
        Stage::FinalReport => "## Executive summary\n\nA focused filing assistant for freelance developers \
             has a defensible niche.\n\n## Next steps\n- Launch a landing page test\n- Interview 10 developers"
            .to_string(),
    }
}

#[async_trait]
impl AnalysisCapability for ScriptedCapability {
    async fn invoke(
        &self,
        stage: Stage,
        context: &ContextBundle,
        params: &StageParams,
    ) -> Result<StageOutput, CapabilityError> {
        let rendered = context.render();
        let context_chars = rendered.chars().count();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ScriptedCall {
                stage,
                context_chars,
                context_ceiling: context.ceiling(),
            });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failures.contains(&stage) {
            return Err(CapabilityError::Unreachable(format!(
                "scripted provider outage at {} for run {}",
                stage, params.run_id
            )));
        }

        let text = self.answer(stage);
        let prompt_tokens = (context_chars / 4) as u64;
        let completion_tokens = (text.chars().count() / 4) as u64;
        let usage = UsageMetrics {
            prompt_tokens,
            completion_tokens,
            total_tokens: 0,
            successful_requests: 1,
            estimated_cost_usd: 0.0,
            elapsed_ms: self.delay.map(|d| d.as_millis() as u64).unwrap_or(0),
        }
        .priced(SCRIPTED_COST_PER_MILLION);

        Ok(StageOutput { text, usage })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
