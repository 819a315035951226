use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ── Run status ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    PregateChecking,
    PregateFailed,
    Researching,
    Analyzing,
    GeneratingReport,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::PregateChecking => "pregate_checking",
            Self::PregateFailed => "pregate_failed",
            Self::Researching => "researching",
            Self::Analyzing => "analyzing",
            Self::GeneratingReport => "generating_report",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PregateFailed | Self::Completed | Self::Failed)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "pregate_checking" => Ok(Self::PregateChecking),
            "pregate_failed" => Ok(Self::PregateFailed),
            "researching" => Ok(Self::Researching),
            "analyzing" => Ok(Self::Analyzing),
            "generating_report" => Ok(Self::GeneratingReport),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate that a run status transition follows the forward graph.
///
/// Non-terminal self-transitions are allowed so progress and the current
/// step can advance within a state. The revision back-edge is not part of
/// this table; it goes through `RunRegistry::begin_revision`.
pub fn is_valid_transition(from: &RunStatus, to: &RunStatus) -> bool {
    use RunStatus::*;
    if from == to {
        return !from.is_terminal();
    }
    matches!(
        (from, to),
        (Queued, PregateChecking)
            | (PregateChecking, PregateFailed)
            | (PregateChecking, Researching)
            | (Researching, Analyzing)
            | (Analyzing, GeneratingReport)
            | (GeneratingReport, Completed)
            | (Queued, Failed)
            | (PregateChecking, Failed)
            | (Researching, Failed)
            | (Analyzing, Failed)
            | (GeneratingReport, Failed)
    )
}

// ── Verdict ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Go,
    Hold,
    No,
}

static VERDICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)VERDICT\s*:\s*\**\s*(?:LANDING_|VALIDATION_)?(GO|HOLD|NO|PASS|FAIL)\b")
        .expect("verdict regex is valid")
});

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Go => "GO",
            Self::Hold => "HOLD",
            Self::No => "NO",
        }
    }

    /// Label used in reports, e.g. `LANDING_HOLD`.
    pub fn landing_label(&self) -> &'static str {
        match self {
            Self::Go => "LANDING_GO",
            Self::Hold => "LANDING_HOLD",
            Self::No => "LANDING_NO",
        }
    }

    /// NO and HOLD send the run down the revision path.
    pub fn is_failing(&self) -> bool {
        !matches!(self, Self::Go)
    }

    /// Find the first `VERDICT: ...` marker in review output.
    ///
    /// Accepts `LANDING_*`, `VALIDATION_*` and bare GO/HOLD/NO. Legacy
    /// `PASS` maps to GO and `FAIL` to NO.
    pub fn parse_from_text(text: &str) -> Option<Self> {
        let caps = VERDICT_RE.captures(text)?;
        match caps.get(1)?.as_str().to_ascii_uppercase().as_str() {
            "GO" | "PASS" => Some(Self::Go),
            "HOLD" => Some(Self::Hold),
            "NO" | "FAIL" => Some(Self::No),
            _ => None,
        }
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bare = upper
            .strip_prefix("LANDING_")
            .or_else(|| upper.strip_prefix("VALIDATION_"))
            .unwrap_or(&upper);
        match bare {
            "GO" => Ok(Self::Go),
            "HOLD" => Ok(Self::Hold),
            "NO" => Ok(Self::No),
            _ => Err(format!("Invalid verdict: {}", s)),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Input ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum GeoMarket {
    #[default]
    #[serde(rename = "KR")]
    Kr,
    #[serde(rename = "US")]
    Us,
    #[serde(rename = "Global")]
    Global,
}

impl GeoMarket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kr => "KR",
            Self::Us => "US",
            Self::Global => "Global",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum BusinessType {
    #[default]
    #[serde(rename = "B2B")]
    B2b,
    #[serde(rename = "B2C")]
    B2c,
    #[serde(rename = "B2B2C")]
    B2b2c,
}

impl BusinessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::B2b => "B2B",
            Self::B2c => "B2C",
            Self::B2b2c => "B2B2C",
        }
    }
}

/// The idea submission. Immutable once a run is created from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunInput {
    pub idea_one_liner: String,
    pub target_customer: String,
    pub problem_statement: String,
    #[serde(default)]
    pub current_alternatives: String,
    #[serde(default)]
    pub geo_market: GeoMarket,
    #[serde(default)]
    pub business_type: BusinessType,
    #[serde(default)]
    pub constraints: Option<String>,
    #[serde(default)]
    pub success_definition: Option<String>,
}

impl RunInput {
    /// The fixed restatement of the idea carried into every stage and the report.
    pub fn anchor_markdown(&self) -> String {
        let mut lines = vec![
            format!("- **Idea:** {}", self.idea_one_liner.trim()),
            format!("- **Target customer:** {}", self.target_customer.trim()),
            format!("- **Problem:** {}", self.problem_statement.trim()),
        ];
        let alternatives = self.current_alternatives.trim();
        lines.push(format!(
            "- **Current alternatives:** {}",
            if alternatives.is_empty() { "(not specified)" } else { alternatives }
        ));
        lines.push(format!(
            "- **Market:** {} / {}",
            self.geo_market.as_str(),
            self.business_type.as_str()
        ));
        if let Some(constraints) = self.constraints.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            lines.push(format!("- **Constraints:** {}", constraints));
        }
        if let Some(success) = self
            .success_definition
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            lines.push(format!("- **Success looks like:** {}", success));
        }
        lines.join("\n")
    }
}

// ── Run ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub input: RunInput,
    pub status: RunStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub verdict: Option<Verdict>,
    pub initial_verdict: Option<Verdict>,
    pub revision_attempted: bool,
    pub error_message: Option<String>,
    pub suggestions: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Row in the recent-runs listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub verdict: Option<Verdict>,
    pub progress: u8,
    pub created_at: String,
    pub idea_preview: String,
}

/// One entry of the per-run transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub seq: i64,
    pub from_status: RunStatus,
    pub to_status: RunStatus,
    pub progress: u8,
    pub at: String,
}

/// Requested change to a run record, applied by `RunRegistry::transition`.
///
/// Fields left as `None` keep their stored value.
#[derive(Debug, Clone)]
pub struct RunUpdate {
    pub status: RunStatus,
    pub progress: Option<u8>,
    pub current_step: Option<Option<String>>,
    pub verdict: Option<Verdict>,
    pub error_message: Option<String>,
    pub suggestions: Option<Vec<String>>,
}

impl RunUpdate {
    pub fn to(status: RunStatus) -> Self {
        Self {
            status,
            progress: None,
            current_step: None,
            verdict: None,
            error_message: None,
            suggestions: None,
        }
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(Some(step.into()));
        self
    }

    pub fn clear_step(mut self) -> Self {
        self.current_step = Some(None);
        self
    }

    pub fn verdict(mut self, verdict: Verdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = Some(suggestions);
        self
    }
}

// ── Stages ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PassMode {
    Full,
    RevisionTail,
}

impl PassMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::RevisionTail => "revision_tail",
        }
    }

    /// Stages executed by this pass, in order.
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            Self::Full => &Stage::FULL,
            Self::RevisionTail => &Stage::REVISION_TAIL,
        }
    }
}

impl FromStr for PassMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "revision_tail" => Ok(Self::RevisionTail),
            _ => Err(format!("Invalid pass mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DiscoverCompetitors,
    CompactCompetitors,
    AnalyzeChannels,
    ExtractValueProps,
    SummarizeResearch,
    MineGaps,
    CreatePositioning,
    RedTeamReview,
    RevisePositioning,
    RedTeamRecheck,
    FinalReport,
}

impl Stage {
    pub const FULL: [Stage; 9] = [
        Stage::DiscoverCompetitors,
        Stage::CompactCompetitors,
        Stage::AnalyzeChannels,
        Stage::ExtractValueProps,
        Stage::SummarizeResearch,
        Stage::MineGaps,
        Stage::CreatePositioning,
        Stage::RedTeamReview,
        Stage::FinalReport,
    ];

    pub const REVISION_TAIL: [Stage; 3] = [
        Stage::RevisePositioning,
        Stage::RedTeamRecheck,
        Stage::FinalReport,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::DiscoverCompetitors => "discover_competitors",
            Self::CompactCompetitors => "compact_competitors",
            Self::AnalyzeChannels => "analyze_channels",
            Self::ExtractValueProps => "extract_value_props",
            Self::SummarizeResearch => "summarize_research",
            Self::MineGaps => "mine_gaps",
            Self::CreatePositioning => "create_positioning",
            Self::RedTeamReview => "red_team_review",
            Self::RevisePositioning => "revise_positioning",
            Self::RedTeamRecheck => "red_team_recheck",
            Self::FinalReport => "final_report",
        }
    }

    /// Position in the artifact folder (`01_discover_competitors.md`, ...).
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::DiscoverCompetitors => 1,
            Self::CompactCompetitors => 2,
            Self::AnalyzeChannels => 3,
            Self::ExtractValueProps => 4,
            Self::SummarizeResearch => 5,
            Self::MineGaps => 6,
            Self::CreatePositioning => 7,
            Self::RedTeamReview => 8,
            Self::RevisePositioning => 9,
            Self::RedTeamRecheck => 10,
            Self::FinalReport => 11,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::DiscoverCompetitors => "Discovering competitors",
            Self::CompactCompetitors => "Compacting competitor list",
            Self::AnalyzeChannels => "Analyzing acquisition channels",
            Self::ExtractValueProps => "Extracting value propositions",
            Self::SummarizeResearch => "Summarizing research",
            Self::MineGaps => "Mining market gaps",
            Self::CreatePositioning => "Drafting positioning",
            Self::RedTeamReview => "Red-team review",
            Self::RevisePositioning => "Revising positioning",
            Self::RedTeamRecheck => "Red-team recheck",
            Self::FinalReport => "Synthesizing report",
        }
    }

    /// Run status while this stage executes.
    pub fn status(&self) -> RunStatus {
        match self {
            Self::DiscoverCompetitors
            | Self::CompactCompetitors
            | Self::AnalyzeChannels
            | Self::ExtractValueProps
            | Self::SummarizeResearch => RunStatus::Researching,
            Self::MineGaps
            | Self::CreatePositioning
            | Self::RedTeamReview
            | Self::RevisePositioning
            | Self::RedTeamRecheck => RunStatus::Analyzing,
            Self::FinalReport => RunStatus::GeneratingReport,
        }
    }

    /// Review stages must carry a parsable verdict.
    pub fn is_review(&self) -> bool {
        matches!(self, Self::RedTeamReview | Self::RedTeamRecheck)
    }

    /// Upstream artifacts forwarded into this stage's context bundle.
    ///
    /// `FinalReport` resolves its positioning and review inputs at run time
    /// (the revised ones win when present), so only the fixed part is listed.
    pub fn inputs(&self) -> &'static [Stage] {
        match self {
            Self::DiscoverCompetitors => &[],
            Self::CompactCompetitors => &[Stage::DiscoverCompetitors],
            Self::AnalyzeChannels | Self::ExtractValueProps => &[Stage::CompactCompetitors],
            Self::SummarizeResearch => &[Stage::AnalyzeChannels, Stage::ExtractValueProps],
            Self::MineGaps => &[Stage::CompactCompetitors, Stage::SummarizeResearch],
            Self::CreatePositioning => &[Stage::SummarizeResearch, Stage::MineGaps],
            Self::RedTeamReview => &[Stage::MineGaps, Stage::CreatePositioning],
            Self::RevisePositioning => &[
                Stage::SummarizeResearch,
                Stage::MineGaps,
                Stage::CreatePositioning,
                Stage::RedTeamReview,
            ],
            Self::RedTeamRecheck => &[Stage::MineGaps, Stage::RevisePositioning],
            Self::FinalReport => &[Stage::SummarizeResearch, Stage::MineGaps],
        }
    }

    pub fn file_stem(&self) -> String {
        format!("{:02}_{}", self.ordinal(), self.key())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Stage::FULL.as_slice(), Stage::REVISION_TAIL.as_slice()]
            .concat()
            .into_iter()
            .find(|stage| stage.key() == s)
            .ok_or_else(|| format!("Invalid stage: {}", s))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ── Usage ─────────────────────────────────────────────────────────────

/// Token, request, cost and time accounting for one or more stages.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub successful_requests: u32,
    pub estimated_cost_usd: f64,
    pub elapsed_ms: u64,
}

impl UsageMetrics {
    /// Fill in `total_tokens` and the cost estimate from a per-million rate.
    pub fn priced(mut self, cost_per_million_tokens: f64) -> Self {
        if self.total_tokens == 0 {
            self.total_tokens = self.prompt_tokens + self.completion_tokens;
        }
        self.estimated_cost_usd = self.total_tokens as f64 * cost_per_million_tokens / 1_000_000.0;
        self
    }
}

impl std::ops::Add for UsageMetrics {
    type Output = UsageMetrics;

    fn add(self, rhs: Self) -> Self::Output {
        UsageMetrics {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
            successful_requests: self.successful_requests + rhs.successful_requests,
            estimated_cost_usd: self.estimated_cost_usd + rhs.estimated_cost_usd,
            elapsed_ms: self.elapsed_ms + rhs.elapsed_ms,
        }
    }
}

impl std::ops::AddAssign for UsageMetrics {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for UsageMetrics {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(UsageMetrics::default(), |acc, u| acc + u)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageArtifact {
    pub run_id: String,
    pub stage: Stage,
    pub ordinal: u8,
    pub pass: PassMode,
    pub content: String,
    /// Compressed and truncated text forwarded to downstream stages.
    pub context: String,
    pub verdict: Option<Verdict>,
    pub usage: UsageMetrics,
    pub created_at: String,
}

// ── Reports ───────────────────────────────────────────────────────────

/// Stored final report for a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub run_id: String,
    pub verdict: Option<Verdict>,
    pub initial_verdict: Option<Verdict>,
    pub markdown: String,
    /// 1 after the first save, 2 after the one allowed rewrite.
    pub saved_count: u32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub verdict: Option<Verdict>,
    pub initial_verdict: Option<Verdict>,
    pub markdown: String,
}

// ── Progress events ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Log,
    Status,
    Done,
}

/// Live progress for one run. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Log {
        run_id: String,
        message: String,
    },
    Status {
        run_id: String,
        status: RunStatus,
        progress: u8,
        current_step: Option<String>,
        verdict: Option<Verdict>,
    },
    Done {
        run_id: String,
        status: RunStatus,
    },
}

impl ProgressEvent {
    pub fn log(run_id: &str, message: impl Into<String>) -> Self {
        Self::Log {
            run_id: run_id.to_string(),
            message: message.into(),
        }
    }

    pub fn status(run: &Run) -> Self {
        Self::Status {
            run_id: run.run_id.clone(),
            status: run.status,
            progress: run.progress,
            current_step: run.current_step.clone(),
            verdict: run.verdict,
        }
    }

    pub fn done(run: &Run) -> Self {
        Self::Done {
            run_id: run.run_id.clone(),
            status: run.status,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Log { .. } => EventKind::Log,
            Self::Status { .. } => EventKind::Status,
            Self::Done { .. } => EventKind::Done,
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            Self::Log { run_id, .. } | Self::Status { run_id, .. } | Self::Done { run_id, .. } => {
                run_id
            }
        }
    }
}
