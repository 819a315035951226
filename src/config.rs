//! Configuration for gap-foundry, read from `gapfoundry.toml`.
//!
//! Every field has a default, so an empty (or missing) file is a valid
//! configuration. Environment variables fill in provider credentials and
//! model overrides.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//! data_dir = ".gap_foundry"
//! dev_mode = false
//!
//! [pipeline]
//! context_ceiling_chars = 15000
//! stage_output_ceiling_chars = 12000
//! event_buffer = 256
//!
//! [pipeline.weights.full]
//! discover_competitors = 15
//! compact_competitors = 5
//! analyze_channels = 10
//! extract_value_props = 10
//! summarize_research = 10
//! mine_gaps = 15
//! create_positioning = 10
//! red_team_review = 10
//! final_report = 15
//!
//! [pipeline.weights.revision_tail]
//! revise_positioning = 40
//! red_team_recheck = 30
//! final_report = 30
//!
//! [revision]
//! enabled = true
//! revise_on_hold = true
//! revise_on_no = true
//!
//! [pregate]
//! core_fail_threshold = 2
//! min_score = 0.25
//!
//! [capability]
//! provider = "openai"        # or "scripted" for dry runs
//! base_url = "https://api.openai.com/v1"
//! main_model = "gpt-4.1"
//! fast_model = "gpt-4.1-mini"
//! timeout_secs = 180
//! cost_per_million_tokens = 1.5
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::pregate::PregatePolicy;
use crate::validation::models::{PassMode, Stage};

pub const CONFIG_FILE_NAME: &str = "gapfoundry.toml";

// ── Server ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Holds the SQLite database, per-run artifact folders and log files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Permissive CORS for a locally served frontend.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".gap_foundry")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            dev_mode: false,
        }
    }
}

impl ServerSection {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("gap_foundry.db")
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────

/// Progress weights for a full pass. Must sum to 100.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FullWeights {
    pub discover_competitors: u8,
    pub compact_competitors: u8,
    pub analyze_channels: u8,
    pub extract_value_props: u8,
    pub summarize_research: u8,
    pub mine_gaps: u8,
    pub create_positioning: u8,
    pub red_team_review: u8,
    pub final_report: u8,
}

impl Default for FullWeights {
    fn default() -> Self {
        Self {
            discover_competitors: 15,
            compact_competitors: 5,
            analyze_channels: 10,
            extract_value_props: 10,
            summarize_research: 10,
            mine_gaps: 15,
            create_positioning: 10,
            red_team_review: 10,
            final_report: 15,
        }
    }
}

/// Progress weights for the revision tail. Must sum to 100.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TailWeights {
    pub revise_positioning: u8,
    pub red_team_recheck: u8,
    pub final_report: u8,
}

impl Default for TailWeights {
    fn default() -> Self {
        Self {
            revise_positioning: 40,
            red_team_recheck: 30,
            final_report: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageWeights {
    #[serde(default)]
    pub full: FullWeights,
    #[serde(default)]
    pub revision_tail: TailWeights,
}

impl StageWeights {
    /// Weight of `stage` within `mode`; zero for stages the mode does not run.
    pub fn weight(&self, mode: PassMode, stage: Stage) -> u8 {
        match mode {
            PassMode::Full => {
                let w = &self.full;
                match stage {
                    Stage::DiscoverCompetitors => w.discover_competitors,
                    Stage::CompactCompetitors => w.compact_competitors,
                    Stage::AnalyzeChannels => w.analyze_channels,
                    Stage::ExtractValueProps => w.extract_value_props,
                    Stage::SummarizeResearch => w.summarize_research,
                    Stage::MineGaps => w.mine_gaps,
                    Stage::CreatePositioning => w.create_positioning,
                    Stage::RedTeamReview => w.red_team_review,
                    Stage::FinalReport => w.final_report,
                    Stage::RevisePositioning | Stage::RedTeamRecheck => 0,
                }
            }
            PassMode::RevisionTail => {
                let w = &self.revision_tail;
                match stage {
                    Stage::RevisePositioning => w.revise_positioning,
                    Stage::RedTeamRecheck => w.red_team_recheck,
                    Stage::FinalReport => w.final_report,
                    _ => 0,
                }
            }
        }
    }

    pub fn total(&self, mode: PassMode) -> u32 {
        mode.stages()
            .iter()
            .map(|stage| self.weight(mode, *stage) as u32)
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Hard ceiling on the rendered context bundle handed to any stage.
    #[serde(default = "default_context_ceiling_chars")]
    pub context_ceiling_chars: usize,
    /// Hard ceiling on a single stage's stored output.
    #[serde(default = "default_stage_output_ceiling_chars")]
    pub stage_output_ceiling_chars: usize,
    /// Per-run broadcast channel capacity.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default)]
    pub weights: StageWeights,
}

fn default_context_ceiling_chars() -> usize {
    15_000
}

fn default_stage_output_ceiling_chars() -> usize {
    12_000
}

fn default_event_buffer() -> usize {
    256
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            context_ceiling_chars: default_context_ceiling_chars(),
            stage_output_ceiling_chars: default_stage_output_ceiling_chars(),
            event_buffer: default_event_buffer(),
            weights: StageWeights::default(),
        }
    }
}

// ── Revision ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub revise_on_hold: bool,
    #[serde(default = "default_true")]
    pub revise_on_no: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RevisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            revise_on_hold: true,
            revise_on_no: true,
        }
    }
}

// ── Capability ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Openai,
    Scripted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub main_model: Option<String>,
    #[serde(default)]
    pub fast_model: Option<String>,
    #[serde(default = "default_main_max_tokens")]
    pub main_max_tokens: u32,
    #[serde(default = "default_fast_max_tokens")]
    pub fast_max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cost_per_million_tokens")]
    pub cost_per_million_tokens: f64,
}

fn default_main_max_tokens() -> u32 {
    3000
}

fn default_fast_max_tokens() -> u32 {
    2500
}

fn default_timeout_secs() -> u64 {
    180
}

fn default_cost_per_million_tokens() -> f64 {
    1.5
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: None,
            main_model: None,
            fast_model: None,
            main_max_tokens: default_main_max_tokens(),
            fast_max_tokens: default_fast_max_tokens(),
            timeout_secs: default_timeout_secs(),
            cost_per_million_tokens: default_cost_per_million_tokens(),
        }
    }
}

impl CapabilityConfig {
    /// Base URL, with fallback to `OPENAI_BASE_URL`.
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .or_else(|| std::env::var("OPENAI_BASE_URL").ok())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
    }

    /// Model for judgment-heavy stages, with fallback to `GAP_FOUNDRY_MAIN_MODEL`.
    pub fn main_model(&self) -> String {
        self.main_model
            .clone()
            .or_else(|| std::env::var("GAP_FOUNDRY_MAIN_MODEL").ok())
            .unwrap_or_else(|| "gpt-4.1".to_string())
    }

    /// Model for extraction stages, with fallback to `GAP_FOUNDRY_FAST_MODEL`.
    pub fn fast_model(&self) -> String {
        self.fast_model
            .clone()
            .or_else(|| std::env::var("GAP_FOUNDRY_FAST_MODEL").ok())
            .unwrap_or_else(|| "gpt-4.1-mini".to_string())
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())
    }
}

// ── Root ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub revision: RevisionConfig,
    #[serde(default)]
    pub pregate: PregatePolicy,
    #[serde(default)]
    pub capability: CapabilityConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse gapfoundry.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Load `gapfoundry.toml` from `dir`, or defaults if the file doesn't exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize gapfoundry.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for mode in [PassMode::Full, PassMode::RevisionTail] {
            let total = self.pipeline.weights.total(mode);
            if total != 100 {
                anyhow::bail!(
                    "Stage weights for {} mode must sum to 100, got {}",
                    mode.as_str(),
                    total
                );
            }
        }
        if self.pipeline.context_ceiling_chars == 0 {
            anyhow::bail!("pipeline.context_ceiling_chars cannot be zero");
        }
        if self.pipeline.stage_output_ceiling_chars == 0 {
            anyhow::bail!("pipeline.stage_output_ceiling_chars cannot be zero");
        }
        if self.pipeline.event_buffer == 0 {
            anyhow::bail!("pipeline.event_buffer cannot be zero");
        }
        if !(0.0..=1.0).contains(&self.pregate.min_score) {
            anyhow::bail!(
                "pregate.min_score must be between 0 and 1, got {}",
                self.pregate.min_score
            );
        }
        // Compile once here so a bad pattern fails at startup, not per request.
        crate::pregate::PregateChecker::new(&self.pregate)
            .context("Invalid pregate policy")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.pipeline.context_ceiling_chars, 15_000);
        assert!(config.revision.enabled);
        assert_eq!(config.server.db_path(), PathBuf::from(".gap_foundry/gap_foundry.db"));
    }

    #[test]
    fn test_parse_empty_string_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.pipeline.weights, StageWeights::default());
        assert_eq!(config.capability.provider, ProviderKind::Openai);
    }

    #[test]
    fn test_parse_partial_sections() {
        let config = AppConfig::parse(
            r#"
[server]
port = 9100

[pipeline]
context_ceiling_chars = 4000

[capability]
provider = "scripted"
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.pipeline.context_ceiling_chars, 4000);
        assert_eq!(config.pipeline.event_buffer, 256);
        assert_eq!(config.capability.provider, ProviderKind::Scripted);
    }

    #[test]
    fn test_weights_must_sum_to_100() {
        let err = AppConfig::parse(
            r#"
[pipeline.weights.revision_tail]
revise_positioning = 50
red_team_recheck = 30
final_report = 30
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("revision_tail"));
    }

    #[test]
    fn test_weight_lookup() {
        let weights = StageWeights::default();
        assert_eq!(weights.weight(PassMode::Full, Stage::MineGaps), 15);
        assert_eq!(weights.weight(PassMode::Full, Stage::RevisePositioning), 0);
        assert_eq!(weights.weight(PassMode::RevisionTail, Stage::FinalReport), 30);
        assert_eq!(weights.total(PassMode::Full), 100);
        assert_eq!(weights.total(PassMode::RevisionTail), 100);
    }

    #[test]
    fn test_invalid_pregate_pattern_rejected() {
        let err = AppConfig::parse(
            r#"
[pregate]
vague_target_patterns = ["(unclosed"]
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("pregate"));
    }

    #[test]
    fn test_save_and_load_roundtrip_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = AppConfig::default();
        config.server.port = 8123;
        config.revision.revise_on_hold = false;
        config.save(&path).unwrap();

        let loaded = AppConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.server.port, 8123);
        assert!(!loaded.revision.revise_on_hold);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.server.port, 8000);
    }
}
