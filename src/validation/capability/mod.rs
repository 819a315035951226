//! Boundary to the external analysis provider.
//!
//! The pipeline only sees [`AnalysisCapability`]. `OpenAiCapability` talks to
//! an OpenAI-compatible chat completions endpoint; `ScriptedCapability`
//! returns canned stage outputs for tests and dry runs.

mod openai;
mod prompts;
mod scripted;

use async_trait::async_trait;

pub use openai::OpenAiCapability;
pub use prompts::{stage_instructions, system_prompt};
pub use scripted::{ScriptedCall, ScriptedCapability};

use crate::compaction::ContextBundle;
use crate::errors::CapabilityError;
use crate::validation::models::{PassMode, RunInput, Stage, UsageMetrics};

/// Per-invocation parameters.
#[derive(Debug, Clone)]
pub struct StageParams {
    pub run_id: String,
    pub input: RunInput,
    pub pass: PassMode,
    /// Output beyond this is cut by the executor anyway.
    pub max_output_chars: usize,
}

#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub text: String,
    pub usage: UsageMetrics,
}

/// Model class used for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Judgement-heavy stages.
    Main,
    /// Extraction and structuring.
    Fast,
}

impl ModelTier {
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::MineGaps | Stage::RedTeamReview | Stage::RedTeamRecheck | Stage::FinalReport => {
                Self::Main
            }
            _ => Self::Fast,
        }
    }
}

/// Abstraction over the analysis provider for testability.
/// Real implementation: `OpenAiCapability`. Test double: `ScriptedCapability`.
#[async_trait]
pub trait AnalysisCapability: Send + Sync {
    async fn invoke(
        &self,
        stage: Stage,
        context: &ContextBundle,
        params: &StageParams,
    ) -> Result<StageOutput, CapabilityError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}
