use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::prompts::{stage_instructions, system_prompt};
use super::{AnalysisCapability, ModelTier, StageOutput, StageParams};
use crate::compaction::ContextBundle;
use crate::config::CapabilityConfig;
use crate::errors::CapabilityError;
use crate::validation::models::{Stage, UsageMetrics};

/// Provider error bodies are cut to this many characters in messages.
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

/// Chat completions client for OpenAI-compatible endpoints.
pub struct OpenAiCapability {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    main_model: String,
    fast_model: String,
    main_max_tokens: u32,
    fast_max_tokens: u32,
    cost_per_million_tokens: f64,
}

impl OpenAiCapability {
    pub fn from_config(config: &CapabilityConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("gap-foundry")
            .build()
            .context("Failed to build HTTP client")?;
        let api_key = config.api_key();
        if api_key.is_none() {
            tracing::warn!("OPENAI_API_KEY is not set; provider calls will likely be rejected");
        }
        Ok(Self {
            client,
            base_url: config.base_url().trim_end_matches('/').to_string(),
            api_key,
            main_model: config.main_model(),
            fast_model: config.fast_model(),
            main_max_tokens: config.main_max_tokens,
            fast_max_tokens: config.fast_max_tokens,
            cost_per_million_tokens: config.cost_per_million_tokens,
        })
    }

    fn model_for(&self, stage: Stage) -> (&str, u32) {
        match ModelTier::for_stage(stage) {
            ModelTier::Main => (self.main_model.as_str(), self.main_max_tokens),
            ModelTier::Fast => (self.fast_model.as_str(), self.fast_max_tokens),
        }
    }

    fn request_body(&self, stage: Stage, context: &ContextBundle, params: &StageParams) -> Value {
        let (model, max_tokens) = self.model_for(stage);
        let user = format!(
            "{}\n\nKeep the answer under {} characters.\n\n{}",
            stage_instructions(stage),
            params.max_output_chars,
            context.render()
        );
        json!({
            "model": model,
            "max_tokens": max_tokens,
            "messages": [
                { "role": "system", "content": system_prompt(&params.input) },
                { "role": "user", "content": user },
            ],
        })
    }
}

fn parse_response(
    stage: Stage,
    response: ChatResponse,
    elapsed: Duration,
    cost_per_million_tokens: f64,
) -> Result<StageOutput, CapabilityError> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(CapabilityError::EmptyOutput {
            stage: stage.key().to_string(),
        });
    }

    let usage = response.usage.unwrap_or_default();
    let usage = UsageMetrics {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        successful_requests: 1,
        estimated_cost_usd: 0.0,
        elapsed_ms: elapsed.as_millis() as u64,
    }
    .priced(cost_per_million_tokens);
    Ok(StageOutput { text, usage })
}

#[async_trait]
impl AnalysisCapability for OpenAiCapability {
    async fn invoke(
        &self,
        stage: Stage,
        context: &ContextBundle,
        params: &StageParams,
    ) -> Result<StageOutput, CapabilityError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(stage, context, params);
        let started = Instant::now();

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        let resp = request
            .send()
            .await
            .map_err(|e| CapabilityError::Unreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::Provider {
                status: status.as_u16(),
                message: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let response: ChatResponse = resp
            .json()
            .await
            .map_err(|e| CapabilityError::MalformedOutput {
                stage: stage.key().to_string(),
                reason: format!("unparsable provider response: {}", e),
            })?;

        let output = parse_response(stage, response, started.elapsed(), self.cost_per_million_tokens)?;
        tracing::debug!(
            run_id = %params.run_id,
            stage = %stage,
            tokens = output.usage.total_tokens,
            elapsed_ms = output.usage.elapsed_ms,
            "Provider call finished"
        );
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
