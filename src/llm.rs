//! External model client for claim extraction.
//!
//! Defines the [`ClaimModel`] trait and the chat-completions implementation
//! used in production:
//! - **[`ChatCompletionsModel`]**: POSTs `{base_url}/chat/completions` with a
//!   strict `json_schema` response format and parses the reply through the
//!   tolerant contract parser.
//! - **[`DisabledModel`]**: always fails; used when no API key is available.
//!
//! # Retry Strategy
//!
//! None within a call. A timeout, transport failure, non-2xx status, or
//! unparseable reply fails the attempt, and the caller re-queues the
//! document.
//!
//! # Cost
//!
//! Token usage is priced from a static per-million-token table. Model names
//! match exactly or by prefix (`gpt-4.1-mini-2025-04-14` → `gpt-4.1-mini`);
//! unknown models cost 0.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

use claim_harness_core::contract::{claims_response_schema, parse_chat_response, SCHEMA_NAME};
use claim_harness_core::models::{ClaimBundle, Document};
use claim_harness_core::text::truncate_chars;

use crate::config::LlmConfig;
use crate::error::ExtractError;

const SYSTEM_PROMPT: &str = "You extract factual memory claims for personal memory retrieval. \
Center extraction on the user as subject 'me'. \
Extract claims exhaustively: do not omit any concrete action, event, plan, decision, task, meeting point, movement, workout, chore, or reminder present in the text. \
Split compound sentences into atomic claims in chronological order. \
Object text must be self-contained and understandable alone, with minimal context completion if needed. \
Use only allowed predicates from the schema enum. \
When a decision/action is caused by an event, output two claims and add a link relation_type='caused_by' from decision claim to cause claim. \
Preserve modality/polarity, avoid speculation, and include evidence spans for every claim.";

/// Prices in USD per million tokens: (input, cached input, output).
const PRICING_PER_1M_USD: &[(&str, f64, f64, f64)] = &[
    ("gpt-4.1-mini", 0.40, 0.10, 1.60),
    ("gpt-4o-mini", 0.15, 0.075, 0.60),
    ("gpt-4.1", 2.00, 0.50, 8.00),
];

/// Token usage and estimated cost of one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelUsage {
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_output_tokens: u64,
    pub request_cost_usd: f64,
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub bundle: ClaimBundle,
    pub usage: ModelUsage,
    pub request_id: Option<String>,
}

/// A model that turns document text into a claim bundle.
#[async_trait]
pub trait ClaimModel: Send + Sync {
    /// Model identifier, recorded as `llm-<name>` on every claim.
    fn model_name(&self) -> &str;

    /// Extract claims from `llm_text`, the model-safe form of `doc`'s text.
    async fn extract_claims(
        &self,
        doc: &Document,
        llm_text: &str,
    ) -> Result<ModelResponse, ExtractError>;
}

// ============ Disabled Model ============

/// Stand-in when no API key is configured; every call fails retryably.
pub struct DisabledModel {
    model: String,
    api_key_env: String,
}

#[async_trait]
impl ClaimModel for DisabledModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn extract_claims(
        &self,
        _doc: &Document,
        _llm_text: &str,
    ) -> Result<ModelResponse, ExtractError> {
        Err(ExtractError::MissingApiKey(self.api_key_env.clone()))
    }
}

// ============ Chat Completions Model ============

pub struct ChatCompletionsModel {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: String,
}

impl ChatCompletionsModel {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
            api_key,
        })
    }
}

/// Create the model for `config`, reading the key from its env var.
pub fn create_model(config: &LlmConfig) -> Result<Box<dyn ClaimModel>, ExtractError> {
    match config.api_key() {
        Some(key) => Ok(Box::new(ChatCompletionsModel::new(config, key)?)),
        None => Ok(Box::new(DisabledModel {
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
        })),
    }
}

/// Reasoning controls are only accepted by the o-series and gpt-5 models.
pub fn supports_reasoning_effort(model: &str) -> bool {
    let normalized = model.trim().to_lowercase();
    normalized.starts_with('o') || normalized.starts_with("gpt-5")
}

/// Build the chat-completions request body.
pub fn build_request_body(config: &LlmConfig, doc: &Document, llm_text: &str) -> Value {
    let user_prompt = format!(
        "Return structured claims from this document.\n\n\
         declared_type={}\n\
         occurred_at_utc={}\n\
         extraction_priority=me-centric factual memory\n\
         rules=extract all concrete actions and plans without omission; split into atomic claims; keep causal relations; no speculative emotions\n\
         text={}",
        doc.declared_type,
        doc.occurred_at.as_deref().unwrap_or("None"),
        truncate_chars(llm_text, config.max_input_chars),
    );
    let mut body = json!({
        "model": config.model,
        "messages": [
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": user_prompt},
        ],
        "response_format": {
            "type": "json_schema",
            "json_schema": {
                "name": SCHEMA_NAME,
                "strict": true,
                "schema": claims_response_schema(),
            },
        },
    });
    if supports_reasoning_effort(&config.model) {
        // Reasoning models reject any temperature but the default.
        if config.reasoning_effort != "none" {
            body["reasoning_effort"] = json!(config.reasoning_effort);
        }
    } else {
        body["temperature"] = json!(0);
    }
    body
}

fn count(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Estimated USD cost, rounded to 6 decimals.
pub fn estimate_cost_usd(model: &str, input: u64, cached_input: u64, output: u64) -> f64 {
    let pricing = PRICING_PER_1M_USD
        .iter()
        .find(|(name, ..)| *name == model)
        .or_else(|| {
            PRICING_PER_1M_USD
                .iter()
                .find(|(name, ..)| model.starts_with(name))
        });
    let Some((_, input_price, cached_price, output_price)) = pricing else {
        return 0.0;
    };
    let cached = cached_input.min(input);
    let fresh = input - cached;
    let usd = (fresh as f64 * input_price
        + cached as f64 * cached_price
        + output as f64 * output_price)
        / 1_000_000.0;
    (usd.max(0.0) * 1_000_000.0).round() / 1_000_000.0
}

/// Read token counts from a chat-completions `usage` object.
pub fn parse_usage(model: &str, response: &Value) -> ModelUsage {
    let Some(usage) = response.get("usage").filter(|u| u.is_object()) else {
        return ModelUsage::default();
    };
    let input_tokens = count(usage.get("prompt_tokens"));
    let output_tokens = count(usage.get("completion_tokens"));
    let cached_input_tokens = count(
        usage
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens")),
    );
    let reasoning_output_tokens = count(
        usage
            .get("completion_tokens_details")
            .and_then(|d| d.get("reasoning_tokens")),
    );
    ModelUsage {
        input_tokens,
        cached_input_tokens,
        output_tokens,
        reasoning_output_tokens,
        request_cost_usd: estimate_cost_usd(model, input_tokens, cached_input_tokens, output_tokens),
    }
}

#[async_trait]
impl ClaimModel for ChatCompletionsModel {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn extract_claims(
        &self,
        doc: &Document,
        llm_text: &str,
    ) -> Result<ModelResponse, ExtractError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = build_request_body(&self.config, doc, llm_text);

        tracing::info!(
            document_id = %doc.id,
            model = %self.config.model,
            input_chars = llm_text.chars().count(),
            "requesting claims"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .inspect_err(|e| {
                tracing::warn!(document_id = %doc.id, timeout = e.is_timeout(), error = %e, "model request failed");
            })?;

        let status = response.status();
        let header_request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(document_id = %doc.id, status = status.as_u16(), "model returned error status");
            return Err(ExtractError::Http {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let data: Value = response.json().await?;
        let usage = parse_usage(&self.config.model, &data);
        let request_id = data
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(header_request_id);

        let bundle = parse_chat_response(&data)?;

        tracing::info!(
            document_id = %doc.id,
            request_id = request_id.as_deref().unwrap_or("-"),
            tokens_in = usage.input_tokens,
            tokens_out = usage.output_tokens,
            cost_usd = usage.request_cost_usd,
            claims = bundle.claims.len(),
            "model response parsed"
        );

        Ok(ModelResponse {
            bundle,
            usage,
            request_id,
        })
    }
}
