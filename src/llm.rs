//! Language model abstraction and the Gemini REST binding.
//!
//! Defines the [`LanguageModel`] trait the agent and the vector store depend
//! on, and [`GeminiModel`], the production implementation over the
//! Generative Language API:
//!
//! - `chat` — plain text completion (used by document summarization).
//! - `chat_with_tools` — tool-augmented chat. The response carries either
//!   tool calls or final text, never both. Forced tool use is expressed as a
//!   structured function-calling mode (`ANY`), optional use as `AUTO`.
//! - `embed` — single-text embedding (768-dim with the default model).
//!
//! # Retry Strategy
//!
//! Transient errors are retried with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::models::{ConversationTurn, ToolCall};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// A tool made visible to the model: name, description, and a JSON-schema
/// object describing the parameters.
#[derive(Debug, Clone)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One model response from a tool-augmented chat call.
///
/// Exactly one of the two is populated on a well-formed response; both empty
/// means the model violated its contract and the caller fails the request.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Generative model capability consumed by the agent loop, the search
/// façade, and the ingestion pipeline.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Plain chat: one prompt in, final text out.
    async fn chat(&self, prompt: &str) -> Result<String>;

    /// Tool-augmented chat over the full turn sequence. With `force_tools`
    /// the model must respond with at least one tool call.
    async fn chat_with_tools(
        &self,
        turns: &[ConversationTurn],
        tools: &[ToolDeclaration],
        force_tools: bool,
    ) -> Result<ModelResponse>;

    /// Embed a single text into a dense vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ============ Gemini binding ============

/// [`LanguageModel`] implementation over the Gemini REST API.
pub struct GeminiModel {
    api_key: String,
    chat_model: String,
    embed_model: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl GeminiModel {
    pub fn new(api_key: String, chat_model: String, embed_model: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            bail!("Gemini API key must not be empty");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            api_key,
            chat_model,
            embed_model,
            client,
            max_retries: 5,
        })
    }

    /// POST a JSON body with retry/backoff, returning the parsed response.
    async fn post_with_retry(&self, url: &str, body: &Value) -> Result<Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow!("Gemini API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Gemini API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Gemini call failed after retries")))
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    async fn chat(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", GEMINI_BASE_URL, self.chat_model);
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });

        let response = self.post_with_retry(&url, &body).await?;
        let parsed = parse_generate_response(&response)?;
        parsed
            .text
            .ok_or_else(|| anyhow!("Gemini returned no text for a plain chat call"))
    }

    async fn chat_with_tools(
        &self,
        turns: &[ConversationTurn],
        tools: &[ToolDeclaration],
        force_tools: bool,
    ) -> Result<ModelResponse> {
        let url = format!("{}/models/{}:generateContent", GEMINI_BASE_URL, self.chat_model);

        let mut body = json!({
            "contents": turns_to_contents(turns),
            "tools": [{ "functionDeclarations": tools_to_declarations(tools) }],
            "toolConfig": {
                "functionCallingConfig": {
                    "mode": if force_tools { "ANY" } else { "AUTO" },
                }
            },
        });
        if let Some(system) = system_instruction(turns) {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }

        let response = self.post_with_retry(&url, &body).await?;
        parse_generate_response(&response)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/models/{}:embedContent", GEMINI_BASE_URL, self.embed_model);
        let body = json!({
            "content": { "parts": [{ "text": text }] },
        });

        let response = self.post_with_retry(&url, &body).await?;
        let values = response
            .get("embedding")
            .and_then(|e| e.get("values"))
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow!("Invalid embedding response: missing embedding.values"))?;

        Ok(values
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect())
    }
}

// ============ Wire mapping ============

/// The system turn travels out-of-band as `systemInstruction`.
fn system_instruction(turns: &[ConversationTurn]) -> Option<&str> {
    turns.iter().find_map(|t| match t {
        ConversationTurn::System(text) => Some(text.as_str()),
        _ => None,
    })
}

fn turns_to_contents(turns: &[ConversationTurn]) -> Vec<Value> {
    let mut contents = Vec::with_capacity(turns.len());
    for turn in turns {
        match turn {
            ConversationTurn::System(_) => {}
            ConversationTurn::User(text) => contents.push(json!({
                "role": "user",
                "parts": [{ "text": text }],
            })),
            ConversationTurn::ModelText(text) => contents.push(json!({
                "role": "model",
                "parts": [{ "text": text }],
            })),
            ConversationTurn::ModelCall(calls) => {
                let parts: Vec<Value> = calls
                    .iter()
                    .map(|c| json!({ "functionCall": { "name": c.name, "args": c.parameters } }))
                    .collect();
                contents.push(json!({ "role": "model", "parts": parts }));
            }
            ConversationTurn::ToolResult { name, payload } => contents.push(json!({
                "role": "user",
                "parts": [{ "functionResponse": { "name": name, "response": payload } }],
            })),
        }
    }
    contents
}

fn tools_to_declarations(tools: &[ToolDeclaration]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            })
        })
        .collect()
}

/// Extract tool calls or final text from a `generateContent` response.
fn parse_generate_response(response: &Value) -> Result<ModelResponse> {
    let parts = response
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow!("Invalid Gemini response: missing candidates[0].content.parts"))?;

    let mut tool_calls = Vec::new();
    let mut text = String::new();

    for part in parts {
        if let Some(call) = part.get("functionCall") {
            let name = call
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| anyhow!("Invalid Gemini response: functionCall without name"))?;
            let parameters = call.get("args").cloned().unwrap_or_else(|| json!({}));
            tool_calls.push(ToolCall {
                name: name.to_string(),
                parameters,
            });
        } else if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
            text.push_str(t);
        }
    }

    // A response carries tool calls or text, never both; tool calls win.
    if !tool_calls.is_empty() {
        return Ok(ModelResponse {
            text: None,
            tool_calls,
        });
    }
    let trimmed = text.trim();
    Ok(ModelResponse {
        text: if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        },
        tool_calls: Vec::new(),
    })
}
