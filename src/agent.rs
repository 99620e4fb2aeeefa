//! The agent loop: bounded iterative conversation between the model and the
//! tool registry.
//!
//! One task execution owns one [`ConversationTurn`] sequence. Each iteration
//! asks the model for either tool calls or final text; tool use is forced on
//! the first iteration and optional afterward. Tool calls run sequentially
//! in emission order, and every result is reflected back into the
//! conversation as a tool-result turn — including failures, which become
//! `{error}` payloads the model can recover from. Each successful result
//! also carries a short directive telling the model what to do next, which
//! is what stops it from re-issuing the same call on the next turn.
//!
//! When the model finally answers with text, the orchestrator formats the
//! user-facing answer from the recorded tool results (search listings,
//! summary blocks, email confirmations) and returns a [`TaskReport`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::llm::LanguageModel;
use crate::models::{ConversationTurn, ToolCall, ToolCallRecord};
use crate::tools::{ToolContext, ToolRegistry, TOOL_SEARCH, TOOL_SEND_EMAIL, TOOL_STATS, TOOL_SUMMARIZE};

pub const DEFAULT_MAX_ITERATIONS: u32 = 5;
pub const MAX_ITERATIONS_CEILING: u32 = 10;

const SYSTEM_INSTRUCTION: &str = "You are a document assistant. You have access to tools for \
searching the document corpus, summarizing named documents, sending email, and reporting corpus \
statistics. Use the tools to complete the user's task, then respond in the same language the \
user wrote in.";

/// Outcome of one completed task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub success: bool,
    pub answer: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub iterations: u32,
}

impl TaskReport {
    /// The `{success, data, message}` envelope callers print or return.
    pub fn to_envelope(&self) -> Value {
        json!({
            "success": true,
            "data": self,
            "message": "Task completed",
        })
    }
}

/// Drives tasks to completion against a model and a tool registry.
pub struct AgentOrchestrator {
    model: Arc<dyn LanguageModel>,
    registry: ToolRegistry,
    ctx: ToolContext,
    tool_timeout: Duration,
}

impl AgentOrchestrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        registry: ToolRegistry,
        ctx: ToolContext,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            model,
            registry,
            ctx,
            tool_timeout,
        }
    }

    /// Run a task with no caller deadline.
    pub async fn execute_task(
        &self,
        prompt: &str,
        max_iterations: u32,
    ) -> Result<TaskReport, AgentError> {
        self.execute_task_with_deadline(prompt, max_iterations, None)
            .await
    }

    /// Run a task, aborting with [`AgentError::Cancelled`] once `deadline`
    /// elapses. Side effects already performed are not rolled back.
    pub async fn execute_task_with_deadline(
        &self,
        prompt: &str,
        max_iterations: u32,
        deadline: Option<Duration>,
    ) -> Result<TaskReport, AgentError> {
        if prompt.trim().is_empty() {
            return Err(AgentError::BadRequest("prompt must not be empty".into()));
        }
        if max_iterations < 1 || max_iterations > MAX_ITERATIONS_CEILING {
            return Err(AgentError::BadRequest(format!(
                "maxIterations must be between 1 and {MAX_ITERATIONS_CEILING}"
            )));
        }

        let deadline = deadline.map(|d| Instant::now() + d);
        let mut turns = vec![
            ConversationTurn::System(SYSTEM_INSTRUCTION.to_string()),
            ConversationTurn::User(prompt.to_string()),
        ];
        let mut records: Vec<ToolCallRecord> = Vec::new();

        for iteration in 1..=max_iterations {
            let force_tools = iteration == 1;
            debug!(iteration, force_tools, "model turn");

            let response = self.call_model(&turns, force_tools, deadline).await?;

            if !response.tool_calls.is_empty() {
                let mut known = Vec::with_capacity(response.tool_calls.len());
                for call in response.tool_calls {
                    if self.registry.find(&call.name).is_some() {
                        known.push(call);
                    } else {
                        warn!(tool = %call.name, "model requested unknown tool, skipping");
                    }
                }
                if known.is_empty() {
                    continue;
                }

                turns.push(ConversationTurn::ModelCall(known.clone()));
                for call in known {
                    let payload = self.run_tool(&call, deadline).await?;
                    records.push(ToolCallRecord {
                        name: call.name.clone(),
                        parameters: call.parameters.clone(),
                        result: payload.clone(),
                    });
                    turns.push(ConversationTurn::ToolResult {
                        name: call.name,
                        payload,
                    });
                }
                continue;
            }

            if let Some(text) = response.text {
                if iteration == 1 {
                    // Forced tool use: text here violates the contract.
                    return Err(AgentError::ModelFailure(
                        "tool use was forced but the model answered with text".into(),
                    ));
                }
                let answer = compose_answer(&text, &records);
                return Ok(TaskReport {
                    success: true,
                    answer,
                    tool_calls: records,
                    iterations: iteration,
                });
            }

            return Err(AgentError::ModelFailure(
                "model returned neither text nor tool calls".into(),
            ));
        }

        Err(AgentError::MaxIterationsExceeded(max_iterations))
    }

    async fn call_model(
        &self,
        turns: &[ConversationTurn],
        force_tools: bool,
        deadline: Option<Instant>,
    ) -> Result<crate::llm::ModelResponse, AgentError> {
        let declarations = self.registry.declarations();
        let fut = self.model.chat_with_tools(turns, &declarations, force_tools);
        match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(AgentError::Cancelled("deadline exceeded".into()));
                }
                match tokio::time::timeout(remaining, fut).await {
                    Ok(result) => result.map_err(|e| AgentError::ModelFailure(e.to_string())),
                    Err(_) => Err(AgentError::Cancelled("deadline exceeded".into())),
                }
            }
            None => fut.await.map_err(|e| AgentError::ModelFailure(e.to_string())),
        }
    }

    /// Execute one tool call. Tool failures and per-tool timeouts come back
    /// as `{error}` payloads; only a caller deadline aborts the task.
    async fn run_tool(
        &self,
        call: &ToolCall,
        deadline: Option<Instant>,
    ) -> Result<Value, AgentError> {
        let Some(tool) = self.registry.find(&call.name) else {
            // Unknown names are filtered before this point.
            return Ok(json!({ "error": format!("unknown tool {}", call.name) }));
        };

        let mut budget = self.tool_timeout;
        let mut deadline_bound = false;
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AgentError::Cancelled("deadline exceeded".into()));
            }
            if remaining < budget {
                budget = remaining;
                deadline_bound = true;
            }
        }

        let result = tokio::time::timeout(budget, tool.execute(call.parameters.clone(), &self.ctx)).await;
        match result {
            Ok(Ok(mut payload)) => {
                attach_directive(&call.name, &mut payload);
                Ok(payload)
            }
            Ok(Err(e)) => {
                warn!(tool = %call.name, error = %e, "tool call failed");
                Ok(json!({ "error": e.to_string() }))
            }
            Err(_) if deadline_bound => Err(AgentError::Cancelled("deadline exceeded".into())),
            Err(_) => {
                warn!(tool = %call.name, timeout = ?self.tool_timeout, "tool call timed out");
                Ok(json!({ "error": format!("{} timed out", call.name) }))
            }
        }
    }
}

// ============ Convergence directives ============

/// Append a next-step instruction to a successful tool payload. Without it
/// models tend to re-issue the same call instead of answering.
fn attach_directive(tool_name: &str, payload: &mut Value) {
    let Some(obj) = payload.as_object_mut() else {
        return;
    };
    let success = obj.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
    let count = obj.get("count").and_then(|v| v.as_u64()).unwrap_or(0);

    let directive = match tool_name {
        TOOL_SEARCH if success && count > 0 => {
            "Documents found: present them to the user in the user's language. Do not call tools again."
        }
        TOOL_SEARCH => {
            "No documents matched: tell the user so in their language. Do not call tools again."
        }
        TOOL_SUMMARIZE if success => {
            "Summary ready: present it to the user in the user's language. Do not call tools again."
        }
        TOOL_SUMMARIZE => {
            "Document not found: tell the user so, courteously, in their language. Do not call tools again."
        }
        TOOL_SEND_EMAIL if success => {
            "Email sent: confirm it to the user in their language. Do not call tools again."
        }
        TOOL_STATS if success => {
            "Statistics retrieved: report them to the user in their language. Do not call tools again."
        }
        _ => return,
    };
    obj.insert("directive".to_string(), json!(directive));
}

// ============ Answer formatting ============

/// Build the user-facing answer from the model's final text plus the
/// recorded tool results, in priority order: search listings, then summary
/// blocks, then email confirmations, else the text alone.
fn compose_answer(text: &str, records: &[ToolCallRecord]) -> String {
    let search_lines = search_result_lines(records);
    if !search_lines.is_empty() {
        let mut answer = String::from(text);
        answer.push_str("\n\n");
        answer.push_str(&search_lines.join("\n"));
        return answer;
    }

    let summary_blocks = summary_blocks(records);
    if !summary_blocks.is_empty() {
        let mut answer = String::from(text);
        for block in summary_blocks {
            answer.push_str("\n\n");
            answer.push_str(&block);
        }
        return answer;
    }

    let email_blocks = email_blocks(records);
    if !email_blocks.is_empty() {
        let mut answer = String::from(text);
        for block in email_blocks {
            answer.push_str("\n\n");
            answer.push_str(&block);
        }
        return answer;
    }

    text.to_string()
}

fn search_result_lines(records: &[ToolCallRecord]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut index = 0usize;
    for record in records.iter().filter(|r| r.name == TOOL_SEARCH) {
        let results = record.result.get("results").and_then(|r| r.as_array());
        for result in results.into_iter().flatten() {
            index += 1;
            let folder = result.get("folderPath").and_then(|v| v.as_str()).unwrap_or("");
            let link = result.get("googleLink").and_then(|v| v.as_str()).unwrap_or("");
            let mut file_name = result
                .get("fileName")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            if !file_name.contains('.') {
                // No stored extension; the path's final segment carries one.
                if let Some(last) = result
                    .get("path")
                    .and_then(|v| v.as_str())
                    .and_then(|p| p.rsplit('/').next())
                {
                    file_name = last.to_string();
                }
            }
            let line = if folder.is_empty() {
                format!("{index}. {file_name} — [Open]({link})")
            } else {
                format!("{index}. {folder} — {file_name} — [Open]({link})")
            };
            lines.push(line);
        }
    }
    lines
}

fn summary_blocks(records: &[ToolCallRecord]) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.name == TOOL_SUMMARIZE)
        .filter(|r| r.result.get("success").and_then(|v| v.as_bool()).unwrap_or(false))
        .map(|r| {
            let name = r.result.get("documentName").and_then(|v| v.as_str()).unwrap_or("");
            let extension = r.result.get("extension").and_then(|v| v.as_str()).unwrap_or("");
            let folder = r.result.get("folderPath").and_then(|v| v.as_str()).unwrap_or("");
            let link = r.result.get("googleLink").and_then(|v| v.as_str()).unwrap_or("");
            format!("📄 {name}{extension}\n📁 {folder}\n🔗 {link}")
        })
        .collect()
}

fn email_blocks(records: &[ToolCallRecord]) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.name == TOOL_SEND_EMAIL)
        .filter(|r| r.result.get("success").and_then(|v| v.as_bool()).unwrap_or(false))
        .filter_map(|r| r.result.get("sentEmail"))
        .map(|sent| {
            let to = sent.get("to").and_then(|v| v.as_str()).unwrap_or("");
            let subject = sent.get("subject").and_then(|v| v.as_str()).unwrap_or("");
            let body = sent.get("body").and_then(|v| v.as_str()).unwrap_or("");
            format!("📧 {to}\nSubject: {subject}\n{body}")
        })
        .collect()
}
