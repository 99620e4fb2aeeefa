//! End-to-end agent task scenarios against scripted capabilities.
//!
//! The model, email sender, and vector backend are all in-memory fakes that
//! record calls and return scripted responses, so each scenario exercises
//! the full loop: forced tool use, sequential tool execution, result
//! reflection, and answer formatting.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use drive_agent::agent::AgentOrchestrator;
use drive_agent::email::EmailSender;
use drive_agent::llm::{LanguageModel, ModelResponse, ToolDeclaration};
use drive_agent::models::{ConversationTurn, DocMetadata, Document, ToolCall, MIME_GOOGLE_DOC};
use drive_agent::store::{MemoryBackend, VectorStore};
use drive_agent::tools::{ToolContext, ToolRegistry};

// ============ Fakes ============

struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    chat_prompts: Mutex<Vec<String>>,
    chat_reply: String,
}

impl ScriptedModel {
    fn new(responses: Vec<ModelResponse>, chat_reply: &str) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            chat_prompts: Mutex::new(Vec::new()),
            chat_reply: chat_reply.to_string(),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn chat(&self, prompt: &str) -> Result<String> {
        self.chat_prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.chat_reply.clone())
    }

    async fn chat_with_tools(
        &self,
        _turns: &[ConversationTurn],
        _tools: &[ToolDeclaration],
        _force: bool,
    ) -> Result<ModelResponse> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.5, 0.25])
    }
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        self.sent.lock().unwrap().push((
            to.to_string(),
            subject.to_string(),
            html_body.to_string(),
        ));
        Ok(())
    }
}

fn tool_call(name: &str, parameters: serde_json::Value) -> ModelResponse {
    ModelResponse {
        text: None,
        tool_calls: vec![ToolCall {
            name: name.to_string(),
            parameters,
        }],
    }
}

fn final_text(text: &str) -> ModelResponse {
    ModelResponse {
        text: Some(text.to_string()),
        tool_calls: Vec::new(),
    }
}

async fn setup(
    responses: Vec<ModelResponse>,
    chat_reply: &str,
    docs: Vec<Document>,
) -> (AgentOrchestrator, Arc<ScriptedModel>, Arc<RecordingSender>) {
    let model = Arc::new(ScriptedModel::new(responses, chat_reply));
    let sender = Arc::new(RecordingSender::default());
    let store = Arc::new(VectorStore::new(
        model.clone(),
        Arc::new(MemoryBackend::new("documents")),
        "Drive".to_string(),
    ));
    if !docs.is_empty() {
        store.add_many(&docs).await.unwrap();
    }
    let ctx = ToolContext {
        store,
        email: sender.clone(),
        model: model.clone(),
        search_max_distance: None,
    };
    let orchestrator = AgentOrchestrator::new(
        model.clone(),
        ToolRegistry::with_builtins(),
        ctx,
        Duration::from_secs(30),
    );
    (orchestrator, model, sender)
}

fn nested_doc() -> Document {
    Document {
        id: "doc-nested-2".to_string(),
        text: "Contract with client XYZ dated 2024. Jelena approved it.".to_string(),
        metadata: DocMetadata {
            name: "Nested doc 2".to_string(),
            mime_type: MIME_GOOGLE_DOC.to_string(),
            folder_path: "jelena subfolder".to_string(),
            modified_time: "2024-02-01T00:00:00Z".to_string(),
            extension: ".docx".to_string(),
            google_link: None,
        },
    }
}

// ============ Scenarios ============

#[tokio::test]
async fn search_hit_lists_document_with_open_link() {
    let (orchestrator, _, _) = setup(
        vec![
            tool_call(
                "searchDocuments",
                json!({ "query": "Jelena", "keyword": "Jelena", "nResults": 10 }),
            ),
            final_text("Jelena se spominje u jednom dokumentu."),
        ],
        "",
        vec![nested_doc()],
    )
    .await;

    let report = orchestrator
        .execute_task("Gde se spominje Jelena?", 5)
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.iterations, 2);
    assert!(report.iterations <= 5);
    assert!(report.answer.starts_with("Jelena se spominje u jednom dokumentu."));
    assert!(report.answer.contains("jelena subfolder"));
    assert!(report.answer.contains("Nested doc 2.docx"));
    assert!(report
        .answer
        .contains("[Open](https://docs.google.com/document/d/doc-nested-2)"));

    assert_eq!(report.tool_calls.len(), 1);
    assert_eq!(report.tool_calls[0].name, "searchDocuments");
    assert_eq!(report.tool_calls[0].result["count"], 1);
    assert_eq!(
        report.tool_calls[0].result["results"][0]["googleLink"],
        "https://docs.google.com/document/d/doc-nested-2"
    );
}

#[tokio::test]
async fn summarize_flow_issues_separate_chat_call() {
    let (orchestrator, model, _) = setup(
        vec![
            tool_call(
                "summarizeDocument",
                json!({ "documentName": "OPENAI VS CLAUDE", "query": "summary of OPENAI VS CLAUDE" }),
            ),
            final_text("Evo sažetka dokumenta."),
        ],
        "The document compares two assistants in detail.",
        vec![Document {
            id: "cmp-1".to_string(),
            text: "A very long comparison of OpenAI and Claude assistants.".to_string(),
            metadata: DocMetadata {
                name: "OPENAI VS CLAUDE".to_string(),
                mime_type: MIME_GOOGLE_DOC.to_string(),
                folder_path: "research".to_string(),
                modified_time: "2024-03-01T00:00:00Z".to_string(),
                extension: ".docx".to_string(),
                google_link: None,
            },
        }],
    )
    .await;

    let report = orchestrator
        .execute_task("Napravi sažetak dokumenta OPENAI VS CLAUDE", 5)
        .await
        .unwrap();

    assert!(report.success);
    assert!(report.answer.contains("Evo sažetka dokumenta."));
    assert!(report.answer.contains("📄 OPENAI VS CLAUDE.docx"));
    assert!(report.answer.contains("📁 research"));
    assert!(report.answer.contains("🔗 https://docs.google.com/document/d/cmp-1"));

    // The summary came from a dedicated plain chat call with the word bound.
    let prompts = model.chat_prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("at most 200 words"));
    assert!(prompts[0].contains("OpenAI and Claude"));

    assert_eq!(report.tool_calls[0].result["summary"],
        "The document compares two assistants in detail.");
}

#[tokio::test]
async fn send_email_flow_confirms_with_sent_content() {
    let (orchestrator, _, sender) = setup(
        vec![
            tool_call(
                "sendEmail",
                json!({ "to": "a@b.com", "subject": "Summary", "message": "All documents reviewed." }),
            ),
            final_text("Email je poslat."),
        ],
        "",
        vec![],
    )
    .await;

    let report = orchestrator
        .execute_task("Email summary to a@b.com", 5)
        .await
        .unwrap();

    assert!(report.success);
    assert!(report.answer.contains("Email je poslat."));
    assert!(report.answer.contains("📧 a@b.com"));
    assert!(report.answer.contains("Subject: Summary"));
    assert!(report.answer.contains("All documents reviewed."));

    let sent = sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "a@b.com");
}

#[tokio::test]
async fn missing_document_yields_courteous_text_only_answer() {
    let (orchestrator, _, _) = setup(
        vec![
            tool_call(
                "summarizeDocument",
                json!({ "documentName": "Ghost report", "query": "summary" }),
            ),
            final_text("Nažalost, taj dokument ne postoji u bazi."),
        ],
        "",
        vec![],
    )
    .await;

    let report = orchestrator
        .execute_task("Napravi sažetak dokumenta Ghost report", 5)
        .await
        .unwrap();

    assert!(report.success);
    // No summary block: the answer is exactly the model's text.
    assert_eq!(report.answer, "Nažalost, taj dokument ne postoji u bazi.");
    assert_eq!(report.tool_calls[0].result["success"], false);
    assert!(report.tool_calls[0].result["message"]
        .as_str()
        .unwrap()
        .contains("not found"));
}

#[tokio::test]
async fn same_response_tool_calls_execute_in_order() {
    let both = ModelResponse {
        text: None,
        tool_calls: vec![
            ToolCall {
                name: "getDocumentStats".to_string(),
                parameters: json!({}),
            },
            ToolCall {
                name: "searchDocuments".to_string(),
                parameters: json!({ "query": "contract" }),
            },
        ],
    };
    let (orchestrator, _, _) = setup(
        vec![both, final_text("done")],
        "",
        vec![nested_doc()],
    )
    .await;

    let report = orchestrator.execute_task("stats then search", 5).await.unwrap();
    assert_eq!(report.tool_calls.len(), 2);
    assert_eq!(report.tool_calls[0].name, "getDocumentStats");
    assert_eq!(report.tool_calls[1].name, "searchDocuments");
}
