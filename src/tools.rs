//! Agent tools: declarations, invokers, and the registry.
//!
//! Each tool declares a name, a one-line description the model uses to
//! decide when to call it, a JSON-schema parameters object, and an async
//! invoker bound to the capabilities in [`ToolContext`]. The registry
//! exposes the declarations in the shape [`chat_with_tools`]
//! (crate::llm::LanguageModel::chat_with_tools) expects.
//!
//! | Tool | Purpose |
//! |------|---------|
//! | `searchDocuments` | Semantic search with optional keyword refinement |
//! | `summarizeDocument` | Locate one document by name and summarize it |
//! | `sendEmail` | Send an email through the configured sender |
//! | `getDocumentStats` | Collection size and name |
//!
//! Tool invokers return `Ok(json)` for every domain outcome, including "not
//! found" — the model phrases those for the user. `Err` is reserved for
//! capability failures, which the orchestrator reflects back into the
//! conversation as `{error}` payloads.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::email::EmailSender;
use crate::llm::{LanguageModel, ToolDeclaration};
use crate::store::{SearchOptions, VectorStore};

pub const TOOL_SEARCH: &str = "searchDocuments";
pub const TOOL_SUMMARIZE: &str = "summarizeDocument";
pub const TOOL_SEND_EMAIL: &str = "sendEmail";
pub const TOOL_STATS: &str = "getDocumentStats";

/// Capability bridge handed to every tool invocation.
pub struct ToolContext {
    pub store: Arc<VectorStore>,
    pub email: Arc<dyn EmailSender>,
    pub model: Arc<dyn LanguageModel>,
    /// Deployment-configured distance gate for `searchDocuments`; `None`
    /// means no gate.
    pub search_max_distance: Option<f64>,
}

/// A tool the model can discover and call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema (object subset: typed properties + required list).
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

// ============ searchDocuments ============

pub struct SearchDocumentsTool;

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn name(&self) -> &str {
        TOOL_SEARCH
    }

    fn description(&self) -> &str {
        "Search the document corpus semantically, optionally refined by a keyword that must appear in the text"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Semantic search query" },
                "keyword": { "type": "string", "description": "Keyword the document text must contain" },
                "nResults": { "type": "integer", "description": "Max results", "default": 10 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            bail!("query must not be empty");
        }
        let keyword = params["keyword"]
            .as_str()
            .filter(|k| !k.trim().is_empty())
            .map(str::to_string);
        let n = params["nResults"].as_i64().filter(|n| *n > 0).unwrap_or(10) as usize;

        let hits = ctx
            .store
            .search(
                query,
                n,
                SearchOptions {
                    keyword,
                    max_distance: ctx.search_max_distance,
                    metadata_filter: None,
                },
            )
            .await?;

        let results: Vec<Value> = hits
            .iter()
            .map(|h| {
                json!({
                    "googleLink": h.google_link,
                    "fileName": format!("{}{}", h.metadata.name, h.metadata.extension),
                    "folderPath": h.metadata.folder_path,
                    "path": h.path,
                    "distance": format!("{:.4}", h.distance),
                })
            })
            .collect();

        Ok(json!({
            "success": true,
            "count": results.len(),
            "results": results,
        }))
    }
}

// ============ summarizeDocument ============

pub struct SummarizeDocumentTool;

/// Common file extensions users include when naming a document.
const KNOWN_EXTENSIONS: &[&str] = &[
    ".pdf", ".docx", ".doc", ".xlsx", ".xls", ".pptx", ".ppt", ".txt", ".md", ".csv",
];

fn strip_known_extension(name: &str) -> &str {
    for ext in KNOWN_EXTENSIONS {
        let Some(idx) = name.len().checked_sub(ext.len()) else {
            continue;
        };
        if let (Some(stem), Some(suffix)) = (name.get(..idx), name.get(idx..)) {
            if suffix.eq_ignore_ascii_case(ext) {
                return stem;
            }
        }
    }
    name
}

#[async_trait]
impl Tool for SummarizeDocumentTool {
    fn name(&self) -> &str {
        TOOL_SUMMARIZE
    }

    fn description(&self) -> &str {
        "Find a document by its name and produce a word-bounded summary of its content"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "documentName": { "type": "string", "description": "Name of the document to summarize" },
                "maxLength": { "type": "integer", "description": "Max summary length in words", "default": 200 },
                "query": { "type": "string", "description": "What the user wants from the summary" }
            },
            "required": ["documentName", "query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let document_name = params["documentName"].as_str().unwrap_or("");
        if document_name.trim().is_empty() {
            bail!("documentName must not be empty");
        }
        let query = params["query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            bail!("query must not be empty");
        }
        let max_length = params["maxLength"]
            .as_i64()
            .filter(|n| *n > 0)
            .unwrap_or(200);

        // Exact name match first; users often quote names verbatim.
        let mut filter = HashMap::new();
        filter.insert("name".to_string(), document_name.to_string());
        let mut hits = ctx
            .store
            .search(
                query,
                5,
                SearchOptions {
                    metadata_filter: Some(filter),
                    ..Default::default()
                },
            )
            .await?;

        if hits.is_empty() {
            let keyword = strip_known_extension(document_name).to_string();
            hits = ctx
                .store
                .search(
                    query,
                    5,
                    SearchOptions {
                        keyword: Some(keyword),
                        ..Default::default()
                    },
                )
                .await?;
        }

        let Some(best) = hits.into_iter().next() else {
            return Ok(json!({
                "success": false,
                "message": format!("Document \"{}\" was not found in the database", document_name),
            }));
        };

        let prompt = format!(
            "Create a summary of the following document in at most {} words. \
             Focus on: {}\n\nDocument:\n{}",
            max_length, query, best.text
        );
        let summary = ctx.model.chat(&prompt).await?;

        Ok(json!({
            "success": true,
            "documentName": best.metadata.name,
            "folderPath": best.metadata.folder_path,
            "googleLink": best.google_link,
            "extension": best.metadata.extension,
            "summary": summary,
            "originalLength": best.text.split_whitespace().count(),
            "summaryWordCount": summary.split_whitespace().count(),
        }))
    }
}

// ============ sendEmail ============

pub struct SendEmailTool;

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &str {
        TOOL_SEND_EMAIL
    }

    fn description(&self) -> &str {
        "Send an email with the given subject and message to one recipient"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to": { "type": "string", "description": "Recipient email address" },
                "subject": { "type": "string", "description": "Email subject" },
                "message": { "type": "string", "description": "Email body" },
                "recipientName": { "type": "string", "description": "Recipient name for the greeting" }
            },
            "required": ["to", "subject", "message"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let to = params["to"].as_str().unwrap_or("");
        let subject = params["subject"].as_str().unwrap_or("");
        let message = params["message"].as_str().unwrap_or("");
        if to.trim().is_empty() || subject.trim().is_empty() || message.trim().is_empty() {
            bail!("to, subject, and message are all required");
        }

        let body = match params["recipientName"].as_str().filter(|n| !n.trim().is_empty()) {
            Some(name) => format!("Hi {},<br/><br/>{}", name, message),
            None => message.to_string(),
        };

        ctx.email.send(to, subject, &body).await?;

        Ok(json!({
            "success": true,
            "message": format!("Email sent to {}", to),
            "sentEmail": { "to": to, "subject": subject, "body": body },
        }))
    }
}

// ============ getDocumentStats ============

pub struct GetDocumentStatsTool;

#[async_trait]
impl Tool for GetDocumentStatsTool {
    fn name(&self) -> &str {
        TOOL_STATS
    }

    fn description(&self) -> &str {
        "Report how many documents the corpus currently holds"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let stats = ctx.store.get_stats().await?;
        Ok(json!({
            "success": true,
            "count": stats.count,
            "name": stats.name,
        }))
    }
}

// ============ Registry ============

/// Registry of the tools the agent exposes to the model.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry pre-loaded with the four built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchDocumentsTool));
        registry.register(Box::new(SummarizeDocumentTool));
        registry.register(Box::new(SendEmailTool));
        registry.register(Box::new(GetDocumentStatsTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Declarations in the shape the model's tool-calling API expects.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools
            .iter()
            .map(|t| ToolDeclaration {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelResponse;
    use crate::models::{ConversationTurn, DocMetadata, Document, MIME_GOOGLE_DOC};
    use crate::store::MemoryBackend;
    use std::sync::Mutex;

    struct ScriptedModel {
        summary: String,
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn chat(&self, _prompt: &str) -> Result<String> {
            Ok(self.summary.clone())
        }
        async fn chat_with_tools(
            &self,
            _turns: &[ConversationTurn],
            _tools: &[ToolDeclaration],
            _force: bool,
        ) -> Result<ModelResponse> {
            bail!("not scripted")
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string(), html_body.to_string()));
            Ok(())
        }
    }

    fn context(sender: Arc<RecordingSender>) -> ToolContext {
        let model: Arc<dyn LanguageModel> = Arc::new(ScriptedModel {
            summary: "A concise summary.".to_string(),
        });
        let store = Arc::new(VectorStore::new(
            model.clone(),
            Arc::new(MemoryBackend::new("documents")),
            "Drive".to_string(),
        ));
        ToolContext {
            store,
            email: sender,
            model,
            search_max_distance: None,
        }
    }

    async fn seed(ctx: &ToolContext, name: &str, text: &str) {
        ctx.store
            .add_many(&[Document {
                id: format!("id-{name}"),
                text: text.to_string(),
                metadata: DocMetadata {
                    name: name.to_string(),
                    mime_type: MIME_GOOGLE_DOC.to_string(),
                    folder_path: "folder".to_string(),
                    modified_time: "2024-01-01T00:00:00Z".to_string(),
                    extension: ".docx".to_string(),
                    google_link: None,
                },
            }])
            .await
            .unwrap();
    }

    #[test]
    fn builtins_declare_four_tools() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.len(), 4);
        let names: Vec<String> = registry.declarations().iter().map(|d| d.name.clone()).collect();
        assert!(names.contains(&TOOL_SEARCH.to_string()));
        assert!(names.contains(&TOOL_SUMMARIZE.to_string()));
        assert!(names.contains(&TOOL_SEND_EMAIL.to_string()));
        assert!(names.contains(&TOOL_STATS.to_string()));
        for decl in registry.declarations() {
            assert_eq!(decl.parameters["type"], "object");
        }
    }

    #[test]
    fn extension_stripping() {
        assert_eq!(strip_known_extension("report.PDF"), "report");
        assert_eq!(strip_known_extension("notes.docx"), "notes");
        assert_eq!(strip_known_extension("no extension"), "no extension");
    }

    #[tokio::test]
    async fn search_returns_result_rows() {
        let ctx = context(Arc::new(RecordingSender::default()));
        seed(&ctx, "Nested doc 2", "Contract with client XYZ dated 2024.").await;

        let tool = SearchDocumentsTool;
        let out = tool
            .execute(json!({ "query": "contract", "keyword": "xyz" }), &ctx)
            .await
            .unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["count"], 1);
        assert_eq!(out["results"][0]["fileName"], "Nested doc 2.docx");
        assert_eq!(out["results"][0]["folderPath"], "folder");
        assert_eq!(
            out["results"][0]["googleLink"],
            "https://docs.google.com/document/d/id-Nested doc 2"
        );
        assert!(out["results"][0]["distance"].is_string());
    }

    #[tokio::test]
    async fn search_rejects_empty_query() {
        let ctx = context(Arc::new(RecordingSender::default()));
        let tool = SearchDocumentsTool;
        assert!(tool.execute(json!({ "query": " " }), &ctx).await.is_err());
    }

    #[tokio::test]
    async fn summarize_finds_exact_name() {
        let ctx = context(Arc::new(RecordingSender::default()));
        seed(&ctx, "OPENAI VS CLAUDE", "A long comparison of assistants.").await;

        let tool = SummarizeDocumentTool;
        let out = tool
            .execute(
                json!({ "documentName": "OPENAI VS CLAUDE", "query": "summary of OPENAI VS CLAUDE" }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["documentName"], "OPENAI VS CLAUDE");
        assert_eq!(out["summary"], "A concise summary.");
        assert_eq!(out["summaryWordCount"], 3);
        assert_eq!(out["originalLength"], 5);
    }

    #[tokio::test]
    async fn summarize_falls_back_to_keyword() {
        let ctx = context(Arc::new(RecordingSender::default()));
        // Stored name differs from the asked name; the text mentions it.
        seed(&ctx, "Assistant comparison", "openai vs claude, in depth").await;

        let tool = SummarizeDocumentTool;
        let out = tool
            .execute(
                json!({ "documentName": "openai vs claude.pdf", "query": "summary" }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["documentName"], "Assistant comparison");
    }

    #[tokio::test]
    async fn summarize_reports_not_found() {
        let ctx = context(Arc::new(RecordingSender::default()));
        let tool = SummarizeDocumentTool;
        let out = tool
            .execute(json!({ "documentName": "Ghost", "query": "summary" }), &ctx)
            .await
            .unwrap();
        assert_eq!(out["success"], false);
        assert!(out["message"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn send_email_records_and_reports() {
        let sender = Arc::new(RecordingSender::default());
        let ctx = context(sender.clone());

        let tool = SendEmailTool;
        let out = tool
            .execute(
                json!({
                    "to": "a@b.com",
                    "subject": "Weekly summary",
                    "message": "All quiet.",
                    "recipientName": "Ana"
                }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["sentEmail"]["to"], "a@b.com");
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].2.starts_with("Hi Ana,"));
    }

    #[tokio::test]
    async fn stats_reports_count_and_name() {
        let ctx = context(Arc::new(RecordingSender::default()));
        seed(&ctx, "One", "text").await;

        let tool = GetDocumentStatsTool;
        let out = tool.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["count"], 1);
        assert_eq!(out["name"], "documents");
    }
}
