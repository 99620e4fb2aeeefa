//! Core data types used throughout drive-agent.
//!
//! These types represent the documents, drive listings, and conversation
//! turns that flow through the ingestion pipeline and the agent loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============ MIME types ============

/// Drive-native formats, stored in the drive service's own format and
/// exported to a portable MIME before parsing.
pub const MIME_FOLDER: &str = "application/vnd.google-apps.folder";
pub const MIME_GOOGLE_DOC: &str = "application/vnd.google-apps.document";
pub const MIME_GOOGLE_SHEET: &str = "application/vnd.google-apps.spreadsheet";
pub const MIME_GOOGLE_SLIDES: &str = "application/vnd.google-apps.presentation";

/// Portable formats parsed directly from bytes.
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

// ============ Documents ============

/// Side metadata stored alongside every document in the vector store.
///
/// Immutable once written for a given `(id, modified_time)` pair. Field
/// names serialize in the drive API's camelCase so stored metadata maps
/// read back without translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocMetadata {
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub folder_path: String,
    /// Canonical modification timestamp (RFC 3339), the sync identity.
    pub modified_time: String,
    #[serde(default)]
    pub extension: String,
    /// Web link stored at ingest time; derived from the MIME type when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_link: Option<String>,
}

/// The stored unit in the vector store: a whole document, embedded as one
/// vector. The `id` is the remote drive file id (stable across renames).
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: DocMetadata,
}

/// In-memory descriptor of a remote file during sync. Folders are traversal
/// nodes only and never become `DriveFile`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// Slash-joined folder chain from the configured root (exclusive) to the
    /// file's parent. Empty for files directly under the root.
    pub folder_path: String,
    pub modified_time: String,
}

// ============ Agent conversation ============

/// A structured tool invocation emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub parameters: Value,
}

/// One executed tool call with its serialized result, recorded per run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub name: String,
    pub parameters: Value,
    pub result: Value,
}

/// One turn of the agent conversation. The sequence is owned by a single
/// task execution and discarded on return.
#[derive(Debug, Clone)]
pub enum ConversationTurn {
    /// Fixed policy instruction, present exactly once at the head.
    System(String),
    /// The user's task text.
    User(String),
    /// Plain text produced by the model.
    ModelText(String),
    /// Tool calls emitted by the model, in emission order.
    ModelCall(Vec<ToolCall>),
    /// Result payload from executing one tool, reflected back to the model.
    ToolResult { name: String, payload: Value },
}
