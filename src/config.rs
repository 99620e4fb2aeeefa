//! Configuration loading and validation.
//!
//! drive-agent is configured from the process environment: deployments run it
//! as a container alongside the services it talks to, so endpoints, keys, and
//! tuning knobs all arrive as environment variables.
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `GOOGLE_DRIVE_FOLDER_ID` | Root folder to sync | required for sync |
//! | `GOOGLE_DRIVE_FOLDER_ROOT_NAME` | Display name prepended to result paths | `"Drive"` |
//! | `GOOGLE_DRIVE_ACCESS_TOKEN` | Bearer token for the drive API | required for sync |
//! | `GEMINI_API_KEY` | Key for chat + embedding calls | required |
//! | `CHROMA_URL` | Vector store endpoint | required |
//! | `CHROMA_COLLECTION` | Collection name | `"documents"` |
//! | `AGENT_CHAT_MODEL` | Generative model id | `"gemini-2.0-flash"` |
//! | `AGENT_EMBED_MODEL` | Embedding model id | `"text-embedding-004"` |
//! | `SEARCH_MAX_DISTANCE` | Distance gate for document search | none |
//! | `SYNC_CACHE_PATH` | Sync state file | `"./data/sync-cache.json"` |

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root drive folder id; empty until a sync-capable deployment sets it.
    pub drive_folder_id: String,
    /// Display name prepended to `path` in search results.
    pub drive_root_name: String,
    /// Bearer token for drive/sheets calls. Token provisioning (OAuth
    /// refresh, service accounts) happens outside this process.
    pub drive_access_token: String,
    pub gemini_api_key: String,
    pub chroma_url: String,
    pub collection: String,
    pub chat_model: String,
    pub embed_model: String,
    /// Optional nearest-neighbor distance gate for the search tool.
    pub search_max_distance: Option<f64>,
    pub sync_cache_path: PathBuf,
    pub sync_batch_size: usize,
    pub max_folders: usize,
    pub tool_timeout: Duration,
}

fn default_root_name() -> String {
    "Drive".to_string()
}
fn default_collection() -> String {
    "documents".to_string()
}
fn default_chat_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_embed_model() -> String {
    "text-embedding-004".to_string()
}
fn default_sync_cache_path() -> PathBuf {
    PathBuf::from("./data/sync-cache.json")
}

const DEFAULT_SYNC_BATCH_SIZE: usize = 50;
const DEFAULT_MAX_FOLDERS: usize = 10_000;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Read configuration from the environment and validate it.
    ///
    /// Drive settings are allowed to be absent here: `task`/`search` only
    /// need the model and the vector store. [`Config::require_drive`] gates
    /// the commands that do need them.
    pub fn from_env() -> Result<Self> {
        let gemini_api_key =
            env_opt("GEMINI_API_KEY").context("GEMINI_API_KEY must be set")?;
        let chroma_url = env_opt("CHROMA_URL").context("CHROMA_URL must be set")?;

        let search_max_distance = match env_opt("SEARCH_MAX_DISTANCE") {
            Some(raw) => {
                let v: f64 = raw
                    .parse()
                    .with_context(|| format!("SEARCH_MAX_DISTANCE is not a number: {raw}"))?;
                if v <= 0.0 {
                    bail!("SEARCH_MAX_DISTANCE must be > 0, got {v}");
                }
                Some(v)
            }
            None => None,
        };

        Ok(Self {
            drive_folder_id: env_opt("GOOGLE_DRIVE_FOLDER_ID").unwrap_or_default(),
            drive_root_name: env_opt("GOOGLE_DRIVE_FOLDER_ROOT_NAME")
                .unwrap_or_else(default_root_name),
            drive_access_token: env_opt("GOOGLE_DRIVE_ACCESS_TOKEN").unwrap_or_default(),
            gemini_api_key,
            chroma_url: chroma_url.trim_end_matches('/').to_string(),
            collection: env_opt("CHROMA_COLLECTION").unwrap_or_else(default_collection),
            chat_model: env_opt("AGENT_CHAT_MODEL").unwrap_or_else(default_chat_model),
            embed_model: env_opt("AGENT_EMBED_MODEL").unwrap_or_else(default_embed_model),
            search_max_distance,
            sync_cache_path: env_opt("SYNC_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_sync_cache_path),
            sync_batch_size: DEFAULT_SYNC_BATCH_SIZE,
            max_folders: DEFAULT_MAX_FOLDERS,
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
        })
    }

    /// Fail unless the drive-side settings needed by `sync` are present.
    pub fn require_drive(&self) -> Result<()> {
        if self.drive_folder_id.is_empty() {
            bail!("GOOGLE_DRIVE_FOLDER_ID must be set to sync");
        }
        if self.drive_access_token.is_empty() {
            bail!("GOOGLE_DRIVE_ACCESS_TOKEN must be set to sync");
        }
        Ok(())
    }
}
