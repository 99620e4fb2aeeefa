//! # Drive Agent
//!
//! **A tool-using agent runtime over a drive-synced document corpus.**
//!
//! drive-agent pairs two subsystems around one vector store:
//!
//! 1. An **ingestion pipeline** that keeps the vector store synchronized
//!    with a Google Drive folder tree — incremental (additions, changes,
//!    deletions), batched, and durable across restarts via a sync cache.
//! 2. An **agent orchestrator** that answers natural-language tasks by
//!    iterating a generative model against a small tool registry (document
//!    search, per-document summarization, email, corpus statistics) until
//!    the model produces a final answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────────┐   ┌─────────────┐
//! │  Drive    │──▶│   Ingestion    │──▶│ VectorStore │
//! │  folders  │   │ extract+embed  │   │  (Chroma)   │
//! └───────────┘   └────────────────┘   └──────┬──────┘
//!                                             │
//!                 ┌───────────────┐   ┌───────┴──────┐
//!  user task ────▶│ Orchestrator  │◀─▶│ ToolRegistry │
//!                 │  (model loop) │   │ search/email │
//!                 └───────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment-sourced configuration with validation |
//! | [`models`] | Core data types: `Document`, `DriveFile`, conversation turns |
//! | [`llm`] | `LanguageModel` trait and the Gemini REST binding |
//! | [`store`] | Vector store façade, backend trait, in-memory backend |
//! | [`chroma`] | Chroma REST backend |
//! | [`extract`] | MIME-dispatched text extraction (PDF, DOCX, XLSX, text) |
//! | [`drive`] | Drive client trait, BFS traversal, REST binding, web links |
//! | [`email`] | `EmailSender` capability boundary |
//! | [`tools`] | Tool trait, registry, and the four built-in tools |
//! | [`agent`] | The bounded tool loop and answer formatting |
//! | [`sync`] | Incremental drive→store ingestion pipeline |
//! | [`sync_cache`] | Durable last-sync record (atomic JSON file) |
//! | [`error`] | Task error taxonomy with stable codes |
//!
//! ## Quick Start
//!
//! ```bash
//! dagent sync                               # mirror the drive folder
//! dagent task "Where is Jelena mentioned?"  # run an agent task
//! dagent search "contracts" --keyword XYZ   # query the store directly
//! dagent stats                              # corpus size
//! ```

pub mod agent;
pub mod chroma;
pub mod config;
pub mod drive;
pub mod email;
pub mod error;
pub mod extract;
pub mod llm;
pub mod models;
pub mod store;
pub mod sync;
pub mod sync_cache;
pub mod tools;
