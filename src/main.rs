//! `dagent` — CLI binding for the drive-agent core.
//!
//! Subcommands map one-to-one onto the core operations: `task` runs the
//! agent loop, `sync` runs the ingestion pipeline, and `search`/`stats`/
//! `reset` talk to the vector store directly. Logs go to stderr so stdout
//! stays parseable.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use drive_agent::agent::{AgentOrchestrator, DEFAULT_MAX_ITERATIONS};
use drive_agent::chroma::ChromaBackend;
use drive_agent::config::Config;
use drive_agent::drive::GoogleDriveClient;
use drive_agent::email::DisabledEmailSender;
use drive_agent::llm::{GeminiModel, LanguageModel};
use drive_agent::store::{SearchOptions, VectorStore};
use drive_agent::sync::IngestionPipeline;
use drive_agent::tools::{ToolContext, ToolRegistry};

#[derive(Parser)]
#[command(
    name = "dagent",
    about = "Drive Agent — a tool-using agent runtime over a drive-synced document corpus",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an agent task and print the result envelope as JSON
    Task {
        /// The task in natural language
        prompt: String,

        /// Iteration budget for the tool loop (1-10)
        #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
        max_iterations: u32,
    },

    /// Synchronize the vector store with the configured drive folder
    Sync,

    /// Search indexed documents
    Search {
        /// Search query
        query: String,

        /// Keyword the document text must contain
        #[arg(long)]
        keyword: Option<String>,

        /// Maximum number of results
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show collection statistics
    Stats,

    /// Delete every document in the collection
    Reset {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

async fn open_store(config: &Config) -> Result<(Arc<dyn LanguageModel>, Arc<VectorStore>)> {
    let model: Arc<dyn LanguageModel> = Arc::new(GeminiModel::new(
        config.gemini_api_key.clone(),
        config.chat_model.clone(),
        config.embed_model.clone(),
    )?);
    let backend = ChromaBackend::open(&config.chroma_url, &config.collection).await?;
    let store = Arc::new(VectorStore::new(
        model.clone(),
        Arc::new(backend),
        config.drive_root_name.clone(),
    ));
    Ok((model, store))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("drive_agent=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Task {
            prompt,
            max_iterations,
        } => {
            let (model, store) = open_store(&config).await?;
            let ctx = ToolContext {
                store,
                email: Arc::new(DisabledEmailSender),
                model: model.clone(),
                search_max_distance: config.search_max_distance,
            };
            let orchestrator = AgentOrchestrator::new(
                model,
                ToolRegistry::with_builtins(),
                ctx,
                config.tool_timeout,
            );
            match orchestrator.execute_task(&prompt, max_iterations).await {
                Ok(report) => {
                    println!("{}", serde_json::to_string_pretty(&report.to_envelope())?);
                }
                Err(e) => {
                    println!("{}", serde_json::to_string_pretty(&e.to_envelope())?);
                    std::process::exit(1);
                }
            }
        }
        Commands::Sync => {
            config.require_drive()?;
            let (_, store) = open_store(&config).await?;
            let drive = Arc::new(GoogleDriveClient::new(config.drive_access_token.clone())?);
            let pipeline = IngestionPipeline::new(
                drive,
                store,
                config.drive_folder_id.clone(),
                config.sync_cache_path.clone(),
                config.max_folders,
                config.sync_batch_size,
            );
            let report = pipeline.run().await?;
            println!("sync {}", config.drive_folder_id);
            println!("  listed: {} files", report.listed);
            println!("  added: {}", report.added);
            println!("  updated: {}", report.updated);
            println!("  deleted: {}", report.deleted);
            println!("  skipped (no text): {}", report.skipped_empty);
            println!("  failed: {}", report.failed);
            println!("ok");
        }
        Commands::Search {
            query,
            keyword,
            limit,
        } => {
            let (_, store) = open_store(&config).await?;
            let hits = store
                .search(
                    &query,
                    limit,
                    SearchOptions {
                        keyword,
                        max_distance: config.search_max_distance,
                        metadata_filter: None,
                    },
                )
                .await?;
            if hits.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for (i, hit) in hits.iter().enumerate() {
                println!("{}. [{:.4}] {}", i + 1, hit.distance, hit.path);
                if hit.keyword_count > 0 {
                    println!("    keyword matches: {}", hit.keyword_count);
                }
                println!("    link: {}", hit.google_link);
            }
        }
        Commands::Stats => {
            let (_, store) = open_store(&config).await?;
            let stats = store.get_stats().await?;
            println!("collection: {}", stats.name);
            println!("documents:  {}", stats.count);
        }
        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to reset without --yes");
            }
            let (_, store) = open_store(&config).await?;
            store.reset().await?;
            println!("Collection emptied.");
        }
    }

    Ok(())
}
