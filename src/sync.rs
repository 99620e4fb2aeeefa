//! Ingestion pipeline: bring the vector store into agreement with a drive
//! folder tree.
//!
//! Each run lists the remote tree, diffs it against the store's contents,
//! and converges in one pass: deletions first (so re-added documents observe
//! their own writes), then downloads + extraction + embedding in batches.
//! Per-file failures are counted and logged but never abort a batch; the
//! sync cache is written even when files failed, because failed files are
//! absent from the store and the next run re-drives them.
//!
//! Per-file state machine: downloaded → extracted → embedded → upserted →
//! cleaned-up, with `skipped-empty` and `failed` exits, both followed by
//! temp cleanup.
//!
//! At most one run per root folder id executes at a time; a process-wide
//! lock guards entry.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::drive::{self, DriveClient};
use crate::extract;
use crate::models::{DocMetadata, Document, DriveFile, MIME_GOOGLE_SHEET};
use crate::store::VectorStore;
use crate::sync_cache::{self, SyncCacheRecord};

/// Aggregate counts from one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Files present in the drive listing.
    pub listed: u64,
    pub added: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped_empty: u64,
    pub failed: u64,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.deleted == 0 && self.failed == 0
    }
}

/// The three disjoint delta sets between a drive listing and the store.
#[derive(Debug, Default)]
struct SyncDelta {
    to_add: Vec<DriveFile>,
    to_update: Vec<DriveFile>,
    to_delete: Vec<String>,
}

fn compute_delta(drive_files: &[DriveFile], stored: &[Document]) -> SyncDelta {
    let stored_by_id: HashMap<&str, &Document> =
        stored.iter().map(|d| (d.id.as_str(), d)).collect();
    let drive_ids: HashSet<&str> = drive_files.iter().map(|f| f.id.as_str()).collect();

    let mut delta = SyncDelta::default();
    for file in drive_files {
        match stored_by_id.get(file.id.as_str()) {
            None => delta.to_add.push(file.clone()),
            Some(doc) if doc.metadata.modified_time != file.modified_time => {
                delta.to_update.push(file.clone())
            }
            Some(_) => {}
        }
    }
    for doc in stored {
        if !drive_ids.contains(doc.id.as_str()) {
            delta.to_delete.push(doc.id.clone());
        }
    }
    delta
}

// One lock per root folder id; a second run for the same root waits.
static SYNC_LOCKS: LazyLock<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn lock_for(root_folder_id: &str) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = SYNC_LOCKS.lock().unwrap();
    locks
        .entry(root_folder_id.to_string())
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone()
}

pub struct IngestionPipeline {
    drive: Arc<dyn DriveClient>,
    store: Arc<VectorStore>,
    root_folder_id: String,
    cache_path: PathBuf,
    max_folders: usize,
    batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(
        drive: Arc<dyn DriveClient>,
        store: Arc<VectorStore>,
        root_folder_id: String,
        cache_path: PathBuf,
        max_folders: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            drive,
            store,
            root_folder_id,
            cache_path,
            max_folders,
            batch_size,
        }
    }

    /// Run one incremental sync. Idempotent: an unchanged drive produces no
    /// store writes beyond a refreshed cache timestamp.
    pub async fn run(&self) -> Result<SyncReport> {
        let entry_lock = lock_for(&self.root_folder_id);
        let _guard = entry_lock.lock().await;

        let sync_start_time = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let previous = sync_cache::load(&self.cache_path);
        match &previous {
            Some(record) => info!(
                last_sync = %record.last_sync_time,
                file_count = record.file_count,
                "starting sync"
            ),
            None => info!("starting sync, no prior sync record"),
        }

        let drive_files = self
            .drive
            .list_tree(&self.root_folder_id, self.max_folders)
            .await
            .context("listing drive tree")?;
        let stored = self.store.get_all().await.context("reading stored documents")?;

        let delta = compute_delta(&drive_files, &stored);
        let mut report = SyncReport {
            listed: drive_files.len() as u64,
            deleted: delta.to_delete.len() as u64,
            ..Default::default()
        };

        if delta.to_add.is_empty() && delta.to_update.is_empty() && delta.to_delete.is_empty() {
            info!(files = report.listed, "store already in sync");
            self.write_cache(&sync_start_time, report.listed)?;
            return Ok(report);
        }

        // Changed documents are deleted before re-adding, and the deletion
        // is awaited so the adds below observe it.
        let mut delete_ids = delta.to_delete.clone();
        delete_ids.extend(delta.to_update.iter().map(|f| f.id.clone()));
        self.store
            .delete_many(&delete_ids)
            .await
            .context("deleting removed and changed documents")?;

        let work: Vec<(DriveFile, bool)> = delta
            .to_add
            .into_iter()
            .map(|f| (f, false))
            .chain(delta.to_update.into_iter().map(|f| (f, true)))
            .collect();

        let total = work.len();
        for (batch_index, batch) in work.chunks(self.batch_size).enumerate() {
            for (file, is_update) in batch {
                match self.process_file(file).await {
                    Ok(true) => {
                        if *is_update {
                            report.updated += 1;
                        } else {
                            report.added += 1;
                        }
                    }
                    Ok(false) => report.skipped_empty += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            id = %file.id,
                            name = %file.name,
                            error = %e,
                            "file failed to ingest"
                        );
                    }
                }
            }
            let processed = (batch_index * self.batch_size + batch.len()) as u64;
            info!(
                batch = batch_index + 1,
                processed,
                total,
                added = report.added,
                updated = report.updated,
                skipped = report.skipped_empty,
                failed = report.failed,
                "sync progress"
            );
        }

        self.write_cache(&sync_start_time, report.listed)?;
        Ok(report)
    }

    /// Ingest one file. `Ok(true)` = stored, `Ok(false)` = skipped empty.
    async fn process_file(&self, file: &DriveFile) -> Result<bool> {
        let display_path = if file.folder_path.is_empty() {
            file.name.clone()
        } else {
            format!("{}/{}", file.folder_path, file.name)
        };

        let text = if file.mime_type == MIME_GOOGLE_SHEET {
            // Structured reads beat binary export for native spreadsheets;
            // fall back to the XLSX export when the sheet API is unavailable.
            match self.drive.read_sheet(&file.id).await {
                Ok(text) if !text.trim().is_empty() => text,
                Ok(_) => String::new(),
                Err(e) => {
                    warn!(id = %file.id, error = %e, "sheet read failed, falling back to export");
                    self.download_and_extract(file, &display_path).await?
                }
            }
        } else {
            self.download_and_extract(file, &display_path).await?
        };

        if text.trim().is_empty() {
            info!(path = %display_path, "no extractable text, skipping");
            return Ok(false);
        }

        let extension = drive::extension_for(&file.mime_type, &file.name);
        let doc = Document {
            id: file.id.clone(),
            text,
            metadata: DocMetadata {
                name: file.name.clone(),
                mime_type: file.mime_type.clone(),
                folder_path: file.folder_path.clone(),
                modified_time: file.modified_time.clone(),
                extension,
                google_link: Some(drive::web_link(&file.id, &file.mime_type)),
            },
        };
        self.store.add_many(std::slice::from_ref(&doc)).await?;
        Ok(true)
    }

    async fn download_and_extract(&self, file: &DriveFile, display_path: &str) -> Result<String> {
        let extension = drive::extension_for(&file.mime_type, &file.name);
        // NamedTempFile removes itself on drop, covering the failure exits.
        let tmp = tempfile::Builder::new()
            .prefix("dagent-")
            .suffix(&extension)
            .tempfile()
            .context("creating temp download file")?;

        self.drive
            .download(&file.id, &file.mime_type, tmp.path())
            .await
            .with_context(|| format!("downloading {display_path}"))?;

        let bytes = tokio::fs::read(tmp.path())
            .await
            .with_context(|| format!("reading {}", tmp.path().display()))?;
        Ok(extract::extract_text(&bytes, &file.mime_type, display_path))
    }

    fn write_cache(&self, sync_start_time: &str, file_count: u64) -> Result<()> {
        sync_cache::store(
            &self.cache_path,
            &SyncCacheRecord {
                last_sync_time: sync_start_time.to_string(),
                file_count,
            },
        )
    }
}
