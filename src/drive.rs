//! Drive client: folder-tree enumeration, downloads with native-format
//! export, and structured spreadsheet reads.
//!
//! Traversal is an iterative breadth-first walk with a visited set and a
//! folder budget, so cyclic shares or pathological trees terminate with
//! partial results instead of recursing away. Listing failures on a single
//! folder are logged and skipped; they never abort the walk.
//!
//! Token provisioning (OAuth refresh, service accounts) lives outside this
//! process; the client takes a ready bearer token.

use std::collections::{HashSet, VecDeque};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::models::{
    DriveFile, MIME_DOCX, MIME_FOLDER, MIME_GOOGLE_DOC, MIME_GOOGLE_SHEET, MIME_GOOGLE_SLIDES,
    MIME_PDF, MIME_XLSX,
};

const DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4";

/// Web link for a file, derived from its MIME type.
pub fn web_link(id: &str, mime_type: &str) -> String {
    match mime_type {
        MIME_GOOGLE_DOC => format!("https://docs.google.com/document/d/{id}"),
        MIME_GOOGLE_SHEET => format!("https://docs.google.com/spreadsheets/d/{id}"),
        MIME_GOOGLE_SLIDES => format!("https://docs.google.com/presentation/d/{id}"),
        _ => format!("https://drive.google.com/file/d/{id}"),
    }
}

/// Server-side export target for drive-native formats; `None` for files that
/// download as-is.
pub fn export_mime(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        MIME_GOOGLE_DOC => Some(MIME_DOCX),
        MIME_GOOGLE_SHEET => Some(MIME_XLSX),
        MIME_GOOGLE_SLIDES => Some(MIME_PDF),
        _ => None,
    }
}

/// File extension used for temp downloads and display, chosen by MIME with
/// the original file name as fallback.
pub fn extension_for(mime_type: &str, name: &str) -> String {
    match mime_type {
        MIME_GOOGLE_DOC | MIME_DOCX => ".docx".to_string(),
        MIME_GOOGLE_SHEET | MIME_XLSX => ".xlsx".to_string(),
        MIME_GOOGLE_SLIDES | MIME_PDF => ".pdf".to_string(),
        t if t.starts_with("text/") => ".txt".to_string(),
        _ => name
            .rsplit_once('.')
            .map(|(_, ext)| format!(".{ext}"))
            .unwrap_or_default(),
    }
}

/// Remote drive capability consumed by the ingestion pipeline.
#[async_trait]
pub trait DriveClient: Send + Sync {
    /// Enumerate every file under `root_folder_id`, visiting at most
    /// `max_folders` folders. Folders themselves are not returned.
    async fn list_tree(&self, root_folder_id: &str, max_folders: usize) -> Result<Vec<DriveFile>>;

    /// Stream a file's bytes to `dest`, exporting drive-native formats to
    /// their portable MIME first. Returns once the body end-of-stream has
    /// been written out.
    async fn download(&self, file_id: &str, mime_type: &str, dest: &Path) -> Result<()>;

    /// Structured read of a native spreadsheet: one `[Sheet: <name>]` block
    /// per sheet, non-empty cells joined by tabs.
    async fn read_sheet(&self, file_id: &str) -> Result<String>;
}

// ============ Traversal ============

/// One child of a folder listing.
#[derive(Debug, Clone)]
pub(crate) struct DriveChild {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub modified_time: String,
}

/// Seam between the BFS walk and the listing transport, so the walk is
/// testable without a remote service.
#[async_trait]
pub(crate) trait FolderLister: Sync {
    async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveChild>>;
}

pub(crate) async fn traverse(
    lister: &impl FolderLister,
    root_folder_id: &str,
    max_folders: usize,
) -> Vec<DriveFile> {
    let mut files = Vec::new();
    let mut queue: VecDeque<(String, String)> = VecDeque::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut processed = 0usize;

    queue.push_back((root_folder_id.to_string(), String::new()));
    visited.insert(root_folder_id.to_string());

    while let Some((folder_id, rel_path)) = queue.pop_front() {
        if processed >= max_folders {
            warn!(
                max_folders,
                pending = queue.len() + 1,
                "folder budget reached, returning partial tree"
            );
            break;
        }
        processed += 1;

        let children = match lister.list_children(&folder_id).await {
            Ok(children) => children,
            Err(e) => {
                warn!(folder_id = %folder_id, error = %e, "failed to list folder, skipping");
                continue;
            }
        };

        for child in children {
            if child.mime_type == MIME_FOLDER {
                if visited.insert(child.id.clone()) {
                    let child_path = if rel_path.is_empty() {
                        child.name
                    } else {
                        format!("{}/{}", rel_path, child.name)
                    };
                    queue.push_back((child.id, child_path));
                }
            } else {
                files.push(DriveFile {
                    id: child.id,
                    name: child.name,
                    mime_type: child.mime_type,
                    folder_path: rel_path.clone(),
                    modified_time: child.modified_time,
                });
            }
        }
    }

    files
}

// ============ REST binding ============

/// [`DriveClient`] over the Drive v3 and Sheets v4 REST APIs.
pub struct GoogleDriveClient {
    client: reqwest::Client,
    token: String,
}

impl GoogleDriveClient {
    pub fn new(token: String) -> Result<Self> {
        if token.trim().is_empty() {
            bail!("drive access token must not be empty");
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;
        Ok(Self { client, token })
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("drive API error {}: {}", status, body);
        }
        Ok(response.json().await?)
    }
}

/// Escape single quotes and backslashes for a drive query literal.
fn escape_query(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\'' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl FolderLister for GoogleDriveClient {
    async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveChild>> {
        let url = format!("{DRIVE_BASE_URL}/files");
        let q = format!("'{}' in parents and trashed = false", escape_query(folder_id));
        let mut children = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = vec![
                ("q", &q),
                ("fields", "nextPageToken,files(id,name,mimeType,modifiedTime)"),
                ("pageSize", "1000"),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token));
            }
            let body = self.get_json(&url, &query).await?;

            for file in body
                .get("files")
                .and_then(|f| f.as_array())
                .into_iter()
                .flatten()
            {
                let (Some(id), Some(name), Some(mime_type)) = (
                    file.get("id").and_then(|v| v.as_str()),
                    file.get("name").and_then(|v| v.as_str()),
                    file.get("mimeType").and_then(|v| v.as_str()),
                ) else {
                    warn!(entry = %file, "skipping listing entry with incomplete metadata");
                    continue;
                };
                children.push(DriveChild {
                    id: id.to_string(),
                    name: name.to_string(),
                    mime_type: mime_type.to_string(),
                    modified_time: file
                        .get("modifiedTime")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                });
            }

            page_token = body
                .get("nextPageToken")
                .and_then(|t| t.as_str())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }

        Ok(children)
    }
}

#[async_trait]
impl DriveClient for GoogleDriveClient {
    async fn list_tree(&self, root_folder_id: &str, max_folders: usize) -> Result<Vec<DriveFile>> {
        Ok(traverse(self, root_folder_id, max_folders).await)
    }

    async fn download(&self, file_id: &str, mime_type: &str, dest: &Path) -> Result<()> {
        let url = match export_mime(mime_type) {
            Some(_) => format!("{DRIVE_BASE_URL}/files/{file_id}/export"),
            None => format!("{DRIVE_BASE_URL}/files/{file_id}"),
        };
        let mut request = self.client.get(&url).bearer_auth(&self.token);
        request = match export_mime(mime_type) {
            Some(export) => request.query(&[("mimeType", export)]),
            None => request.query(&[("alt", "media")]),
        };

        let mut response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("drive download error {}: {}", status, body);
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("creating {}", dest.display()))?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn read_sheet(&self, file_id: &str) -> Result<String> {
        let meta_url = format!("{SHEETS_BASE_URL}/spreadsheets/{file_id}");
        let meta = self
            .get_json(&meta_url, &[("fields", "sheets.properties.title")])
            .await?;
        let titles: Vec<String> = meta
            .get("sheets")
            .and_then(|s| s.as_array())
            .ok_or_else(|| anyhow!("invalid spreadsheet response: missing sheets"))?
            .iter()
            .filter_map(|s| {
                s.get("properties")
                    .and_then(|p| p.get("title"))
                    .and_then(|t| t.as_str())
                    .map(str::to_string)
            })
            .collect();

        let mut out = String::new();
        for title in titles {
            let values_url = format!(
                "{SHEETS_BASE_URL}/spreadsheets/{file_id}/values/{}",
                urlencode(&title)
            );
            let body = self.get_json(&values_url, &[]).await?;
            let rows = body.get("values").and_then(|v| v.as_array());
            let mut lines: Vec<String> = Vec::new();
            for row in rows.into_iter().flatten() {
                let cells: Vec<&str> = row
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|c| c.as_str())
                    .filter(|c| !c.trim().is_empty())
                    .collect();
                if !cells.is_empty() {
                    lines.push(cells.join("\t"));
                }
            }
            if lines.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("[Sheet: {}]\n{}", title, lines.join("\n")));
        }
        Ok(out)
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
