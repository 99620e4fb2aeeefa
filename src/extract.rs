//! File-type-aware text extraction for synced documents.
//!
//! The pipeline supplies bytes plus a MIME type; this module returns plain
//! UTF-8 text. Extraction never fails the caller: anything unextractable
//! produces an empty string, and per-format failures are logged with the
//! input size and path so skipped documents can be traced.
//!
//! | MIME | Strategy |
//! |------|----------|
//! | `application/pdf` | PDF byte parser, concatenated page text |
//! | DOCX / drive-native document | OOXML `w:t` walk; UTF-8 fallback on failure |
//! | XLSX / drive-native spreadsheet | OOXML shared-string walk, one `[Sheet: <name>]` block per sheet, cells joined by tabs |
//! | drive-native presentation | exported to PDF upstream, parsed as PDF |
//! | `text/*` | bytes as UTF-8 |

use std::io::Read;

use anyhow::{anyhow, Context, Result};
use tracing::warn;

use crate::models::{
    MIME_DOCX, MIME_GOOGLE_DOC, MIME_GOOGLE_SHEET, MIME_GOOGLE_SLIDES, MIME_PDF, MIME_XLSX,
};

/// Maximum sheets to process in an xlsx workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract plain text from `bytes` according to `mime_type`.
///
/// Returns an empty string when nothing is extractable; `path` is only used
/// in diagnostics. Zero-byte inputs short-circuit.
pub fn extract_text(bytes: &[u8], mime_type: &str, path: &str) -> String {
    if bytes.is_empty() {
        return String::new();
    }

    let result = match mime_type {
        MIME_PDF | MIME_GOOGLE_SLIDES => extract_pdf(bytes),
        MIME_DOCX | MIME_GOOGLE_DOC => {
            // Word payloads that fail OOXML parsing are occasionally plain
            // text behind a mislabeled MIME; keep their content.
            extract_docx(bytes).or_else(|e| {
                warn!(path, size = bytes.len(), error = %e, "docx extraction failed, falling back to utf-8");
                Ok(String::from_utf8_lossy(bytes).into_owned())
            })
        }
        MIME_XLSX | MIME_GOOGLE_SHEET => extract_xlsx(bytes),
        t if t.starts_with("text/") => Ok(String::from_utf8_lossy(bytes).into_owned()),
        other => {
            warn!(path, size = bytes.len(), mime_type = other, "unsupported mime type, skipping");
            return String::new();
        }
    };

    match result {
        Ok(text) => text,
        Err(e) => {
            warn!(path, size = bytes.len(), mime_type, error = %e, "text extraction failed");
            String::new()
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| anyhow!("PDF: {}", e))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>> {
    let entry = archive.by_name(name)?;
    let mut out = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        anyhow::bail!("ZIP entry {} exceeds size limit", name);
    }
    Ok(out)
}

// ============ DOCX ============

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).context("not a ZIP archive")?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml")
        .context("word/document.xml not found")?;
    extract_w_t_elements(&doc_xml)
}

/// Collect the text content of every `t` element, paragraph-separated.
fn extract_w_t_elements(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(anyhow!("OOXML: {}", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

// ============ XLSX ============

fn extract_xlsx(bytes: &[u8]) -> Result<String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).context("not a ZIP archive")?;
    // sharedStrings.xml is absent in all-numeric workbooks.
    let shared_strings = read_shared_strings(&mut archive).unwrap_or_default();
    let sheet_files = list_worksheet_files(&mut archive);
    let sheet_names = read_sheet_names(&mut archive).unwrap_or_default();

    let mut out = String::new();
    for (idx, file) in sheet_files.into_iter().take(XLSX_MAX_SHEETS).enumerate() {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &file)?;
        let body = extract_sheet_rows(&sheet_xml, &shared_strings)?;
        if body.trim().is_empty() {
            continue;
        }
        let name = sheet_names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("Sheet{}", idx + 1));
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("[Sheet: {}]\n{}", name, body));
    }
    Ok(out)
}

fn list_worksheet_files(archive: &mut Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Display names from `xl/workbook.xml`, in worksheet order.
fn read_sheet_names(archive: &mut Archive<'_>) -> Result<Vec<String>> {
    let xml = read_zip_entry_bounded(archive, "xl/workbook.xml")?;
    let mut names = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"name" {
                            names.push(String::from_utf8_lossy(&attr.value).into_owned());
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(anyhow!("OOXML: {}", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        strings.push(te.unescape().unwrap_or_default().into_owned());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(anyhow!("OOXML: {}", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// One line per row, non-empty cells joined by tabs. Shared-string cells are
/// resolved through the string table; other cells keep their literal value.
fn extract_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_v = false;
    let mut cell_is_shared_str = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    cell_is_shared_str = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" => in_v = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_v => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if !s.is_empty() {
                    let cell = if cell_is_shared_str {
                        s.parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                    } else {
                        Some(s.to_string())
                    };
                    if let Some(cell) = cell {
                        row.push(cell);
                        cell_count += 1;
                    }
                }
                in_v = false;
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"c" => cell_is_shared_str = false,
                b"row" => {
                    if !row.is_empty() {
                        lines.push(row.join("\t"));
                        row.clear();
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(anyhow!("OOXML: {}", e)),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        lines.push(row.join("\t"));
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, content) in entries {
                writer
                    .start_file(name.to_string(), SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn zero_byte_input_is_empty() {
        assert_eq!(extract_text(b"", MIME_PDF, "empty.pdf"), "");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(
            extract_text("hello world".as_bytes(), "text/plain", "a.txt"),
            "hello world"
        );
    }

    #[test]
    fn unsupported_mime_is_empty_not_error() {
        assert_eq!(
            extract_text(b"\x00\x01", "application/octet-stream", "blob.bin"),
            ""
        );
    }

    #[test]
    fn invalid_pdf_is_empty() {
        assert_eq!(extract_text(b"not a pdf", MIME_PDF, "bad.pdf"), "");
    }

    #[test]
    fn broken_docx_falls_back_to_utf8() {
        let text = extract_text(b"just plain words", MIME_DOCX, "odd.docx");
        assert_eq!(text, "just plain words");
    }

    #[test]
    fn docx_extracts_paragraph_text() {
        let doc_xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Contract with client XYZ</w:t></w:r></w:p>
    <w:p><w:r><w:t>dated 2024.</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let bytes = build_zip(&[("word/document.xml", doc_xml)]);
        let text = extract_text(&bytes, MIME_DOCX, "contract.docx");
        assert!(text.contains("Contract with client XYZ"));
        assert!(text.contains("dated 2024."));
    }

    #[test]
    fn xlsx_extracts_labeled_sheets() {
        let workbook = r#"<?xml version="1.0"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <sheets><sheet name="Budget" sheetId="1" r:id="rId1" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"/></sheets>
</workbook>"#;
        let shared = r#"<?xml version="1.0"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="2" uniqueCount="2">
  <si><t>Item</t></si><si><t>Cost</t></si>
</sst>"#;
        let sheet = r#"<?xml version="1.0"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <sheetData>
    <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
    <row r="2"><c r="A2"><v>42</v></c></row>
  </sheetData>
</worksheet>"#;
        let bytes = build_zip(&[
            ("xl/workbook.xml", workbook),
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let text = extract_text(&bytes, MIME_XLSX, "budget.xlsx");
        assert!(text.starts_with("[Sheet: Budget]"));
        assert!(text.contains("Item\tCost"));
        assert!(text.contains("42"));
    }
}
