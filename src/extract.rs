//! Multi-format document extraction.
//!
//! Dispatches raw file bytes by extension first, then by declared content
//! type, and returns narrative text plus structured metadata. Extraction
//! never fails past this boundary: corrupt or unsupported inputs come
//! back as error-tagged results with a human-readable reason, and a
//! failing advanced spreadsheet analysis degrades to a basic per-sheet
//! summary with the tier recorded in metadata.

use std::io::Read;

use serde_json::json;
use tracing::warn;

use crate::models::FileType;
use crate::numeric;
use crate::table::{CellValue, Column, ColumnKind, Sheet};
use crate::tabular;

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum cells parsed per worksheet.
const MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum worksheets parsed per workbook.
const MAX_SHEETS: usize = 100;
/// Rows shown in the basic summary's data preview.
const PREVIEW_ROWS: usize = 10;

/// Internal extraction error; converted into error-tagged [`Extraction`]
/// results before leaving this module.
#[derive(Debug)]
pub enum ExtractError {
    Workbook(String),
    Paged(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Workbook(e) => write!(f, "workbook parse failed: {}", e),
            ExtractError::Paged(e) => write!(f, "page extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Result of extracting one uploaded file.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Narrative text handed to the segmenter.
    pub text: String,
    pub file_type: FileType,
    /// Structured metadata; always carries a `file_type` tag.
    pub metadata: serde_json::Value,
}

impl Extraction {
    /// Reason string when this extraction failed or the input was
    /// unsupported.
    pub fn error(&self) -> Option<&str> {
        self.metadata.get("error").and_then(|v| v.as_str())
    }

    /// Which analysis tier ran (`advanced` or `basic`), for tabular inputs.
    pub fn analysis_tier(&self) -> Option<&str> {
        self.metadata.get("analysis").and_then(|v| v.as_str())
    }
}

/// Format dispatcher for uploaded documents.
pub struct Extractor {
    /// When false, spreadsheets skip the advanced analyzer entirely.
    advanced_tabular: bool,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            advanced_tabular: true,
        }
    }
}

impl Extractor {
    pub fn new(advanced_tabular: bool) -> Self {
        Self { advanced_tabular }
    }

    /// Extract text and metadata from raw file bytes.
    ///
    /// Never returns an error: unsupported or unreadable inputs produce a
    /// result whose metadata carries an `error` field and whose text is
    /// the reason string.
    pub fn extract(&self, content: &[u8], filename: &str, content_type: &str) -> Extraction {
        let ext = extension_of(filename);
        let ct = content_type.to_lowercase();

        if matches!(ext.as_str(), "xlsx" | "xls")
            || ct.contains("spreadsheet")
            || ct.contains("excel")
        {
            self.extract_workbook(content)
        } else if ext == "pdf" || ct.contains("pdf") {
            extract_paged(content)
        } else if matches!(ext.as_str(), "txt" | "md") || ct.starts_with("text") {
            extract_plain_text(content)
        } else {
            let reason = format!(
                "Unsupported file type '{}'. Supported: txt, md, pdf, xlsx, xls",
                ext
            );
            Extraction {
                text: reason.clone(),
                file_type: FileType::Unsupported,
                metadata: json!({
                    "file_type": "unsupported",
                    "extension": ext,
                    "error": reason,
                }),
            }
        }
    }

    fn extract_workbook(&self, content: &[u8]) -> Extraction {
        let sheets = match parse_workbook(content) {
            Ok(sheets) => sheets,
            Err(e) => {
                let msg = e.to_string();
                let workbook =
                    serde_json::to_value(tabular::WorkbookAnalysis::from_error(msg.clone()))
                        .unwrap_or(serde_json::Value::Null);
                return Extraction {
                    text: format!("Spreadsheet analysis failed: {}", msg),
                    file_type: FileType::Tabular,
                    metadata: json!({ "file_type": "tabular", "error": msg, "workbook": workbook }),
                };
            }
        };

        if self.advanced_tabular {
            match tabular::analyze_workbook(&sheets) {
                Ok((narrative, analysis)) => {
                    let workbook =
                        serde_json::to_value(&analysis).unwrap_or(serde_json::Value::Null);
                    return Extraction {
                        text: narrative,
                        file_type: FileType::Tabular,
                        metadata: json!({
                            "file_type": "tabular",
                            "sheets": analysis.sheets,
                            "analysis": "advanced",
                            "workbook": workbook,
                        }),
                    };
                }
                Err(e) => {
                    warn!(error = %e, "advanced spreadsheet analysis failed, using basic summary");
                }
            }
        }

        basic_workbook_summary(&sheets)
    }
}

fn extension_of(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => String::new(),
    }
}

/// Basic per-sheet summary: descriptive statistics and a data preview.
/// Used when the advanced analyzer is unavailable or rejects the input.
fn basic_workbook_summary(sheets: &[Sheet]) -> Extraction {
    let mut parts = Vec::new();
    let mut numerical = serde_json::Map::new();
    let names: Vec<String> = sheets.iter().map(|s| s.name.clone()).collect();

    for sheet in sheets {
        let sheet = sheet.clone().compact();
        if sheet.is_empty() {
            continue;
        }

        let mut lines = vec![
            format!("=== SHEET: {} ===", sheet.name),
            format!(
                "Rows: {}, Columns: {}",
                sheet.row_count(),
                sheet.column_count()
            ),
            format!(
                "Columns: {}",
                sheet
                    .columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ];

        for col in &sheet.columns {
            if col.kind() != ColumnKind::Numeric {
                continue;
            }
            let values = col.numeric_values();
            if values.is_empty() {
                continue;
            }
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = numeric::mean(&values);
            let sum: f64 = values.iter().sum();
            lines.push(format!(
                "  {}: mean {:.2}, sum {:.2}, min {:.2}, max {:.2}",
                col.name, mean, sum, min, max
            ));
            numerical.insert(
                format!("{}_{}", sheet.name, col.name),
                json!({
                    "mean": mean,
                    "sum": sum,
                    "min": min,
                    "max": max,
                    "count": values.len(),
                }),
            );
        }

        lines.push(format!("Data (first {} rows):", PREVIEW_ROWS));
        lines.push(render_preview(&sheet));
        parts.push(lines.join("\n"));
    }

    let has_analytics = !numerical.is_empty();
    Extraction {
        text: parts.join("\n\n"),
        file_type: FileType::Tabular,
        metadata: json!({
            "file_type": "tabular",
            "sheets": names,
            "analysis": "basic",
            "numerical_data": numerical,
            "has_analytics": has_analytics,
        }),
    }
}

fn render_preview(sheet: &Sheet) -> String {
    let mut lines = vec![sheet
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(" | ")];
    for r in 0..sheet.row_count().min(PREVIEW_ROWS) {
        let row: Vec<String> = sheet
            .columns
            .iter()
            .map(|c| match c.cells.get(r) {
                Some(CellValue::Number(n)) => format!("{}", n),
                Some(CellValue::Text(s)) => s.clone(),
                _ => String::new(),
            })
            .collect();
        lines.push(row.join(" | "));
    }
    lines.join("\n")
}

/// Per-page text extraction for page-oriented documents.
fn extract_paged(content: &[u8]) -> Extraction {
    match pdf_extract::extract_text_from_mem_by_pages(content) {
        Ok(pages) => {
            let page_count = pages.len();
            let mut parts = Vec::new();
            for (i, page) in pages.iter().enumerate() {
                let trimmed = page.trim();
                if trimmed.is_empty() {
                    continue;
                }
                parts.push(format!("=== PAGE {}/{} ===\n{}", i + 1, page_count, trimmed));
            }
            let text = parts.join("\n\n");
            let character_count = text.chars().count();
            Extraction {
                text,
                file_type: FileType::Paged,
                metadata: json!({
                    "file_type": "paged",
                    "page_count": page_count,
                    "character_count": character_count,
                }),
            }
        }
        Err(e) => {
            let msg = ExtractError::Paged(e.to_string()).to_string();
            Extraction {
                text: msg.clone(),
                file_type: FileType::Paged,
                metadata: json!({ "file_type": "paged", "error": msg }),
            }
        }
    }
}

/// UTF-8 decode with a Latin-1 fallback; the fallback encoding is
/// recorded in metadata.
fn extract_plain_text(content: &[u8]) -> Extraction {
    match std::str::from_utf8(content) {
        Ok(s) => Extraction {
            text: s.to_string(),
            file_type: FileType::Text,
            metadata: json!({
                "file_type": "text",
                "character_count": s.chars().count(),
                "encoding": "utf-8",
            }),
        },
        Err(_) => {
            // Latin-1 maps every byte directly onto the first 256 code
            // points, so this decode cannot fail.
            let s: String = content.iter().map(|&b| b as char).collect();
            Extraction {
                text: s.clone(),
                file_type: FileType::Text,
                metadata: json!({
                    "file_type": "text",
                    "character_count": s.chars().count(),
                    "encoding": "latin-1",
                }),
            }
        }
    }
}

// ============ Workbook (xlsx) parsing ============

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

/// Parse an OOXML workbook into typed sheets.
pub fn parse_workbook(bytes: &[u8]) -> Result<Vec<Sheet>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Workbook(e.to_string()))?;

    let shared = read_shared_strings(&mut archive)?;
    let display_names = sheet_display_names(&mut archive)?;
    let files = worksheet_files(&archive);

    let mut sheets = Vec::new();
    for (idx, file) in files.into_iter().take(MAX_SHEETS).enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, &file, MAX_XML_ENTRY_BYTES)?;
        let rows = parse_sheet_rows(&xml, &shared)?;
        let name = display_names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("Sheet{}", idx + 1));
        sheets.push(sheet_from_rows(name, rows));
    }
    Ok(sheets)
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Workbook(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Workbook(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Workbook(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Shared-string table; absent in numbers-only workbooks.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    if archive.by_name("xl/sharedStrings.xml").is_err() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;

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
            Err(e) => return Err(ExtractError::Workbook(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Sheet display names from xl/workbook.xml, in document order.
fn sheet_display_names(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    if archive.by_name("xl/workbook.xml").is_err() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;

    let mut names = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"name" {
                            names.push(
                                attr.unescape_value().unwrap_or_default().into_owned(),
                            );
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Workbook(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

fn worksheet_files(archive: &Archive<'_>) -> Vec<String> {
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

/// Parse one worksheet's XML into rows of typed cells.
fn parse_sheet_rows(
    xml: &[u8],
    shared: &[String],
) -> Result<Vec<Vec<CellValue>>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut rows: Vec<Vec<CellValue>> = Vec::new();
    let mut current: Vec<(usize, CellValue)> = Vec::new();
    let mut cell_col: usize = 0;
    let mut cell_type = String::new();
    let mut cell_value: Option<CellValue> = None;
    let mut in_v = false;
    let mut in_inline = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"row" {
                    current.clear();
                } else if e.local_name().as_ref() == b"c" {
                    cell_col = current.len();
                    cell_type.clear();
                    cell_value = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"r" => {
                                if let Some(idx) = column_index(&attr.value) {
                                    cell_col = idx;
                                }
                            }
                            b"t" => {
                                cell_type = String::from_utf8_lossy(&attr.value).into_owned();
                            }
                            _ => {}
                        }
                    }
                    if cell_type == "inlineStr" {
                        in_inline = true;
                    }
                } else if e.local_name().as_ref() == b"v" {
                    in_v = true;
                } else if in_inline && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) =
                        reader.read_event_into(&mut buf)
                    {
                        cell_value = Some(CellValue::Text(
                            te.unescape().unwrap_or_default().into_owned(),
                        ));
                    }
                }
            }
            // Self-closing cells and rows never see an End event.
            Ok(quick_xml::events::Event::Empty(e)) => match e.local_name().as_ref() {
                b"c" => {
                    let mut col = current.len();
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"r" {
                            if let Some(idx) = column_index(&attr.value) {
                                col = idx;
                            }
                        }
                    }
                    current.push((col, CellValue::Empty));
                    cell_count += 1;
                }
                b"row" => {
                    rows.push(Vec::new());
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_v => {
                let raw = te.unescape().unwrap_or_default();
                let raw = raw.trim();
                cell_value = Some(interpret_cell(raw, &cell_type, shared));
                in_v = false;
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"c" => {
                    current.push((cell_col, cell_value.take().unwrap_or(CellValue::Empty)));
                    in_inline = false;
                    cell_count += 1;
                }
                b"row" => {
                    rows.push(materialize_row(&current));
                    current.clear();
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Workbook(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

/// Interpret a `<v>` payload according to the cell's declared type.
fn interpret_cell(raw: &str, cell_type: &str, shared: &[String]) -> CellValue {
    match cell_type {
        "s" => raw
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i))
            .map(|s| CellValue::Text(s.clone()))
            .unwrap_or(CellValue::Empty),
        "str" | "b" => CellValue::Text(raw.to_string()),
        _ => match raw.parse::<f64>() {
            Ok(n) => CellValue::Number(n),
            Err(_) => {
                if raw.is_empty() {
                    CellValue::Empty
                } else {
                    CellValue::Text(raw.to_string())
                }
            }
        },
    }
}

/// Zero-based column index from a cell reference like `B3`.
fn column_index(cell_ref: &[u8]) -> Option<usize> {
    let mut idx: usize = 0;
    let mut seen = false;
    for &b in cell_ref {
        if b.is_ascii_uppercase() {
            idx = idx * 26 + (b - b'A') as usize + 1;
            seen = true;
        } else {
            break;
        }
    }
    if seen {
        Some(idx - 1)
    } else {
        None
    }
}

fn materialize_row(cells: &[(usize, CellValue)]) -> Vec<CellValue> {
    let width = cells.iter().map(|(i, _)| i + 1).max().unwrap_or(0);
    let mut row = vec![CellValue::Empty; width];
    for (i, v) in cells {
        row[*i] = v.clone();
    }
    row
}

/// Build a sheet from raw rows; the first row provides column names.
fn sheet_from_rows(name: String, rows: Vec<Vec<CellValue>>) -> Sheet {
    if rows.is_empty() {
        return Sheet::new(name, Vec::new());
    }
    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    let header = &rows[0];
    let columns = (0..width)
        .map(|j| {
            let col_name = match header.get(j) {
                Some(CellValue::Text(s)) if !s.trim().is_empty() => s.trim().to_string(),
                Some(CellValue::Number(n)) => format!("{}", n),
                _ => format!("Column {}", j + 1),
            };
            let cells = rows[1..]
                .iter()
                .map(|r| r.get(j).cloned().unwrap_or(CellValue::Empty))
                .collect();
            Column::new(col_name, cells)
        })
        .collect();
    Sheet::new(name, columns)
}
