//! Plain-text extraction for the file formats the scanner accepts.
//!
//! Dispatch is by extension (see [`DocumentKind::from_path`]). PDF goes
//! through `pdf-extract`; Word and Excel files are read as OOXML packages
//! with `zip` + `quick-xml`. Legacy binary `.doc`/`.xls` files are not ZIP
//! packages, so they fail here and the caller falls back to filename-only
//! scoring.
//!
//! Failures never propagate past [`extract_file`]: they come back as
//! [`Extraction::Failed`] so the scanner can log them and move on.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::ExtractError;
use crate::models::DocumentKind;

/// Maximum sheets to process in a workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

/// Outcome of extracting one file.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Text(String),
    Failed { reason: String },
}

impl Extraction {
    /// Extracted text, or the empty string for a failed extraction.
    pub fn text(&self) -> &str {
        match self {
            Extraction::Text(t) => t,
            Extraction::Failed { .. } => "",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Extraction::Failed { .. })
    }
}

impl From<Result<String, ExtractError>> for Extraction {
    fn from(result: Result<String, ExtractError>) -> Self {
        match result {
            Ok(text) => Extraction::Text(text),
            Err(e) => Extraction::Failed {
                reason: e.to_string(),
            },
        }
    }
}

/// Extracts text from already-read file bytes.
///
/// `bytes` larger than `max_bytes` are refused without parsing.
pub fn extract_file(path: &Path, bytes: &[u8], max_bytes: u64) -> Extraction {
    let result = match DocumentKind::from_path(path) {
        None => Err(ExtractError::Unsupported(path.display().to_string())),
        Some(_) if bytes.len() as u64 > max_bytes => Err(ExtractError::TooLarge {
            size: bytes.len() as u64,
            limit: max_bytes,
        }),
        Some(kind) => extract_text(bytes, kind),
    };
    Extraction::from(result)
}

/// Extracts plain text from file content of a known kind.
pub fn extract_text(bytes: &[u8], kind: DocumentKind) -> Result<String, ExtractError> {
    match kind {
        DocumentKind::Pdf => extract_pdf(bytes),
        DocumentKind::Word => extract_docx(bytes),
        DocumentKind::Excel => extract_xlsx(bytes),
        DocumentKind::Text => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(result) => result.map_err(|e| ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked".to_string())),
    }
}

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry.take(max_bytes).read_to_end(&mut out)?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn has_entry(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

fn xml_err(e: quick_xml::Error) -> ExtractError {
    ExtractError::Ooxml(e.to_string())
}

fn push_separated(out: &mut String, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push(' ');
    }
    out.push_str(text);
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_paragraphs(&xml)
}

/// Walks `word/document.xml` in document order. Runs inside one paragraph
/// are concatenated; paragraphs (including those in table cells) are
/// separated by a space.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" | b"br" | b"cr" => paragraph.push(' '),
                _ => {}
            },
            Event::Text(te) if in_text => {
                paragraph.push_str(&te.unescape().unwrap_or_default());
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    push_separated(&mut out, &paragraph);
                    paragraph.clear();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    push_separated(&mut out, &paragraph);
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if has_entry(&archive, "xl/sharedStrings.xml") {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };
    let sheets = if has_entry(&archive, "xl/workbook.xml") {
        let xml = read_zip_entry_bounded(&mut archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
        read_workbook_sheets(&xml)?
    } else {
        Vec::new()
    };
    let targets = if has_entry(&archive, WORKBOOK_RELS) {
        let xml = read_zip_entry_bounded(&mut archive, WORKBOOK_RELS, MAX_XML_ENTRY_BYTES)?;
        read_relationship_targets(&xml)?
    } else {
        HashMap::new()
    };

    let mut out = String::new();
    for (title, name) in plan_worksheets(&archive, &sheets, &targets)
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        if let Some(title) = title {
            push_separated(&mut out, &title);
        }
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        push_separated(&mut out, &extract_sheet_cells(&sheet_xml, &shared_strings)?);
    }
    Ok(out)
}

/// Pairs sheet names with worksheet parts in workbook order.
///
/// Sheets are resolved through their `r:id` relationship. Without a rels
/// part the names pair with `sheetN.xml` by position. Worksheet parts no
/// sheet refers to are read last, untitled.
fn plan_worksheets(
    archive: &Archive<'_>,
    sheets: &[WorkbookSheet],
    targets: &HashMap<String, String>,
) -> Vec<(Option<String>, String)> {
    let entries = list_worksheet_entries(archive);
    if targets.is_empty() {
        return entries
            .into_iter()
            .enumerate()
            .map(|(idx, name)| (sheets.get(idx).map(|s| s.name.clone()), name))
            .collect();
    }

    let mut plan: Vec<(Option<String>, String)> = Vec::new();
    for sheet in sheets {
        let Some(part) = sheet
            .rel_id
            .as_ref()
            .and_then(|id| targets.get(id))
            .map(|target| resolve_part(target.as_str()))
        else {
            continue;
        };
        if entries.contains(&part) && !plan.iter().any(|(_, name)| *name == part) {
            plan.push((Some(sheet.name.clone()), part));
        }
    }
    for name in entries {
        if !plan.iter().any(|(_, planned)| *planned == name) {
            plan.push((None, name));
        }
    }
    plan
}

/// Relationship targets are relative to `xl/` unless rooted.
fn resolve_part(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(rooted) => rooted.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

/// One string per `<si>`, concatenating rich-text runs.
fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_text = false;
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_text = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(te) if in_text => current.push_str(&te.unescape().unwrap_or_default()),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

struct WorkbookSheet {
    name: String,
    rel_id: Option<String>,
}

/// `<sheets><sheet name=".." r:id=".."/>` in workbook order.
fn read_workbook_sheets(xml: &[u8]) -> Result<Vec<WorkbookSheet>, ExtractError> {
    let mut sheets = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let mut name = None;
                let mut rel_id = None;
                for attr in e.attributes().flatten() {
                    match attr.key.local_name().as_ref() {
                        b"name" => name = Some(attr.unescape_value().map_err(xml_err)?.into_owned()),
                        b"id" => rel_id = Some(attr.unescape_value().map_err(xml_err)?.into_owned()),
                        _ => {}
                    }
                }
                if let Some(name) = name {
                    sheets.push(WorkbookSheet { name, rel_id });
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// `Id` to `Target` for every `<Relationship>` in a rels part.
fn read_relationship_targets(xml: &[u8]) -> Result<HashMap<String, String>, ExtractError> {
    let mut targets = HashMap::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    match attr.key.local_name().as_ref() {
                        b"Id" => id = Some(attr.unescape_value().map_err(xml_err)?.into_owned()),
                        b"Target" => {
                            target = Some(attr.unescape_value().map_err(xml_err)?.into_owned())
                        }
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    targets.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

fn list_worksheet_entries(archive: &Archive<'_>) -> Vec<String> {
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

#[derive(Clone, Copy, PartialEq)]
enum CellType {
    Shared,
    Inline,
    Value,
}

/// Cell texts of one sheet in row order. Shared-string cells are resolved,
/// inline strings read from `<is>`, and every other value kept verbatim.
fn extract_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    let mut cells: Vec<String> = Vec::new();
    let mut cell_type = CellType::Value;
    let mut in_value = false;
    let mut in_inline_text = false;
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        if cells.len() >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"c" => {
                    cell_type = CellType::Value;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            cell_type = match attr.value.as_ref() {
                                b"s" => CellType::Shared,
                                b"inlineStr" => CellType::Inline,
                                _ => CellType::Value,
                            };
                        }
                    }
                }
                b"v" => in_value = true,
                b"t" if cell_type == CellType::Inline => in_inline_text = true,
                _ => {}
            },
            Event::Text(te) if in_value || in_inline_text => {
                let raw = te.unescape().unwrap_or_default();
                let value = raw.trim();
                if value.is_empty() {
                    // nothing to record
                } else if in_value && cell_type == CellType::Shared {
                    if let Some(s) = value
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared_strings.get(i))
                    {
                        cells.push(s.clone());
                    }
                } else {
                    cells.push(value.to_string());
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"t" => in_inline_text = false,
                b"c" => cell_type = CellType::Value,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(cells
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(" "))
}
