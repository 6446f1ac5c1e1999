//! OOXML spreadsheet reading.
//!
//! The catalog files are `.xlsx` workbooks (usually zipped again for
//! distribution). This module reads them directly as ZIP + XML: sheet
//! names from `xl/workbook.xml`, shared strings from
//! `xl/sharedStrings.xml`, and per-sheet cell grids that keep both the
//! cached value and the formula text, because the publishers wrap item
//! codes in HYPERLINK formulas.

use std::collections::HashMap;
use std::io::Read;

use quick_xml::events::Event;
use thiserror::Error;

/// Maximum sheets to process in a workbook.
const MAX_SHEETS: usize = 100;
/// Maximum cells to read per sheet (catalog sheets stay far below this).
const MAX_CELLS_PER_SHEET: usize = 400_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("not an OOXML spreadsheet: {0}")]
    Archive(String),
    #[error("workbook XML is malformed: {0}")]
    Xml(String),
    #[error("ZIP entry {0} exceeds size limit")]
    EntryTooLarge(String),
}

/// One cell: the cached display value and, when present, the formula text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cell {
    pub value: Option<String>,
    pub formula: Option<String>,
}

impl Cell {
    pub fn text(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.value.as_deref().map_or(true, |v| v.trim().is_empty()) && self.formula.is_none()
    }
}

/// A worksheet as a dense row grid. Row and column indices match the
/// sheet's own coordinates (empty leading rows are preserved), which is
/// what the header locator counts against.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    /// Cell text at (row, col), empty string when out of bounds.
    pub fn text_at(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|c| c.text())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WorkbookError> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| WorkbookError::Archive(e.to_string()))?;

        let shared_strings = match read_entry(&mut archive, "xl/sharedStrings.xml") {
            Ok(xml) => parse_shared_strings(&xml)?,
            Err(WorkbookError::Archive(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        let entries = sheet_entries(&mut archive)?;
        let mut sheets = Vec::new();
        for (name, entry) in entries.into_iter().take(MAX_SHEETS) {
            let xml = read_entry(&mut archive, &entry)?;
            let rows = parse_sheet(&xml, &shared_strings)?;
            sheets.push(Sheet { name, rows });
        }

        Ok(Workbook { sheets })
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

fn read_entry(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, WorkbookError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| WorkbookError::Archive(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| WorkbookError::Archive(format!("{}: {}", name, e)))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(WorkbookError::EntryTooLarge(name.to_string()));
    }
    Ok(out)
}

/// Resolves the ordered (sheet name, archive entry) pairs from
/// `xl/workbook.xml` and its relationships part. Workbooks without a
/// relationships part fall back to positional `sheetN.xml` matching.
fn sheet_entries(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<(String, String)>, WorkbookError> {
    let workbook_xml = read_entry(archive, "xl/workbook.xml")?;
    let declared = parse_workbook_sheets(&workbook_xml)?;

    let rels = match read_entry(archive, "xl/_rels/workbook.xml.rels") {
        Ok(xml) => parse_relationships(&xml)?,
        Err(WorkbookError::Archive(_)) => HashMap::new(),
        Err(e) => return Err(e),
    };

    // Positional fallback: sheet files sorted by their numeric suffix.
    let mut by_position: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    by_position.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut entries = Vec::new();
    for (idx, (name, rel_id)) in declared.into_iter().enumerate() {
        let entry = rel_id
            .and_then(|id| rels.get(&id).cloned())
            .map(|target| {
                if let Some(stripped) = target.strip_prefix('/') {
                    stripped.to_string()
                } else {
                    format!("xl/{}", target)
                }
            })
            .or_else(|| by_position.get(idx).cloned());
        if let Some(entry) = entry {
            entries.push((name, entry));
        }
    }
    if entries.is_empty() {
        return Err(WorkbookError::Xml("workbook declares no sheets".to_string()));
    }
    Ok(entries)
}

/// `<sheet name="..." r:id="rId1"/>` entries in document order.
fn parse_workbook_sheets(xml: &[u8]) -> Result<Vec<(String, Option<String>)>, WorkbookError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    let mut name = None;
                    let mut rel_id = None;
                    for attr in e.attributes().flatten() {
                        let key = attr.key.as_ref();
                        if key == b"name" {
                            name = Some(String::from_utf8_lossy(&attr.value).into_owned());
                        } else if key == b"r:id" || attr.key.local_name().as_ref() == b"id" {
                            rel_id = Some(String::from_utf8_lossy(&attr.value).into_owned());
                        }
                    }
                    if let Some(name) = name {
                        sheets.push((name, rel_id));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// Relationship Id → Target map from `xl/_rels/workbook.xml.rels`.
fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>, WorkbookError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut rels = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Relationship" {
                    let mut id = None;
                    let mut target = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"Id" => id = Some(String::from_utf8_lossy(&attr.value).into_owned()),
                            b"Target" => {
                                target = Some(String::from_utf8_lossy(&attr.value).into_owned())
                            }
                            _ => {}
                        }
                    }
                    if let (Some(id), Some(target)) = (id, target) {
                        rels.insert(id, target);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

/// Shared string table: one concatenated string per `<si>` (rich-text
/// runs collapse into their plain text).
fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, WorkbookError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_t => {
                current.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CellType {
    Shared,
    InlineStr,
    Other,
}

/// Parses one worksheet into a dense grid. Cells land at the column
/// their `r` reference names; rows land at their 1-based `r` index so
/// leading blank rows keep their place.
fn parse_sheet(xml: &[u8], shared_strings: &[String]) -> Result<Vec<Vec<Cell>>, WorkbookError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut rows: Vec<Vec<Cell>> = Vec::new();
    let mut current_row: Vec<Cell> = Vec::new();
    let mut in_row = false;

    let mut cell_type = CellType::Other;
    let mut cell_col: Option<usize> = None;
    let mut pending_value: Option<String> = None;
    let mut pending_formula: Option<String> = None;
    let mut in_v = false;
    let mut in_f = false;
    let mut in_inline_t = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                match e.local_name().as_ref() {
                    b"row" => {
                        if in_row {
                            rows.push(std::mem::take(&mut current_row));
                        }
                        let row_num = attr_value(&e, b"r")
                            .and_then(|v| v.parse::<usize>().ok())
                            .unwrap_or(rows.len() + 1);
                        while rows.len() + 1 < row_num {
                            rows.push(Vec::new());
                        }
                        current_row.clear();
                        in_row = true;
                    }
                    b"c" => {
                        cell_col = attr_value(&e, b"r").and_then(|r| column_index(&r));
                        cell_type = match attr_value(&e, b"t").as_deref() {
                            Some("s") => CellType::Shared,
                            Some("inlineStr") => CellType::InlineStr,
                            _ => CellType::Other,
                        };
                        pending_value = None;
                        pending_formula = None;
                    }
                    b"v" => in_v = true,
                    b"f" => in_f = true,
                    b"t" if cell_type == CellType::InlineStr => in_inline_t = true,
                    _ => {}
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default().into_owned();
                if in_v {
                    pending_value = Some(match pending_value.take() {
                        Some(mut v) => {
                            v.push_str(&text);
                            v
                        }
                        None => text,
                    });
                } else if in_f {
                    pending_formula = Some(match pending_formula.take() {
                        Some(mut f) => {
                            f.push_str(&text);
                            f
                        }
                        None => text,
                    });
                } else if in_inline_t {
                    pending_value = Some(text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"f" => in_f = false,
                b"t" => in_inline_t = false,
                b"c" => {
                    let value = match cell_type {
                        CellType::Shared => pending_value
                            .take()
                            .and_then(|v| v.trim().parse::<usize>().ok())
                            .and_then(|i| shared_strings.get(i).cloned()),
                        _ => pending_value.take(),
                    };
                    let cell = Cell {
                        value,
                        formula: pending_formula.take(),
                    };
                    if !cell.is_empty() {
                        let col = cell_col.take().unwrap_or(current_row.len());
                        place_cell(&mut current_row, col, cell);
                        cell_count += 1;
                    } else {
                        cell_col = None;
                    }
                }
                b"row" => {
                    rows.push(std::mem::take(&mut current_row));
                    in_row = false;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if in_row {
        rows.push(current_row);
    }
    Ok(rows)
}

fn place_cell(row: &mut Vec<Cell>, col: usize, cell: Cell) {
    while row.len() < col {
        row.push(Cell::default());
    }
    if row.len() == col {
        row.push(cell);
    } else {
        row[col] = cell;
    }
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// "B7" → 1, "AA3" → 26.
fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: String = cell_ref.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    if letters.is_empty() {
        return None;
    }
    let mut col = 0usize;
    for c in letters.chars() {
        col = col * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(col - 1)
}
