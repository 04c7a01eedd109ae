//! Minimal OOXML (.xlsx) reader and writer.
//!
//! An .xlsx file is a ZIP container: `xl/workbook.xml` lists sheets,
//! `xl/_rels/workbook.xml.rels` maps sheet relationship ids to worksheet
//! parts, `xl/sharedStrings.xml` interns repeated text, and each worksheet
//! part carries `<row>`/`<c>` cell markup. This module reads exactly that
//! subset and writes workbooks using inline strings so no shared-string
//! table is needed on output.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Read, Seek, Write};
use std::path::Path;
use thiserror::Error;

/// OLE compound-file signature: legacy .xls and encrypted OOXML wrappers.
pub const OLE_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// ZIP local-file header signature.
pub const ZIP_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

#[derive(Debug, Error)]
pub enum OoxmlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Workbook part missing: {0}")]
    MissingPart(String),

    #[error("Sheet not found: {0}")]
    SheetNotFound(String),
}

pub type OoxmlResult<T> = std::result::Result<T, OoxmlError>;

/// One cell value as stored in the sheet XML.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
}

/// A sheet entry from the workbook part.
#[derive(Debug, Clone)]
pub struct SheetMeta {
    pub name: String,
    pub index: usize,
    part_path: String,
}

/// An opened workbook.
pub struct XlsxWorkbook<R: Read + Seek> {
    archive: zip::ZipArchive<R>,
    sheets: Vec<SheetMeta>,
    shared_strings: Vec<String>,
}

impl XlsxWorkbook<std::fs::File> {
    pub fn open(path: &Path) -> OoxmlResult<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }
}

impl<R: Read + Seek> XlsxWorkbook<R> {
    pub fn from_reader(reader: R) -> OoxmlResult<Self> {
        let mut archive = zip::ZipArchive::new(reader)?;
        let workbook_xml = read_part(&mut archive, "xl/workbook.xml")?;
        let rels_xml = read_part(&mut archive, "xl/_rels/workbook.xml.rels")?;
        let rels = parse_rels(&rels_xml)?;
        let sheets = parse_workbook_sheets(&workbook_xml, &rels)?;
        let shared_strings = match read_part_optional(&mut archive, "xl/sharedStrings.xml")? {
            Some(xml) => parse_shared_strings(&xml)?,
            None => Vec::new(),
        };
        Ok(Self {
            archive,
            sheets,
            shared_strings,
        })
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn sheets(&self) -> &[SheetMeta] {
        &self.sheets
    }

    /// Read one sheet's cell grid. Rows are dense up to the widest row seen;
    /// gaps are `CellValue::Empty`.
    pub fn read_sheet(&mut self, name: &str) -> OoxmlResult<Vec<Vec<CellValue>>> {
        let part = self
            .sheets
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.part_path.clone())
            .ok_or_else(|| OoxmlError::SheetNotFound(name.to_string()))?;
        let xml = read_part(&mut self.archive, &part)?;
        parse_sheet(&xml, &self.shared_strings)
    }

    pub fn read_sheet_at(&mut self, index: usize) -> OoxmlResult<Vec<Vec<CellValue>>> {
        let name = self
            .sheets
            .get(index)
            .map(|s| s.name.clone())
            .ok_or_else(|| OoxmlError::SheetNotFound(format!("#{}", index)))?;
        self.read_sheet(&name)
    }
}

fn read_part<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> OoxmlResult<String> {
    read_part_optional(archive, name)?.ok_or_else(|| OoxmlError::MissingPart(name.to_string()))
}

fn read_part_optional<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> OoxmlResult<Option<String>> {
    match archive.by_name(name) {
        Ok(mut part) => {
            let mut content = String::new();
            part.read_to_string(&mut content)?;
            Ok(Some(content))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == key {
            Some(String::from_utf8_lossy(&a.value).into_owned())
        } else {
            None
        }
    })
}

/// Parse workbook relationships: Id -> worksheet part path.
fn parse_rels(xml: &str) -> OoxmlResult<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    let mut rels = HashMap::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Relationship" => {
                let id = attr_value(&e, b"Id");
                let target = attr_value(&e, b"Target");
                if let (Some(id), Some(target)) = (id, target) {
                    let path = if let Some(stripped) = target.strip_prefix('/') {
                        stripped.to_string()
                    } else {
                        format!("xl/{}", target)
                    };
                    rels.insert(id, path);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rels)
}

/// Parse the sheet list from workbook.xml, resolving each sheet's part path
/// through the relationship map.
fn parse_workbook_sheets(
    xml: &str,
    rels: &HashMap<String, String>,
) -> OoxmlResult<Vec<SheetMeta>> {
    let mut reader = Reader::from_str(xml);
    let mut sheets = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"sheet" => {
                let name = attr_value(&e, b"name").unwrap_or_default();
                let rel_id = attr_value(&e, b"r:id").or_else(|| attr_value(&e, b"id"));
                let part_path = rel_id
                    .and_then(|id| rels.get(&id).cloned())
                    .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", sheets.len() + 1));
                sheets.push(SheetMeta {
                    index: sheets.len(),
                    name,
                    part_path,
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheets)
}

/// Parse sharedStrings.xml: one interned string per `<si>`, concatenating
/// nested `<t>` runs.
fn parse_shared_strings(xml: &str) -> OoxmlResult<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Event::End(e) => match e.name().as_ref() {
                b"si" => {
                    if let Some(s) = current.take() {
                        strings.push(s);
                    }
                }
                b"t" => in_text = false,
                _ => {}
            },
            Event::Text(t) => {
                if in_text {
                    if let Some(s) = current.as_mut() {
                        s.push_str(&t.unescape()?);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

/// Column index (0-based) from a cell reference like "BC12".
fn column_index(cell_ref: &str) -> usize {
    let mut idx = 0usize;
    for c in cell_ref.chars() {
        if c.is_ascii_alphabetic() {
            idx = idx * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
        } else {
            break;
        }
    }
    idx.saturating_sub(1)
}

fn parse_sheet(xml: &str, shared: &[String]) -> OoxmlResult<Vec<Vec<CellValue>>> {
    let mut reader = Reader::from_str(xml);
    let mut rows: Vec<Vec<CellValue>> = Vec::new();
    let mut row: Vec<CellValue> = Vec::new();
    let mut in_row = false;

    let mut cell_col = 0usize;
    let mut cell_type = String::new();
    let mut cell_text: Option<String> = None;
    let mut capture_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"row" => {
                in_row = true;
                row = Vec::new();
            }
            Event::Start(e) if e.name().as_ref() == b"c" => {
                cell_col = attr_value(&e, b"r")
                    .map(|r| column_index(&r))
                    .unwrap_or(row.len());
                cell_type = attr_value(&e, b"t").unwrap_or_default();
                cell_text = None;
            }
            Event::Empty(e) if e.name().as_ref() == b"c" => {
                // Self-closing cell carries no value.
                let col = attr_value(&e, b"r")
                    .map(|r| column_index(&r))
                    .unwrap_or(row.len());
                place_cell(&mut row, col, CellValue::Empty);
            }
            Event::Start(e) if matches!(e.name().as_ref(), b"v" | b"t") => {
                capture_text = true;
            }
            Event::Text(t) => {
                if capture_text {
                    let text = t.unescape()?.into_owned();
                    cell_text = Some(match cell_text.take() {
                        Some(mut existing) => {
                            existing.push_str(&text);
                            existing
                        }
                        None => text,
                    });
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"v" | b"t" => capture_text = false,
                b"c" => {
                    let value = decode_cell(&cell_type, cell_text.take(), shared);
                    place_cell(&mut row, cell_col, value);
                }
                b"row" => {
                    if in_row {
                        rows.push(std::mem::take(&mut row));
                        in_row = false;
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    // Dense grid: pad every row to the widest row.
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    for row in &mut rows {
        row.resize(width, CellValue::Empty);
    }
    Ok(rows)
}

fn place_cell(row: &mut Vec<CellValue>, col: usize, value: CellValue) {
    if row.len() <= col {
        row.resize(col + 1, CellValue::Empty);
    }
    row[col] = value;
}

fn decode_cell(cell_type: &str, text: Option<String>, shared: &[String]) -> CellValue {
    let Some(text) = text else {
        return CellValue::Empty;
    };
    match cell_type {
        "s" => text
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned())
            .map(CellValue::Text)
            .unwrap_or(CellValue::Empty),
        "b" => CellValue::Bool(text.trim() == "1"),
        "str" | "inlineStr" => CellValue::Text(text),
        _ => text
            .trim()
            .parse::<f64>()
            .map(CellValue::Number)
            .unwrap_or(CellValue::Text(text)),
    }
}

// ============================================================================
// Writer
// ============================================================================

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn column_ref(mut col: usize) -> String {
    let mut name = String::new();
    col += 1;
    while col > 0 {
        let rem = (col - 1) % 26;
        name.insert(0, (b'A' + rem as u8) as char);
        col = (col - 1) / 26;
    }
    name
}

/// Write a single-sheet workbook using inline strings.
pub fn write_xlsx<W: Write + Seek>(
    writer: W,
    sheet_name: &str,
    rows: &[Vec<CellValue>],
) -> OoxmlResult<()> {
    let mut zip = zip::ZipWriter::new(writer);
    let options = zip::write::SimpleFileOptions::default();

    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(
        br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
</Types>"#,
    )?;

    zip.start_file("_rels/.rels", options)?;
    zip.write_all(
        br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#,
    )?;

    zip.start_file("xl/workbook.xml", options)?;
    let workbook = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets>
</workbook>"#,
        xml_escape(sheet_name)
    );
    zip.write_all(workbook.as_bytes())?;

    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    zip.write_all(
        br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
</Relationships>"#,
    )?;

    zip.start_file("xl/worksheets/sheet1.xml", options)?;
    let mut sheet = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (r, row) in rows.iter().enumerate() {
        sheet.push_str(&format!("<row r=\"{}\">", r + 1));
        for (c, cell) in row.iter().enumerate() {
            let cell_ref = format!("{}{}", column_ref(c), r + 1);
            match cell {
                CellValue::Empty => {}
                CellValue::Number(v) => {
                    sheet.push_str(&format!("<c r=\"{}\"><v>{}</v></c>", cell_ref, v));
                }
                CellValue::Bool(b) => {
                    sheet.push_str(&format!(
                        "<c r=\"{}\" t=\"b\"><v>{}</v></c>",
                        cell_ref,
                        if *b { 1 } else { 0 }
                    ));
                }
                CellValue::Text(s) => {
                    sheet.push_str(&format!(
                        "<c r=\"{}\" t=\"inlineStr\"><is><t>{}</t></is></c>",
                        cell_ref,
                        xml_escape(s)
                    ));
                }
            }
        }
        sheet.push_str("</row>");
    }
    sheet.push_str("</sheetData></worksheet>");
    zip.write_all(sheet.as_bytes())?;

    zip.finish()?;
    Ok(())
}
