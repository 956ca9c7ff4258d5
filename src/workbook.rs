//! Thin layer over `umya_spreadsheet` for the three ways workbooks are used:
//! filling a fixed-coordinate template, reading/writing a whole sheet as a text
//! grid, and round-tripping header-keyed tables for import/export.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use umya_spreadsheet::Spreadsheet;

#[derive(Debug, thiserror::Error)]
pub enum WorkbookError {
    #[error("workbook not found: {0}")]
    Missing(PathBuf),
    #[error("failed to read workbook: {0}")]
    Read(String),
    #[error("failed to write workbook: {0}")]
    Write(String),
    #[error("sheet not found: {0}")]
    SheetMissing(String),
    #[error("workbook has no sheets")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableCell {
    Text(String),
    Number(f64),
}

impl From<&str> for TableCell {
    fn from(s: &str) -> Self {
        TableCell::Text(s.to_string())
    }
}

impl From<String> for TableCell {
    fn from(s: String) -> Self {
        TableCell::Text(s)
    }
}

impl From<f64> for TableCell {
    fn from(v: f64) -> Self {
        TableCell::Number(v)
    }
}

/// One data row of a header-keyed table. `row` is the 1-based sheet row.
#[derive(Debug, Clone)]
pub struct TableRow {
    pub row: u32,
    pub values: HashMap<String, String>,
}

impl TableRow {
    /// Trimmed, non-empty value for a header.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.values
            .get(header)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

pub fn open_file(path: &Path) -> Result<Spreadsheet, WorkbookError> {
    if !path.is_file() {
        return Err(WorkbookError::Missing(path.to_path_buf()));
    }
    umya_spreadsheet::reader::xlsx::read(path).map_err(|e| WorkbookError::Read(e.to_string()))
}

pub fn open_bytes(bytes: &[u8]) -> Result<Spreadsheet, WorkbookError> {
    umya_spreadsheet::reader::xlsx::read_reader(Cursor::new(bytes.to_vec()), true)
        .map_err(|e| WorkbookError::Read(e.to_string()))
}

pub fn save_file(book: &Spreadsheet, path: &Path) -> Result<(), WorkbookError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WorkbookError::Write(e.to_string()))?;
    }
    umya_spreadsheet::writer::xlsx::write(book, path)
        .map_err(|e| WorkbookError::Write(e.to_string()))
}

pub fn to_bytes(book: &Spreadsheet) -> Result<Vec<u8>, WorkbookError> {
    let mut buf = Cursor::new(Vec::new());
    umya_spreadsheet::writer::xlsx::write_writer(book, &mut buf)
        .map_err(|e| WorkbookError::Write(e.to_string()))?;
    Ok(buf.into_inner())
}

pub fn sheet_names(book: &Spreadsheet) -> Vec<String> {
    book.get_sheet_collection()
        .iter()
        .map(|ws| ws.get_name().to_string())
        .collect()
}

/// Cell texts of a sheet, row-major, padded to a rectangle.
pub fn sheet_grid(book: &Spreadsheet, sheet: &str) -> Result<Vec<Vec<String>>, WorkbookError> {
    let ws = book
        .get_sheet_by_name(sheet)
        .ok_or_else(|| WorkbookError::SheetMissing(sheet.to_string()))?;
    let (max_col, max_row) = ws.get_highest_column_and_row();
    let mut grid = Vec::with_capacity(max_row as usize);
    for row in 1..=max_row {
        let mut cells = Vec::with_capacity(max_col as usize);
        for col in 1..=max_col {
            cells.push(ws.get_value((col, row)));
        }
        grid.push(cells);
    }
    Ok(grid)
}

/// Writes a text grid back over a sheet. Only cells whose text changed are
/// touched, so untouched formula cells keep their formulas. Returns the number
/// of cells written.
pub fn write_grid(
    book: &mut Spreadsheet,
    sheet: &str,
    data: &[Vec<String>],
) -> Result<usize, WorkbookError> {
    let ws = book
        .get_sheet_by_name_mut(sheet)
        .ok_or_else(|| WorkbookError::SheetMissing(sheet.to_string()))?;
    let mut written = 0;
    for (r, row) in data.iter().enumerate() {
        for (c, text) in row.iter().enumerate() {
            let coord = (c as u32 + 1, r as u32 + 1);
            if ws.get_value(coord) == *text {
                continue;
            }
            let cell = ws.get_cell_mut(coord);
            match text.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => {
                    cell.set_value_number(v);
                }
                _ => {
                    cell.set_value(text.clone());
                }
            }
            written += 1;
        }
    }
    Ok(written)
}

pub fn set_cell_text(
    book: &mut Spreadsheet,
    sheet: &str,
    address: &str,
    text: &str,
) -> Result<(), WorkbookError> {
    let ws = book
        .get_sheet_by_name_mut(sheet)
        .ok_or_else(|| WorkbookError::SheetMissing(sheet.to_string()))?;
    ws.get_cell_mut(address).set_value(text.to_string());
    Ok(())
}

/// Drops every sheet not named in `keep`.
pub fn retain_sheets(book: &mut Spreadsheet, keep: &[&str]) -> Result<(), WorkbookError> {
    let doomed: Vec<String> = sheet_names(book)
        .into_iter()
        .filter(|name| !keep.iter().any(|k| k == name))
        .collect();
    for name in doomed {
        book.remove_sheet_by_name(&name)
            .map_err(|e| WorkbookError::Write(e.to_string()))?;
    }
    Ok(())
}

/// Builds a single-sheet workbook with a header row followed by `rows`.
pub fn table_workbook(
    sheet: &str,
    headers: &[&str],
    rows: &[Vec<TableCell>],
) -> Result<Spreadsheet, WorkbookError> {
    let mut book = umya_spreadsheet::new_file_empty_worksheet();
    let ws = book
        .new_sheet(sheet)
        .map_err(|e| WorkbookError::Write(e.to_string()))?;
    for (c, h) in headers.iter().enumerate() {
        ws.get_cell_mut((c as u32 + 1, 1)).set_value(h.to_string());
    }
    for (r, row) in rows.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            let target = ws.get_cell_mut((c as u32 + 1, r as u32 + 2));
            match cell {
                TableCell::Text(s) => {
                    target.set_value(s.clone());
                }
                TableCell::Number(v) => {
                    target.set_value_number(*v);
                }
            }
        }
    }
    Ok(book)
}

/// Reads the first sheet as a header-keyed table. Blank rows are skipped.
pub fn read_table(book: &Spreadsheet) -> Result<Vec<TableRow>, WorkbookError> {
    let ws = book.get_sheet_collection().first().ok_or(WorkbookError::Empty)?;
    let (max_col, max_row) = ws.get_highest_column_and_row();
    let headers: Vec<String> = (1..=max_col)
        .map(|col| ws.get_value((col, 1)).trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for row in 2..=max_row {
        let mut values = HashMap::new();
        let mut any = false;
        for (i, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let v = ws.get_value((i as u32 + 1, row));
            if !v.trim().is_empty() {
                any = true;
            }
            values.insert(header.clone(), v);
        }
        if any {
            rows.push(TableRow { row, values });
        }
    }
    Ok(rows)
}

/// Spreadsheet column letters for a 0-based column index (0 => "A", 26 => "AA").
pub fn column_name(index: usize) -> String {
    let mut name = Vec::new();
    let mut i = index as i64;
    while i >= 0 {
        name.push((b'A' + (i % 26) as u8) as char);
        i = i / 26 - 1;
    }
    name.iter().rev().collect()
}
