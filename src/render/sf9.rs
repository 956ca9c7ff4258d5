use super::{escape_xml, RenderError};
use crate::config::Sf9Config;
use crate::workbook;
use std::path::Path;
use umya_spreadsheet::Spreadsheet;

/// Learner block of the SF9 front page. Absent fields leave the template cell alone.
#[derive(Debug, Clone, Default)]
pub struct Sf9Fields {
    pub name: Option<String>,
    pub age: Option<String>,
    pub sex: Option<String>,
    pub lrn: Option<String>,
    pub grade: Option<String>,
    pub section: Option<String>,
}

pub fn fill_front(
    book: &mut Spreadsheet,
    cfg: &Sf9Config,
    fields: &Sf9Fields,
) -> Result<(), RenderError> {
    let cells = &cfg.cells;
    let pairs = [
        (&cells.name, &fields.name),
        (&cells.age, &fields.age),
        (&cells.sex, &fields.sex),
        (&cells.lrn, &fields.lrn),
        (&cells.grade, &fields.grade),
        (&cells.section, &fields.section),
    ];
    for (address, value) in pairs {
        let Some(v) = value.as_deref().filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        workbook::set_cell_text(book, &cfg.front_sheet, address, v)?;
    }
    Ok(())
}

/// Fills the template and serializes it. Student copies keep only the two
/// report-card sheets.
pub fn generate_workbook(
    template: &Path,
    cfg: &Sf9Config,
    fields: &Sf9Fields,
    student_copy: bool,
) -> Result<Vec<u8>, RenderError> {
    let mut book = workbook::open_file(template)?;
    fill_front(&mut book, cfg, fields)?;
    if student_copy {
        workbook::retain_sheets(&mut book, &[cfg.front_sheet.as_str(), cfg.inside_sheet.as_str()])?;
    }
    Ok(workbook::to_bytes(&book)?)
}

pub fn page_sheet(cfg: &Sf9Config, page: u32) -> Result<&str, RenderError> {
    match page {
        1 => Ok(cfg.front_sheet.as_str()),
        2 => Ok(cfg.inside_sheet.as_str()),
        other => Err(RenderError::UnknownPage(other)),
    }
}

/// HTML fragment for one report-card page after the learner fields are filled in.
pub fn preview_page(
    template: &Path,
    cfg: &Sf9Config,
    fields: &Sf9Fields,
    page: u32,
) -> Result<String, RenderError> {
    let sheet = page_sheet(cfg, page)?;
    let mut book = workbook::open_file(template)?;
    fill_front(&mut book, cfg, fields)?;
    let grid = workbook::sheet_grid(&book, sheet)?;
    Ok(grid_to_html(sheet, &grid))
}

pub fn grid_to_html(title: &str, grid: &[Vec<String>]) -> String {
    let mut html = String::new();
    html.push_str(&format!(
        "<div class=\"sf9-page\" data-sheet=\"{}\">\n<table class=\"sf9-grid\">\n",
        escape_xml(title)
    ));
    for (r, row) in grid.iter().enumerate() {
        html.push_str(&format!("<tr data-row=\"{}\">", r + 1));
        for (c, cell) in row.iter().enumerate() {
            html.push_str(&format!(
                "<td data-cell=\"{}{}\">{}</td>",
                workbook::column_name(c),
                r + 1,
                escape_xml(cell)
            ));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</table>\n</div>");
    html
}

/// Panel shown in place of a page the renderer could not produce.
pub fn placeholder_panel(message: &str) -> String {
    format!(
        "<div style=\"display:flex;justify-content:center;align-items:center;height:100%;color:red;font-weight:bold;\">{}</div>",
        escape_xml(message)
    )
}

pub fn file_name_for(name: Option<&str>) -> String {
    let stem = name
        .map(|n| n.split_whitespace().collect::<Vec<_>>().join("_"))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "Report".to_string());
    format!("SF9_{}.xlsx", stem)
}
