use crate::config;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_str, get_required_str, require_staff, with_session, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::workbook;
use serde_json::json;
use std::path::{Component, Path, PathBuf};
use tracing::info;

const TEMPLATES_DIR: &str = "templates";

/// Workbook named by `name` under `templates/`, or the configured grading workbook.
fn workbook_path(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<PathBuf, HandlerErr> {
    let Some(name) = get_optional_str(params, "name") else {
        return Ok(config::resolve(ctx.workspace, &ctx.config.grading.workbook));
    };
    let mut components = Path::new(&name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return Err(HandlerErr::bad_params("name must be a file name under templates/")),
    }
    Ok(ctx.workspace.join(TEMPLATES_DIR).join(name))
}

/// The sheet a grading workbook opens on: the first "QUARTER 1" sheet, else the first one.
pub fn default_sheet(names: &[String]) -> Option<&String> {
    names
        .iter()
        .find(|n| n.to_ascii_uppercase().contains("QUARTER 1"))
        .or_else(|| names.first())
}

fn workbook_open(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    // Class records hold every learner's scores.
    require_staff(ctx)?;
    let path = workbook_path(ctx, params)?;
    let book = workbook::open_file(&path)?;
    let names = workbook::sheet_names(&book);
    let mut sheets = serde_json::Map::new();
    for name in &names {
        sheets.insert(name.clone(), json!(workbook::sheet_grid(&book, name)?));
    }
    Ok(json!({
        "path": path.to_string_lossy(),
        "sheetNames": names,
        "defaultSheet": default_sheet(&names),
        "sheets": sheets,
    }))
}

fn cell_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_grid(params: &serde_json::Value) -> Result<Vec<Vec<String>>, HandlerErr> {
    let Some(rows) = params.get("data").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing data"));
    };
    rows.iter()
        .map(|row| {
            row.as_array()
                .map(|cells| cells.iter().map(cell_text).collect())
                .ok_or_else(|| HandlerErr::bad_params("data must be an array of rows"))
        })
        .collect()
}

fn workbook_save_sheet(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_staff(ctx)?;
    let sheet_name = get_required_str(params, "sheetName")?;
    let data = parse_grid(params)?;
    let path = workbook_path(ctx, params)?;
    let mut book = workbook::open_file(&path)?;
    let written = workbook::write_grid(&mut book, &sheet_name, &data)?;
    workbook::save_file(&book, &path)?;
    info!(sheet = %sheet_name, cells = written, path = %path.display(), "workbook sheet saved");
    Ok(json!({ "ok": true, "sheetName": sheet_name, "cellsWritten": written }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "workbook.open" => Some(with_session(state, req, workbook_open)),
        "workbook.saveSheet" => Some(with_session(state, req, workbook_save_sheet)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sheet_prefers_first_quarter() {
        let names = vec!["Summary".to_string(), "Quarter 1 - Math".to_string()];
        assert_eq!(default_sheet(&names).map(String::as_str), Some("Quarter 1 - Math"));
        let names = vec!["Summary".to_string()];
        assert_eq!(default_sheet(&names).map(String::as_str), Some("Summary"));
        assert!(default_sheet(&[]).is_none());
    }

    #[test]
    fn grid_cells_accept_numbers_and_nulls() {
        let grid = parse_grid(&json!({ "data": [["a", 1, null], []] })).expect("grid");
        assert_eq!(grid, vec![vec!["a".to_string(), "1".to_string(), String::new()], vec![]]);
        assert_eq!(parse_grid(&json!({ "data": ["x"] })).expect_err("flat").code, "bad_params");
    }
}
