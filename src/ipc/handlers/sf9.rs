use crate::auth::Role;
use crate::config;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::users::{document_user, UserRecord};
use crate::ipc::helpers::{deliver_file, get_optional_str, with_session, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::render::sf9::{self, Sf9Fields};
use crate::render::RenderError;
use crate::workbook::WorkbookError;
use serde_json::json;
use tracing::warn;

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

fn sf9_fields(user: &UserRecord) -> Sf9Fields {
    Sf9Fields {
        name: Some(user.name.clone()).filter(|n| !n.is_empty()),
        age: user.age.map(|a| a.to_string()),
        sex: user.sex.clone(),
        lrn: user.lrn.clone(),
        grade: user.grade_level.clone(),
        section: user.section.clone(),
    }
}

fn subject(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<UserRecord, HandlerErr> {
    document_user(ctx, params, "studentId", "userData")
}

fn sf9_generate_excel(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = subject(ctx, params)?;
    let student_copy = ctx.actor.role == Role::Student
        || get_optional_str(params, "role")
            .and_then(|r| Role::parse(&r))
            .map(|r| r == Role::Student)
            .unwrap_or(false);
    let cfg = &ctx.config.sf9;
    let template = config::resolve(ctx.workspace, &cfg.template);
    let bytes = sf9::generate_workbook(&template, cfg, &sf9_fields(&user), student_copy)?;
    let file_name = sf9::file_name_for(Some(user.name.as_str()));
    let mut out = deliver_file(ctx.workspace, params, &bytes, &file_name, XLSX_CONTENT_TYPE)?;
    out["studentCopy"] = json!(student_copy);
    Ok(out)
}

fn page_param(params: &serde_json::Value) -> Result<u32, HandlerErr> {
    let page = match params.get("page") {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    page.and_then(|p| u32::try_from(p).ok())
        .ok_or_else(|| HandlerErr::bad_params("missing/invalid page"))
}

fn sf9_preview_page(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let page = page_param(params)?;
    let user = subject(ctx, params)?;
    let cfg = &ctx.config.sf9;
    let template = config::resolve(ctx.workspace, &cfg.template);
    match sf9::preview_page(&template, cfg, &sf9_fields(&user), page) {
        Ok(html) => Ok(json!({
            "page": page,
            "sheetName": sf9::page_sheet(cfg, page)?,
            "html": html,
        })),
        Err(RenderError::Workbook(WorkbookError::Missing(path))) => {
            warn!(template = %path.display(), page, "sf9 template missing; returning placeholder");
            Err(HandlerErr::new(
                "template_unavailable",
                format!("SF9 template not found: {}", path.display()),
            )
            .with_details(json!({
                "path": path.to_string_lossy(),
                "placeholderHtml": sf9::placeholder_panel("Template file not found"),
            })))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sf9.generateExcel" => Some(with_session(state, req, sf9_generate_excel)),
        "sf9.previewPage" => Some(with_session(state, req, sf9_preview_page)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_accepts_numbers_and_numeric_strings() {
        assert_eq!(page_param(&json!({ "page": 2 })).expect("number"), 2);
        assert_eq!(page_param(&json!({ "page": " 1 " })).expect("string"), 1);
        assert_eq!(page_param(&json!({})).expect_err("missing").code, "bad_params");
        assert_eq!(page_param(&json!({ "page": -1 })).expect_err("negative").code, "bad_params");
    }
}
