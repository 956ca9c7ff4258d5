use crate::auth::{Actor, Role};
use crate::config::{self, PortalConfig};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Everything a record handler needs once a workspace is open and someone is logged in.
pub struct Ctx<'a> {
    pub conn: &'a Connection,
    pub actor: &'a Actor,
    pub workspace: &'a Path,
    pub config: &'a PortalConfig,
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn session_ctx(state: &AppState) -> Result<Ctx<'_>, HandlerErr> {
    let conn = require_db(state)?;
    let workspace = state
        .workspace
        .as_deref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let actor = state
        .session
        .as_ref()
        .ok_or_else(|| HandlerErr::new("unauthenticated", "log in first"))?;
    Ok(Ctx {
        conn,
        actor,
        workspace,
        config: &state.config,
    })
}

pub fn respond(req: &Request, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub type SessionHandler = fn(&Ctx<'_>, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

/// Runs `f` against the logged-in session and wraps the outcome as a response.
pub fn with_session(state: &AppState, req: &Request, f: SessionHandler) -> serde_json::Value {
    let result = session_ctx(state).and_then(|ctx| f(&ctx, &req.params));
    respond(req, result)
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Trimmed string value; blank and non-string values read as absent.
pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Numbers, numeric strings and null/blank (as `None`) are accepted.
pub fn get_optional_f64(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<f64>, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Ok(None);
    };
    match v {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(n) => Ok(n.as_f64()),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(None),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| HandlerErr::bad_params(format!("{} must be numeric", key))),
        _ => Err(HandlerErr::bad_params(format!("{} must be numeric", key))),
    }
}

pub fn require_confirm(params: &serde_json::Value) -> Result<(), HandlerErr> {
    if params.get("confirm").and_then(|v| v.as_bool()) == Some(true) {
        return Ok(());
    }
    Err(HandlerErr::new(
        "confirmation_required",
        "delete is irreversible; pass confirm: true",
    ))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("date must be YYYY-MM-DD: {}", raw)))
}

pub fn get_required_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    parse_date(&get_required_str(params, key)?)
}

pub fn get_optional_date(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<NaiveDate>, HandlerErr> {
    get_optional_str(params, key).map(|s| parse_date(&s)).transpose()
}

pub fn date_key(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// Grade scores are percentages; 0 means "not yet entered".
pub fn validate_score(key: &str, v: f64) -> Result<f64, HandlerErr> {
    if !v.is_finite() || !(0.0..=100.0).contains(&v) {
        return Err(HandlerErr::bad_params(format!("{} must be between 0 and 100", key))
            .with_details(json!({ "field": key, "value": v })));
    }
    Ok(v)
}

fn workspace_path(workspace: &Path, raw: &str) -> PathBuf {
    config::resolve(workspace, Path::new(raw))
}

/// Uploaded spreadsheet bytes, from either `path` or `dataBase64`.
pub fn read_upload(workspace: &Path, params: &serde_json::Value) -> Result<Vec<u8>, HandlerErr> {
    if let Some(data) = get_optional_str(params, "dataBase64") {
        return STANDARD
            .decode(data.as_bytes())
            .map_err(|e| HandlerErr::bad_params(format!("dataBase64 is not valid base64: {}", e)));
    }
    let Some(raw) = get_optional_str(params, "path") else {
        return Err(HandlerErr::bad_params("missing path or dataBase64"));
    };
    let path = workspace_path(workspace, &raw);
    std::fs::read(&path).map_err(|e| {
        HandlerErr::new("not_found", format!("failed to read {}: {}", path.to_string_lossy(), e))
    })
}

/// Writes to `outPath` when given; otherwise the bytes travel back inline.
pub fn deliver_file(
    workspace: &Path,
    params: &serde_json::Value,
    bytes: &[u8],
    file_name: &str,
    content_type: &str,
) -> Result<serde_json::Value, HandlerErr> {
    if let Some(raw) = get_optional_str(params, "outPath") {
        let path = workspace_path(workspace, &raw);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HandlerErr::new("write_failed", e.to_string())
                    .with_details(json!({ "path": parent.to_string_lossy() }))
            })?;
        }
        std::fs::write(&path, bytes).map_err(|e| {
            HandlerErr::new("write_failed", e.to_string())
                .with_details(json!({ "path": path.to_string_lossy() }))
        })?;
        return Ok(json!({
            "fileName": file_name,
            "contentType": content_type,
            "path": path.to_string_lossy(),
            "bytes": bytes.len(),
        }));
    }
    Ok(json!({
        "fileName": file_name,
        "contentType": content_type,
        "dataBase64": STANDARD.encode(bytes),
        "bytes": bytes.len(),
    }))
}

#[derive(Debug, Clone)]
pub struct StudentRef {
    pub id: String,
    pub name: String,
    pub lrn: Option<String>,
    pub section: Option<String>,
}

const STUDENT_COLUMNS: &str = "id, name, lrn, section";

fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRef> {
    Ok(StudentRef {
        id: r.get(0)?,
        name: r.get(1)?,
        lrn: r.get(2)?,
        section: r.get(3)?,
    })
}

pub fn load_student(conn: &Connection, student_id: &str) -> Result<Option<StudentRef>, HandlerErr> {
    conn.query_row(
        &format!(
            "SELECT {} FROM users WHERE id = ? AND role = 'student'",
            STUDENT_COLUMNS
        ),
        [student_id],
        student_from_row,
    )
    .optional()
    .map_err(HandlerErr::query)
}

pub fn find_student_by(
    conn: &Connection,
    column: &str,
    value: &str,
) -> Result<Option<StudentRef>, HandlerErr> {
    // Ties resolve to the oldest record.
    conn.query_row(
        &format!(
            "SELECT {} FROM users WHERE {} = ? AND role = 'student' ORDER BY rowid LIMIT 1",
            STUDENT_COLUMNS, column
        ),
        [value],
        student_from_row,
    )
    .optional()
    .map_err(HandlerErr::query)
}

/// Loads a student the actor may read. Students asking about anyone else are
/// refused before the lookup so ids of other learners are not probed.
pub fn require_student_access(ctx: &Ctx<'_>, student_id: &str) -> Result<StudentRef, HandlerErr> {
    if ctx.actor.role == Role::Student && ctx.actor.user_id != student_id {
        return Err(HandlerErr::forbidden("students may only access their own records"));
    }
    let student =
        load_student(ctx.conn, student_id)?.ok_or_else(|| HandlerErr::not_found("student"))?;
    if !ctx.actor.can_access_student(&student.id, student.section.as_deref()) {
        return Err(HandlerErr::forbidden("student is outside your assigned sections"));
    }
    Ok(student)
}

pub fn require_student_write(ctx: &Ctx<'_>, student_id: &str) -> Result<StudentRef, HandlerErr> {
    if !ctx.actor.is_staff() {
        return Err(HandlerErr::forbidden("only teachers and admins may change records"));
    }
    require_student_access(ctx, student_id)
}

pub fn require_staff(ctx: &Ctx<'_>) -> Result<(), HandlerErr> {
    if ctx.actor.is_staff() {
        Ok(())
    } else {
        Err(HandlerErr::forbidden("only teachers and admins may do this"))
    }
}

pub fn require_admin(actor: &Actor) -> Result<(), HandlerErr> {
    if actor.role == Role::Admin {
        Ok(())
    } else {
        Err(HandlerErr::forbidden("admin only"))
    }
}

/// Students visible to the actor, optionally narrowed to one section, in name order.
pub fn accessible_students(
    ctx: &Ctx<'_>,
    section: Option<&str>,
) -> Result<Vec<StudentRef>, HandlerErr> {
    let mut stmt = ctx
        .conn
        .prepare(&format!(
            "SELECT {} FROM users WHERE role = 'student' ORDER BY name, id",
            STUDENT_COLUMNS
        ))
        .map_err(HandlerErr::query)?;
    let all = stmt
        .query_map([], student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(all
        .into_iter()
        .filter(|s| ctx.actor.can_access_student(&s.id, s.section.as_deref()))
        .filter(|s| match section {
            Some(want) => s
                .section
                .as_deref()
                .map(|have| have.eq_ignore_ascii_case(want))
                .unwrap_or(false),
            None => true,
        })
        .collect())
}
