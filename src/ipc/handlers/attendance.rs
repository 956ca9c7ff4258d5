use crate::auth::Role;
use crate::calc::AttendanceStatus;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    date_key, find_student_by, get_optional_date, get_optional_str, get_required_date,
    get_required_str, load_student, require_confirm, require_staff, require_student_access,
    require_student_write, with_session, Ctx, StudentRef,
};
use crate::ipc::types::{AppState, Request};
use chrono::{Local, NaiveDate};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::info;
use uuid::Uuid;

/// Longest range `attendance.bulk` will stamp in one call.
pub const MAX_BULK_DAYS: i64 = 366;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub lrn: Option<String>,
    pub section: Option<String>,
    pub date: String,
    pub status: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct AttendanceFilter {
    pub student_id: Option<String>,
    pub section: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

pub fn parse_status(raw: &str) -> Result<AttendanceStatus, HandlerErr> {
    AttendanceStatus::parse(raw).ok_or_else(|| {
        let allowed: Vec<&str> = AttendanceStatus::ALL.iter().map(|s| s.as_str()).collect();
        HandlerErr::bad_params(format!(
            "status must be one of {} (got {})",
            allowed.join(", "),
            raw
        ))
        .with_details(json!({ "allowed": allowed }))
    })
}

fn get_required_status(
    params: &serde_json::Value,
    key: &str,
) -> Result<AttendanceStatus, HandlerErr> {
    parse_status(&get_required_str(params, key)?)
}

/// Inserts or overwrites the mark for `(student, date)`. Returns the row id
/// and whether a new row was created.
pub fn upsert_attendance(
    conn: &Connection,
    student_id: &str,
    date: NaiveDate,
    status: AttendanceStatus,
) -> Result<(String, bool), HandlerErr> {
    let day = date_key(date);
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM attendance_records WHERE student_id = ? AND date = ?",
            (student_id, &day),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let created = existing.is_none();
    let record_id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());
    conn.execute(
        "INSERT INTO attendance_records(id, student_id, date, status, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           status = excluded.status,
           updated_at = excluded.updated_at",
        (
            &record_id,
            student_id,
            &day,
            status.as_str(),
            db::now_timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::update("attendance_records", e))?;
    Ok((record_id, created))
}

pub fn list_attendance(
    conn: &Connection,
    filter: &AttendanceFilter,
) -> Result<Vec<AttendanceRow>, HandlerErr> {
    let mut sql = String::from(
        "SELECT a.id, a.student_id, u.name, u.lrn, u.section, a.date, a.status, a.updated_at
         FROM attendance_records a
         JOIN users u ON u.id = a.student_id
         WHERE 1 = 1",
    );
    let mut bind_values: Vec<Value> = Vec::new();
    if let Some(id) = &filter.student_id {
        sql.push_str(" AND a.student_id = ?");
        bind_values.push(Value::Text(id.clone()));
    }
    if let Some(section) = &filter.section {
        sql.push_str(" AND u.section = ? COLLATE NOCASE");
        bind_values.push(Value::Text(section.clone()));
    }
    if let Some(start) = filter.start {
        sql.push_str(" AND a.date >= ?");
        bind_values.push(Value::Text(date_key(start)));
    }
    if let Some(end) = filter.end {
        sql.push_str(" AND a.date <= ?");
        bind_values.push(Value::Text(date_key(end)));
    }
    sql.push_str(" ORDER BY a.date, u.name, a.student_id");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    stmt.query_map(params_from_iter(bind_values), |r| {
        Ok(AttendanceRow {
            id: r.get(0)?,
            student_id: r.get(1)?,
            student_name: r.get(2)?,
            lrn: r.get(3)?,
            section: r.get(4)?,
            date: r.get(5)?,
            status: r.get(6)?,
            updated_at: r.get(7)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

/// Attendance rows visible to the actor. Students only ever see their own.
pub fn visible_attendance(
    ctx: &Ctx<'_>,
    mut filter: AttendanceFilter,
) -> Result<Vec<AttendanceRow>, HandlerErr> {
    if ctx.actor.role == Role::Student && filter.student_id.is_none() {
        filter.student_id = Some(ctx.actor.user_id.clone());
    }
    if let Some(id) = filter.student_id.as_deref() {
        require_student_access(ctx, id)?;
    }
    let rows = list_attendance(ctx.conn, &filter)?;
    Ok(rows
        .into_iter()
        .filter(|a| ctx.actor.can_access_student(&a.student_id, a.section.as_deref()))
        .collect())
}

fn attendance_list(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = get_optional_date(params, "date")?;
    let start = get_optional_date(params, "startDate")?;
    let end = get_optional_date(params, "endDate")?;
    if date.is_some() && (start.is_some() || end.is_some()) {
        return Err(HandlerErr::bad_params(
            "pass either date or startDate/endDate, not both",
        ));
    }
    let filter = AttendanceFilter {
        student_id: get_optional_str(params, "studentId"),
        section: get_optional_str(params, "section"),
        start: date.or(start),
        end: date.or(end),
    };
    let records = visible_attendance(ctx, filter)?;
    Ok(json!({ "records": records }))
}

fn attendance_mark(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let date = get_required_date(params, "date")?;
    let status = get_required_status(params, "status")?;
    let student = require_student_write(ctx, &student_id)?;
    let (record_id, created) = upsert_attendance(ctx.conn, &student.id, date, status)?;
    Ok(json!({
        "id": record_id,
        "created": created,
        "studentId": student.id,
        "date": date_key(date),
        "status": status.as_str(),
    }))
}

fn attendance_save_day(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_staff(ctx)?;
    let date = get_required_date(params, "date")?;
    let Some(records) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing records"));
    };

    let mut succeeded = 0usize;
    let mut failures: Vec<serde_json::Value> = Vec::new();
    for (index, entry) in records.iter().enumerate() {
        let outcome = get_required_str(entry, "studentId").and_then(|student_id| {
            let status = get_required_status(entry, "status")?;
            let student = require_student_write(ctx, &student_id)?;
            upsert_attendance(ctx.conn, &student.id, date, status)
        });
        match outcome {
            Ok(_) => succeeded += 1,
            Err(e) => failures.push(json!({
                "index": index,
                "studentId": entry.get("studentId").cloned().unwrap_or(serde_json::Value::Null),
                "reason": e.message,
            })),
        }
    }
    info!(
        date = %date_key(date),
        succeeded,
        failed = failures.len(),
        "attendance day saved"
    );
    Ok(json!({
        "total": records.len(),
        "succeeded": succeeded,
        "failed": failures.len(),
        "failures": failures,
    }))
}

fn attendance_bulk(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_staff(ctx)?;
    let Some(ids_json) = params.get("studentIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing studentIds"));
    };
    let student_ids: BTreeSet<String> = ids_json
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .collect();
    let start = get_required_date(params, "startDate")?;
    let end = get_required_date(params, "endDate")?;
    let status = get_required_status(params, "status")?;
    if end < start {
        return Err(HandlerErr::bad_params("endDate is before startDate"));
    }
    let days = (end - start).num_days() + 1;
    if days > MAX_BULK_DAYS {
        return Err(HandlerErr::bad_params(format!(
            "date range spans {} days; at most {} allowed",
            days, MAX_BULK_DAYS
        )));
    }

    let mut targets: Vec<StudentRef> = Vec::new();
    let mut skipped: Vec<String> = Vec::new();
    for student_id in student_ids {
        match load_student(ctx.conn, &student_id)? {
            Some(s) if ctx.actor.can_write_student(&s.id, s.section.as_deref()) => {
                targets.push(s)
            }
            _ => skipped.push(student_id),
        }
    }

    let tx = ctx
        .conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut written = 0usize;
    for student in &targets {
        for day in start.iter_days().take(days as usize) {
            upsert_attendance(&tx, &student.id, day, status)?;
            written += 1;
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    info!(
        students = targets.len(),
        skipped = skipped.len(),
        days,
        status = status.as_str(),
        "bulk attendance applied"
    );
    Ok(json!({
        "students": targets.len(),
        "days": days,
        "written": written,
        "skipped": skipped.len(),
        "skippedIds": skipped,
    }))
}

fn attendance_scan(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_staff(ctx)?;
    let code = get_required_str(params, "code")?;
    let date = get_optional_date(params, "date")?.unwrap_or_else(|| Local::now().date_naive());
    let student = match load_student(ctx.conn, &code)? {
        Some(s) => s,
        None => find_student_by(ctx.conn, "lrn", &code)?
            .ok_or_else(|| HandlerErr::not_found("student for scanned code"))?,
    };
    let student = require_student_write(ctx, &student.id)?;
    let (record_id, created) =
        upsert_attendance(ctx.conn, &student.id, date, AttendanceStatus::Present)?;
    Ok(json!({
        "id": record_id,
        "created": created,
        "student": { "id": student.id, "name": student.name, "lrn": student.lrn },
        "date": date_key(date),
        "status": AttendanceStatus::Present.as_str(),
    }))
}

fn attendance_delete(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let record_id = get_required_str(params, "id")?;
    require_confirm(params)?;
    let student_id: String = ctx
        .conn
        .query_row(
            "SELECT student_id FROM attendance_records WHERE id = ?",
            [&record_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("attendance record"))?;
    require_student_write(ctx, &student_id)?;
    ctx.conn
        .execute("DELETE FROM attendance_records WHERE id = ?", [&record_id])
        .map_err(|e| HandlerErr::update("attendance_records", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.list" => Some(with_session(state, req, attendance_list)),
        "attendance.mark" => Some(with_session(state, req, attendance_mark)),
        "attendance.saveDay" => Some(with_session(state, req, attendance_save_day)),
        "attendance.bulk" => Some(with_session(state, req, attendance_bulk)),
        "attendance.scan" => Some(with_session(state, req, attendance_scan)),
        "attendance.delete" => Some(with_session(state, req, attendance_delete)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_reports_allowed_values() {
        assert_eq!(parse_status("LATE").expect("late"), AttendanceStatus::Late);
        let e = parse_status("tardy").expect_err("unknown status");
        assert_eq!(e.code, "bad_params");
        assert!(e.message.contains("excused"));
    }
}
