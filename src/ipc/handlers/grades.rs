use crate::auth::Role;
use crate::calc;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_f64, get_optional_str, get_required_str, require_confirm, require_student_access,
    require_student_write, validate_score, with_session, Ctx,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

pub const QUARTER_KEYS: [&str; 4] = ["q1", "q2", "q3", "q4"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub subject: String,
    pub q1: f64,
    pub q2: f64,
    pub q3: f64,
    pub q4: f64,
    pub final_average: f64,
    pub remarks: String,
    pub updated_at: Option<String>,
    #[serde(skip)]
    pub section: Option<String>,
}

impl GradeRow {
    pub fn quarters(&self) -> [f64; 4] {
        [self.q1, self.q2, self.q3, self.q4]
    }
}

/// Partial quarter update; `None` keeps the stored score.
#[derive(Debug, Clone, Default)]
pub struct GradePatch {
    pub subject: Option<String>,
    pub quarters: [Option<f64>; 4],
}

impl GradePatch {
    pub fn from_params(params: &serde_json::Value) -> Result<Self, HandlerErr> {
        let mut quarters = [None; 4];
        for (i, key) in QUARTER_KEYS.iter().enumerate() {
            quarters[i] = get_optional_f64(params, key)?
                .map(|v| validate_score(key, v))
                .transpose()?;
        }
        Ok(Self {
            subject: get_optional_str(params, "subject"),
            quarters,
        })
    }

    pub fn apply(&self, base: [f64; 4]) -> [f64; 4] {
        let mut out = base;
        for (slot, v) in out.iter_mut().zip(self.quarters.iter()) {
            if let Some(v) = v {
                *slot = *v;
            }
        }
        out
    }
}

const GRADE_SELECT: &str = "SELECT g.id, g.student_id, u.name, g.subject, g.q1, g.q2, g.q3, g.q4,
        g.final_average, g.remarks, g.updated_at, u.section
     FROM grade_records g
     JOIN users u ON u.id = g.student_id";

fn grade_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<GradeRow> {
    Ok(GradeRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: r.get(2)?,
        subject: r.get(3)?,
        q1: r.get(4)?,
        q2: r.get(5)?,
        q3: r.get(6)?,
        q4: r.get(7)?,
        final_average: r.get(8)?,
        remarks: r.get(9)?,
        updated_at: r.get(10)?,
        section: r.get(11)?,
    })
}

pub fn load_grade(conn: &Connection, grade_id: &str) -> Result<Option<GradeRow>, HandlerErr> {
    conn.query_row(
        &format!("{} WHERE g.id = ?", GRADE_SELECT),
        [grade_id],
        grade_from_row,
    )
    .optional()
    .map_err(HandlerErr::query)
}

pub fn find_grade(
    conn: &Connection,
    student_id: &str,
    subject: &str,
) -> Result<Option<GradeRow>, HandlerErr> {
    conn.query_row(
        &format!("{} WHERE g.student_id = ? AND g.subject = ?", GRADE_SELECT),
        (student_id, subject),
        grade_from_row,
    )
    .optional()
    .map_err(HandlerErr::query)
}

/// Grade rows for one student, or for everyone when `student_id` is `None`.
pub fn list_grades(
    conn: &Connection,
    student_id: Option<&str>,
) -> Result<Vec<GradeRow>, HandlerErr> {
    let (sql, args): (String, Vec<&str>) = match student_id {
        Some(id) => (
            format!("{} WHERE g.student_id = ? ORDER BY g.subject", GRADE_SELECT),
            vec![id],
        ),
        None => (
            format!("{} ORDER BY u.name, g.student_id, g.subject", GRADE_SELECT),
            vec![],
        ),
    };
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    stmt.query_map(rusqlite::params_from_iter(args), grade_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)
}

/// Inserts a new record with its derived average. The caller checks for an
/// existing `(student, subject)` pair first.
pub fn insert_grade(
    conn: &Connection,
    student_id: &str,
    subject: &str,
    quarters: [f64; 4],
) -> Result<String, HandlerErr> {
    let summary = calc::aggregate_quarters(quarters);
    let grade_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grade_records(
           id, student_id, subject, q1, q2, q3, q4, final_average, remarks, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &grade_id,
            student_id,
            subject,
            quarters[0],
            quarters[1],
            quarters[2],
            quarters[3],
            summary.final_average,
            summary.remarks.as_str(),
            db::now_timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::insert("grade_records", e))?;
    Ok(grade_id)
}

/// Merges `patch` over the stored record and recomputes the derived fields.
pub fn apply_grade_patch(
    conn: &Connection,
    existing: &GradeRow,
    patch: &GradePatch,
) -> Result<GradeRow, HandlerErr> {
    let subject = patch
        .subject
        .clone()
        .unwrap_or_else(|| existing.subject.clone());
    if subject != existing.subject {
        if let Some(other) = find_grade(conn, &existing.student_id, &subject)? {
            if other.id != existing.id {
                return Err(HandlerErr::new(
                    "conflict",
                    format!("{} already has a {} record", existing.student_name, subject),
                ));
            }
        }
    }
    let quarters = patch.apply(existing.quarters());
    let summary = calc::aggregate_quarters(quarters);
    conn.execute(
        "UPDATE grade_records
         SET subject = ?, q1 = ?, q2 = ?, q3 = ?, q4 = ?, final_average = ?, remarks = ?, updated_at = ?
         WHERE id = ?",
        (
            &subject,
            quarters[0],
            quarters[1],
            quarters[2],
            quarters[3],
            summary.final_average,
            summary.remarks.as_str(),
            db::now_timestamp(),
            &existing.id,
        ),
    )
    .map_err(|e| HandlerErr::update("grade_records", e))?;
    load_grade(conn, &existing.id)?.ok_or_else(|| HandlerErr::not_found("grade"))
}

/// Grades visible to the actor, optionally for one student.
pub fn visible_grades(
    ctx: &Ctx<'_>,
    student_id: Option<&str>,
) -> Result<Vec<GradeRow>, HandlerErr> {
    let student_id = match (ctx.actor.role, student_id) {
        (Role::Student, None) => Some(ctx.actor.user_id.as_str()),
        (_, s) => s,
    };
    if let Some(id) = student_id {
        require_student_access(ctx, id)?;
    }
    let rows = list_grades(ctx.conn, student_id)?;
    Ok(rows
        .into_iter()
        .filter(|g| ctx.actor.can_access_student(&g.student_id, g.section.as_deref()))
        .collect())
}

fn grades_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_optional_str(params, "studentId");
    let grades = visible_grades(ctx, student_id.as_deref())?;
    Ok(json!({ "grades": grades }))
}

fn grades_get(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let grade_id = get_required_str(params, "id")?;
    let grade = load_grade(ctx.conn, &grade_id)?.ok_or_else(|| HandlerErr::not_found("grade"))?;
    require_student_access(ctx, &grade.student_id)?;
    Ok(json!({ "grade": grade }))
}

fn grades_create(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject = get_required_str(params, "subject")?;
    let student = require_student_write(ctx, &student_id)?;
    let patch = GradePatch::from_params(params)?;
    if find_grade(ctx.conn, &student.id, &subject)?.is_some() {
        return Err(HandlerErr::new(
            "conflict",
            format!("{} already has a {} record", student.name, subject),
        )
        .with_details(json!({ "studentId": student.id, "subject": subject })));
    }
    let grade_id = insert_grade(ctx.conn, &student.id, &subject, patch.apply([0.0; 4]))?;
    let grade = load_grade(ctx.conn, &grade_id)?.ok_or_else(|| HandlerErr::not_found("grade"))?;
    Ok(json!({ "gradeId": grade_id, "grade": grade }))
}

fn grades_update(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let grade_id = get_required_str(params, "id")?;
    let Some(patch_json) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("missing/invalid patch"));
    };
    let existing =
        load_grade(ctx.conn, &grade_id)?.ok_or_else(|| HandlerErr::not_found("grade"))?;
    require_student_write(ctx, &existing.student_id)?;
    if let Some(other) = get_optional_str(patch_json, "studentId") {
        if other != existing.student_id {
            return Err(HandlerErr::bad_params("studentId of a grade record cannot change"));
        }
    }
    let patch = GradePatch::from_params(patch_json)?;
    let grade = apply_grade_patch(ctx.conn, &existing, &patch)?;
    Ok(json!({ "grade": grade }))
}

fn grades_delete(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let grade_id = get_required_str(params, "id")?;
    require_confirm(params)?;
    let existing =
        load_grade(ctx.conn, &grade_id)?.ok_or_else(|| HandlerErr::not_found("grade"))?;
    require_student_write(ctx, &existing.student_id)?;
    ctx.conn
        .execute("DELETE FROM grade_records WHERE id = ?", [&grade_id])
        .map_err(|e| HandlerErr::update("grade_records", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.list" => Some(with_session(state, req, grades_list)),
        "grades.get" => Some(with_session(state, req, grades_get)),
        "grades.create" => Some(with_session(state, req, grades_create)),
        "grades.update" => Some(with_session(state, req, grades_update)),
        "grades.delete" => Some(with_session(state, req, grades_delete)),
        _ => None,
    }
}
