use crate::calc::AttendanceStatus;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::attendance::{
    list_attendance, parse_status, upsert_attendance, AttendanceFilter,
};
use crate::ipc::handlers::grades::{
    apply_grade_patch, find_grade, insert_grade, load_grade, visible_grades, GradePatch,
    QUARTER_KEYS,
};
use crate::ipc::helpers::{
    accessible_students, date_key, deliver_file, find_student_by, get_optional_str,
    get_required_date, load_student, read_upload, require_staff, require_student_write,
    with_session, Ctx, StudentRef,
};
use crate::ipc::types::{AppState, Request};
use crate::workbook::{self, TableCell, TableRow};
use chrono::{Local, NaiveDate};
use serde_json::json;
use std::collections::HashMap;
use tracing::info;

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub const GRADE_HEADERS: [&str; 10] = [
    "id",
    "studentId",
    "studentName",
    "subject",
    "q1",
    "q2",
    "q3",
    "q4",
    "finalAverage",
    "remarks",
];

pub const ATTENDANCE_HEADERS: [&str; 5] = ["Student Name", "LRN", "Section", "Date", "Status"];

const UNMARKED: &str = "UNMARKED";

/// Per-row outcome counts of an import. Rows are independent: a failed row is
/// reported and the rest still commit.
#[derive(Debug, Default)]
struct ImportTally {
    total: usize,
    succeeded: usize,
    skipped: usize,
    failures: Vec<serde_json::Value>,
}

impl ImportTally {
    fn record(&mut self, row: u32, outcome: Result<(), HandlerErr>) {
        self.total += 1;
        match outcome {
            Ok(()) => self.succeeded += 1,
            Err(e) => self.failures.push(json!({ "row": row, "reason": e.message })),
        }
    }

    fn into_json(self) -> serde_json::Value {
        json!({
            "total": self.total,
            "succeeded": self.succeeded,
            "failed": self.failures.len(),
            "skipped": self.skipped,
            "failures": self.failures,
        })
    }
}

fn read_upload_table(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<Vec<TableRow>, HandlerErr> {
    let bytes = read_upload(ctx.workspace, params)?;
    let book = workbook::open_bytes(&bytes)?;
    Ok(workbook::read_table(&book)?)
}

fn grades_export(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_optional_str(params, "studentId");
    let grades = visible_grades(ctx, student_id.as_deref())?;
    let rows: Vec<Vec<TableCell>> = grades
        .iter()
        .map(|g| {
            vec![
                g.id.clone().into(),
                g.student_id.clone().into(),
                g.student_name.clone().into(),
                g.subject.clone().into(),
                g.q1.into(),
                g.q2.into(),
                g.q3.into(),
                g.q4.into(),
                g.final_average.into(),
                g.remarks.clone().into(),
            ]
        })
        .collect();
    let book = workbook::table_workbook("Grades", &GRADE_HEADERS, &rows)?;
    let bytes = workbook::to_bytes(&book)?;
    let file_name = format!(
        "grades_export_{}.xlsx",
        Local::now().date_naive().format("%Y-%m-%d")
    );
    let mut out = deliver_file(ctx.workspace, params, &bytes, &file_name, XLSX_CONTENT_TYPE)?;
    out["rows"] = json!(grades.len());
    Ok(out)
}

/// Student for an import row: by id, then exact name, then LRN.
fn resolve_row_student(ctx: &Ctx<'_>, row: &TableRow) -> Result<StudentRef, HandlerErr> {
    if let Some(id) = row.get("studentId") {
        if let Some(s) = load_student(ctx.conn, id)? {
            return Ok(s);
        }
    }
    if let Some(name) = row.get("studentName") {
        if let Some(s) = find_student_by(ctx.conn, "name", name)? {
            return Ok(s);
        }
    }
    if let Some(lrn) = row.get("lrn").or_else(|| row.get("LRN")) {
        if let Some(s) = find_student_by(ctx.conn, "lrn", lrn)? {
            return Ok(s);
        }
    }
    Err(HandlerErr::not_found("student"))
}

fn row_patch(row: &TableRow) -> Result<GradePatch, HandlerErr> {
    let mut fields = serde_json::Map::new();
    for key in QUARTER_KEYS {
        if let Some(v) = row.get(key) {
            fields.insert(key.to_string(), json!(v));
        }
    }
    if let Some(subject) = row.get("subject") {
        fields.insert("subject".to_string(), json!(subject));
    }
    GradePatch::from_params(&serde_json::Value::Object(fields))
}

fn import_grade_row(ctx: &Ctx<'_>, row: &TableRow) -> Result<(), HandlerErr> {
    let patch = row_patch(row)?;
    if let Some(existing) = row
        .get("id")
        .map(|id| load_grade(ctx.conn, id))
        .transpose()?
        .flatten()
    {
        require_student_write(ctx, &existing.student_id)?;
        apply_grade_patch(ctx.conn, &existing, &patch)?;
        return Ok(());
    }

    let subject = patch
        .subject
        .clone()
        .ok_or_else(|| HandlerErr::bad_params("missing subject"))?;
    let student = resolve_row_student(ctx, row)?;
    require_student_write(ctx, &student.id)?;
    match find_grade(ctx.conn, &student.id, &subject)? {
        Some(existing) => {
            apply_grade_patch(ctx.conn, &existing, &patch)?;
        }
        None => {
            insert_grade(ctx.conn, &student.id, &subject, patch.apply([0.0; 4]))?;
        }
    }
    Ok(())
}

fn grades_import(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_staff(ctx)?;
    let rows = read_upload_table(ctx, params)?;
    let mut tally = ImportTally::default();
    for row in &rows {
        tally.record(row.row, import_grade_row(ctx, row));
    }
    info!(
        total = tally.total,
        succeeded = tally.succeeded,
        failed = tally.failures.len(),
        "grades import finished"
    );
    Ok(tally.into_json())
}

fn attendance_export(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(params, "date")?;
    let section = get_optional_str(params, "section");
    let students = accessible_students(ctx, section.as_deref())?;
    let marks: HashMap<String, String> = list_attendance(
        ctx.conn,
        &AttendanceFilter {
            start: Some(date),
            end: Some(date),
            ..AttendanceFilter::default()
        },
    )?
    .into_iter()
    .map(|a| (a.student_id, a.status))
    .collect();

    let day = date_key(date);
    let rows: Vec<Vec<TableCell>> = students
        .iter()
        .map(|s| {
            let status = marks
                .get(&s.id)
                .map(|st| st.to_ascii_uppercase())
                .unwrap_or_else(|| UNMARKED.to_string());
            vec![
                s.name.clone().into(),
                s.lrn.clone().unwrap_or_default().into(),
                s.section.clone().unwrap_or_default().into(),
                day.clone().into(),
                status.into(),
            ]
        })
        .collect();
    let book = workbook::table_workbook("Attendance", &ATTENDANCE_HEADERS, &rows)?;
    let bytes = workbook::to_bytes(&book)?;
    let file_name = format!("attendance_{}.xlsx", day);
    let mut out = deliver_file(ctx.workspace, params, &bytes, &file_name, XLSX_CONTENT_TYPE)?;
    out["rows"] = json!(students.len());
    Ok(out)
}

fn import_attendance_row(
    ctx: &Ctx<'_>,
    by_lrn: &HashMap<String, StudentRef>,
    row: &TableRow,
    status_raw: &str,
    date: NaiveDate,
) -> Result<(), HandlerErr> {
    let lrn = row
        .get("LRN")
        .ok_or_else(|| HandlerErr::bad_params("missing LRN"))?;
    let status: AttendanceStatus = parse_status(status_raw)?;
    let student = by_lrn.get(lrn).ok_or_else(|| {
        HandlerErr::not_found(&format!("student with LRN {} in your sections", lrn))
    })?;
    upsert_attendance(ctx.conn, &student.id, date, status)?;
    Ok(())
}

fn attendance_import(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_staff(ctx)?;
    let date = get_required_date(params, "date")?;
    let rows = read_upload_table(ctx, params)?;

    // First student per LRN among those the actor may write.
    let mut by_lrn: HashMap<String, StudentRef> = HashMap::new();
    for s in accessible_students(ctx, None)? {
        if let Some(lrn) = s.lrn.clone() {
            by_lrn.entry(lrn).or_insert(s);
        }
    }

    let mut tally = ImportTally::default();
    for row in &rows {
        let status_raw = row.get("Status").unwrap_or("");
        if status_raw.eq_ignore_ascii_case(UNMARKED) {
            tally.total += 1;
            tally.skipped += 1;
            continue;
        }
        let outcome = import_attendance_row(ctx, &by_lrn, row, status_raw, date);
        tally.record(row.row, outcome);
    }
    info!(
        date = %date_key(date),
        total = tally.total,
        succeeded = tally.succeeded,
        failed = tally.failures.len(),
        "attendance import finished"
    );
    Ok(tally.into_json())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.export" => Some(with_session(state, req, grades_export)),
        "grades.import" => Some(with_session(state, req, grades_import)),
        "attendance.export" => Some(with_session(state, req, attendance_export)),
        "attendance.import" => Some(with_session(state, req, attendance_import)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> TableRow {
        TableRow {
            row: 2,
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn row_patch_reads_quarters_as_text() {
        let patch = row_patch(&row(&[
            ("subject", "Math"),
            ("q1", "90"),
            ("q2", ""),
            ("q3", "85.5"),
        ]))
        .expect("patch");
        assert_eq!(patch.subject.as_deref(), Some("Math"));
        assert_eq!(patch.quarters, [Some(90.0), None, Some(85.5), None]);
    }

    #[test]
    fn row_patch_rejects_bad_scores() {
        let e = row_patch(&row(&[("subject", "Math"), ("q1", "abc")])).expect_err("text score");
        assert_eq!(e.code, "bad_params");
        let e = row_patch(&row(&[("subject", "Math"), ("q4", "150")])).expect_err("range");
        assert_eq!(e.code, "bad_params");
    }

    #[test]
    fn tally_counts_failures_with_rows() {
        let mut tally = ImportTally::default();
        tally.record(2, Ok(()));
        tally.record(3, Err(HandlerErr::bad_params("missing subject")));
        let out = tally.into_json();
        assert_eq!(out["total"], 2);
        assert_eq!(out["succeeded"], 1);
        assert_eq!(out["failed"], 1);
        assert_eq!(out["failures"][0]["row"], 3);
        assert_eq!(out["failures"][0]["reason"], "missing subject");
    }
}
