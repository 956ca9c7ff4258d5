use crate::auth::Role;
use crate::calc::{self, AttendanceStatus, Remark};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::attendance::{visible_attendance, AttendanceFilter};
use crate::ipc::handlers::grades::visible_grades;
use crate::ipc::handlers::users::require_visible_user;
use crate::ipc::helpers::{get_optional_str, get_required_str, parse_date, with_session, Ctx};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// Structured SF9 model: learner block, subject finals, general average and
/// the monthly attendance panel.
fn reports_sf9(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let school_year = get_optional_str(params, "schoolYear")
        .unwrap_or_else(|| ctx.config.school.school_year.clone());
    let student = require_visible_user(ctx, &student_id)?;
    if student.role != Role::Student {
        return Err(HandlerErr::not_found("student"));
    }

    let grades = visible_grades(ctx, Some(&student.id))?;
    let general_average = calc::general_average(grades.iter().map(|g| g.final_average));
    let subjects: Vec<serde_json::Value> = grades
        .iter()
        .map(|g| {
            json!({
                "subject": g.subject,
                "q1": g.q1,
                "q2": g.q2,
                "q3": g.q3,
                "q4": g.q4,
                "finalAverage": g.final_average,
                "remarks": g.remarks,
            })
        })
        .collect();

    let records = visible_attendance(
        ctx,
        AttendanceFilter {
            student_id: Some(student.id.clone()),
            ..AttendanceFilter::default()
        },
    )?;
    let mut marks = Vec::with_capacity(records.len());
    for r in &records {
        let Some(status) = AttendanceStatus::parse(&r.status) else {
            continue;
        };
        marks.push((parse_date(&r.date)?, status));
    }
    let months = calc::summarize_attendance(marks);
    let totals = months.iter().fold((0u32, 0u32, 0u32), |acc, m| {
        (acc.0 + m.school_days, acc.1 + m.days_present, acc.2 + m.days_absent)
    });

    Ok(json!({
        "schoolYear": school_year,
        "student": {
            "id": student.id,
            "name": student.name,
            "lrn": student.lrn,
            "sex": student.sex,
            "age": student.age,
            "gradeLevel": student.grade_level,
            "section": student.section,
            "adviser": student
                .adviser
                .clone()
                .unwrap_or_else(|| ctx.config.school.default_adviser.clone()),
        },
        "subjects": subjects,
        "generalAverage": general_average,
        "generalRemarks": general_average.map(|a| Remark::for_average(a).as_str()),
        "attendance": {
            "months": months,
            "totals": {
                "schoolDays": totals.0,
                "daysPresent": totals.1,
                "daysAbsent": totals.2,
            },
        },
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.sf9" => Some(with_session(state, req, reports_sf9)),
        _ => None,
    }
}
