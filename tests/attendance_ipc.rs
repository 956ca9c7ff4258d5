mod test_support;

use serde_json::json;
use test_support::{
    create_student, open_as_admin, request_err, request_ok, spawn_sidecar, temp_workspace,
};

#[test]
fn marking_the_same_day_twice_is_an_upsert() {
    let workspace = temp_workspace("registrar-attendance-upsert");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_as_admin(&mut stdin, &mut reader, workspace.path());
    let student_id = create_student(&mut stdin, &mut reader, "Ana Santos", "300000000001", "Rizal");

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.mark",
        json!({ "studentId": student_id, "date": "2025-09-01", "status": "absent" }),
    );
    assert_eq!(first["created"], true);
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.mark",
        json!({ "studentId": student_id, "date": "2025-09-01", "status": "PRESENT" }),
    );
    assert_eq!(second["created"], false);
    assert_eq!(second["id"], first["id"]);
    let third = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.mark",
        json!({ "studentId": student_id, "date": "2025-09-01", "status": "present" }),
    );
    assert_eq!(third["created"], false);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.list",
        json!({ "date": "2025-09-01" }),
    );
    let records = listed["records"].as_array().expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "present");
    assert_eq!(records[0]["studentName"], "Ana Santos");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.mark",
        json!({ "studentId": student_id, "date": "2025-09-01", "status": "tardy" }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.mark",
        json!({ "studentId": student_id, "date": "09/01/2025", "status": "late" }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn save_day_tallies_each_record() {
    let workspace = temp_workspace("registrar-attendance-day");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_as_admin(&mut stdin, &mut reader, workspace.path());
    let a = create_student(&mut stdin, &mut reader, "Ana Santos", "300000000002", "Rizal");
    let b = create_student(&mut stdin, &mut reader, "Ben Cruz", "300000000003", "Rizal");

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.saveDay",
        json!({
            "date": "2025-09-02",
            "records": [
                { "studentId": a, "status": "present" },
                { "studentId": b, "status": "late" },
                { "studentId": "ghost", "status": "present" },
                { "studentId": b, "status": "sleeping" }
            ]
        }),
    );
    assert_eq!(saved["total"], 4);
    assert_eq!(saved["succeeded"], 2);
    assert_eq!(saved["failed"], 2);
    assert_eq!(saved["failures"][0]["index"], 2);
    assert_eq!(saved["failures"][1]["index"], 3);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.list",
        json!({ "date": "2025-09-02", "section": "rizal" }),
    );
    assert_eq!(listed["records"].as_array().map(|r| r.len()), Some(2));
}

#[test]
fn bulk_applies_one_status_across_a_range() {
    let workspace = temp_workspace("registrar-attendance-bulk");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_as_admin(&mut stdin, &mut reader, workspace.path());
    let a = create_student(&mut stdin, &mut reader, "Ana Santos", "300000000004", "Rizal");
    let b = create_student(&mut stdin, &mut reader, "Ben Cruz", "300000000005", "Rizal");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "0",
        "attendance.mark",
        json!({ "studentId": a, "date": "2025-10-02", "status": "present" }),
    );
    let bulk = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.bulk",
        json!({
            "studentIds": [a, b, a, "ghost"],
            "startDate": "2025-10-01",
            "endDate": "2025-10-05",
            "status": "excused"
        }),
    );
    assert_eq!(bulk["students"], 2);
    assert_eq!(bulk["days"], 5);
    assert_eq!(bulk["written"], 10);
    assert_eq!(bulk["skipped"], 1);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.list",
        json!({ "startDate": "2025-10-01", "endDate": "2025-10-31", "studentId": a }),
    );
    let records = listed["records"].as_array().expect("records");
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r["status"] == "excused"));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.bulk",
        json!({
            "studentIds": [a],
            "startDate": "2025-01-01",
            "endDate": "2026-01-02",
            "status": "present"
        }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.bulk",
        json!({
            "studentIds": [a],
            "startDate": "2025-10-05",
            "endDate": "2025-10-01",
            "status": "present"
        }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn scan_marks_present_by_lrn_or_id() {
    let workspace = temp_workspace("registrar-attendance-scan");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_as_admin(&mut stdin, &mut reader, workspace.path());
    let a = create_student(&mut stdin, &mut reader, "Ana Santos", "300000000006", "Rizal");

    let by_lrn = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.scan",
        json!({ "code": "300000000006", "date": "2025-11-03" }),
    );
    assert_eq!(by_lrn["student"]["id"], a.as_str());
    assert_eq!(by_lrn["status"], "present");
    assert_eq!(by_lrn["created"], true);

    let by_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.scan",
        json!({ "code": a, "date": "2025-11-03" }),
    );
    assert_eq!(by_id["created"], false);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.scan",
        json!({ "code": "no-such-code" }),
    );
    assert_eq!(code, "not_found");

    let record_id = by_id["id"].as_str().expect("id").to_string();
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.delete",
        json!({ "id": record_id }),
    );
    assert_eq!(code, "confirmation_required");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.delete",
        json!({ "id": record_id, "confirm": true }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.list",
        json!({ "studentId": a }),
    );
    assert_eq!(listed["records"].as_array().map(|r| r.len()), Some(0));
}
