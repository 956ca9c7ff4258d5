mod test_support;

use serde_json::json;
use test_support::{
    create_student, login, open_as_admin, request_err, request_ok, spawn_sidecar, student_email,
    temp_workspace, ADMIN_EMAIL,
};

#[test]
fn bootstrap_admin_then_login_gates_user_creation() {
    let workspace = temp_workspace("registrar-bootstrap");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "name": "Not Admin", "role": "teacher" }),
    );
    assert_eq!(code, "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({
            "name": "First Admin",
            "role": "admin",
            "email": ADMIN_EMAIL,
            "password": "secret"
        }),
    );

    // With an account in place, anonymous creation is closed.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "users.create",
        json!({ "name": "Sneaky", "role": "admin", "email": "x@y.z", "password": "p" }),
    );
    assert_eq!(code, "unauthenticated");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "auth.login",
        json!({ "email": ADMIN_EMAIL, "password": "wrong" }),
    );
    assert_eq!(code, "invalid_credentials");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "auth.login",
        json!({ "email": "nobody@school.test", "password": "secret" }),
    );
    assert_eq!(code, "invalid_credentials");

    let logged_in = login(&mut stdin, &mut reader, "ADMIN@school.test", "secret");
    assert_eq!(logged_in["user"]["role"], "admin");
    assert!(logged_in["user"].get("passwordHash").is_none());
    assert!(logged_in["user"].get("passwordSalt").is_none());

    let me = request_ok(&mut stdin, &mut reader, "7", "auth.whoami", json!({}));
    assert_eq!(me["user"]["email"], ADMIN_EMAIL);

    let _ = request_ok(&mut stdin, &mut reader, "8", "auth.logout", json!({}));
    let code = request_err(&mut stdin, &mut reader, "9", "auth.whoami", json!({}));
    assert_eq!(code, "unauthenticated");
}

#[test]
fn users_update_merges_and_derives_age() {
    let workspace = temp_workspace("registrar-users-update");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_as_admin(&mut stdin, &mut reader, workspace.path());
    let student_id = create_student(&mut stdin, &mut reader, "Ana Santos", "100000000001", "Rizal");

    let before = request_ok(&mut stdin, &mut reader, "1", "users.get", json!({ "id": student_id }));
    assert_eq!(before["user"]["sex"], "FEMALE");
    assert!(before["user"]["age"].as_i64().expect("age") >= 10);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.update",
        json!({ "id": student_id, "patch": { "section": "Bonifacio" } }),
    );
    let after = request_ok(&mut stdin, &mut reader, "3", "users.get", json!({ "id": student_id }));
    assert_eq!(after["user"]["section"], "Bonifacio");
    assert_eq!(after["user"]["lrn"], "100000000001");
    assert_eq!(after["user"]["guardianName"], "Maria Santos");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "users.create",
        json!({
            "name": "Duplicate",
            "role": "student",
            "email": student_email("100000000001"),
            "password": "x"
        }),
    );
    assert_eq!(code, "conflict");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "users.create",
        json!({ "name": "Odd Sex", "role": "student", "sex": "Q" }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn users_delete_requires_confirmation_and_cascades() {
    let workspace = temp_workspace("registrar-users-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin_id = open_as_admin(&mut stdin, &mut reader, workspace.path());
    let student_id = create_student(&mut stdin, &mut reader, "Ben Cruz", "100000000002", "Rizal");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.create",
        json!({ "studentId": student_id, "subject": "Math", "q1": 80 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.mark",
        json!({ "studentId": student_id, "date": "2025-09-01", "status": "present" }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "users.delete",
        json!({ "id": student_id }),
    );
    assert_eq!(code, "confirmation_required");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "users.delete",
        json!({ "id": admin_id, "confirm": true }),
    );
    assert_eq!(code, "bad_params");

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "users.delete",
        json!({ "id": student_id, "confirm": true }),
    );
    assert_eq!(deleted["deletedGrades"], 1);
    assert_eq!(deleted["deletedAttendance"], 1);

    let code = request_err(&mut stdin, &mut reader, "6", "users.get", json!({ "id": student_id }));
    assert_eq!(code, "not_found");
    let grades = request_ok(&mut stdin, &mut reader, "7", "grades.list", json!({}));
    assert_eq!(grades["grades"].as_array().map(|a| a.len()), Some(0));
}

#[test]
fn set_password_is_self_or_admin() {
    let workspace = temp_workspace("registrar-set-password");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin_id = open_as_admin(&mut stdin, &mut reader, workspace.path());
    let student_id = create_student(&mut stdin, &mut reader, "Cara Lim", "100000000003", "Rizal");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "users.setPassword",
        json!({ "id": student_id, "password": "fresh-pass" }),
    );
    let _ = login(&mut stdin, &mut reader, &student_email("100000000003"), "fresh-pass");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "users.setPassword",
        json!({ "id": admin_id, "password": "hijack" }),
    );
    assert_eq!(code, "forbidden");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.setPassword",
        json!({ "id": student_id, "password": "mine-now" }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "auth.login",
        json!({ "email": student_email("100000000003"), "password": "fresh-pass" }),
    );
    assert_eq!(code, "invalid_credentials");
}
