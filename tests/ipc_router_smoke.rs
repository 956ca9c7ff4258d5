mod test_support;

use serde_json::json;
use std::io::Write;
use test_support::{
    open_as_admin, read_response, request, request_err, request_ok, spawn_sidecar, temp_workspace,
};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_workspace("registrar-router-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    let code = request_err(&mut stdin, &mut reader, "2", "grades.list", json!({}));
    assert_eq!(code, "no_workspace");

    let _ = open_as_admin(&mut stdin, &mut reader, workspace.path());
    assert!(workspace.path().join("registrar.sqlite3").is_file());

    // Every family answers with something other than not_implemented.
    for (i, method) in [
        "users.list",
        "grades.list",
        "attendance.list",
        "grades.export",
        "auth.whoami",
    ]
    .iter()
    .enumerate()
    {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("fam-{}", i),
            method,
            json!({}),
        );
        assert_eq!(resp["ok"], true, "{} failed: {}", method, resp);
    }
    for (i, method) in [
        "attendance.export",
        "reports.sf9",
        "sf9.previewPage",
        "idcard.generate",
        "workbook.open",
        "grades.import",
        "attendance.import",
    ]
    .iter()
    .enumerate()
    {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("err-{}", i),
            method,
            json!({}),
        );
        assert_eq!(resp["ok"], false);
        assert_ne!(resp["error"]["code"], "not_implemented", "{}", method);
    }

    let code = request_err(&mut stdin, &mut reader, "3", "grades.frobnicate", json!({}));
    assert_eq!(code, "not_implemented");
}

#[test]
fn malformed_lines_get_bad_json_without_killing_the_loop() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    writeln!(stdin, "{{not json").expect("write");
    stdin.flush().expect("flush");
    let resp = read_response(&mut reader);
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "bad_json");

    let health = request_ok(&mut stdin, &mut reader, "after", "health", json!({}));
    assert!(health.get("version").is_some());
}

#[test]
fn records_require_a_session() {
    let workspace = temp_workspace("registrar-no-session");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    for method in ["grades.list", "attendance.list", "users.list", "auth.whoami"] {
        let code = request_err(&mut stdin, &mut reader, "x", method, json!({}));
        assert_eq!(code, "unauthenticated", "{}", method);
    }
}

#[test]
fn malformed_config_refuses_the_workspace() {
    let workspace = temp_workspace("registrar-bad-config");
    std::fs::write(
        workspace.path().join("registrar.toml"),
        "[school\nschool_year = ",
    )
    .expect("write config");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    assert_eq!(code, "config_invalid");
    let health = request_ok(&mut stdin, &mut reader, "2", "health", json!({}));
    assert!(health["workspacePath"].is_null());
}

#[test]
fn config_overrides_school_year() {
    let workspace = temp_workspace("registrar-config");
    std::fs::write(
        workspace.path().join("registrar.toml"),
        "[school]\nschool_year = \"2030-2031\"\n",
    )
    .expect("write config");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    assert_eq!(opened["schoolYear"], "2030-2031");
}
