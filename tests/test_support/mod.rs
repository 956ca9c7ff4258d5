#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;
use std::io::{BufRead, BufReader, Cursor, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

pub const ADMIN_EMAIL: &str = "admin@school.test";
pub const ADMIN_PASSWORD: &str = "admin-pass";

pub fn temp_workspace(prefix: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("create temp workspace")
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_registrard");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn registrard");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

/// Sends a request that must succeed and returns its `result`.
pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

/// Sends a request that must fail and returns its error code.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

/// Selects `workspace`, creates the bootstrap admin and logs in as them.
/// Returns the admin's user id.
pub fn open_as_admin(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &Path,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        stdin,
        reader,
        "admin-create",
        "users.create",
        json!({
            "name": "Registrar Admin",
            "role": "admin",
            "email": ADMIN_EMAIL,
            "password": ADMIN_PASSWORD,
        }),
    );
    login(stdin, reader, ADMIN_EMAIL, ADMIN_PASSWORD);
    created
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string()
}

pub fn login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    email: &str,
    password: &str,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        "login",
        "auth.login",
        json!({ "email": email, "password": password }),
    )
}

/// Creates a student (as the logged-in admin) and returns the new id.
pub fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    name: &str,
    lrn: &str,
    section: &str,
) -> String {
    let email = format!("{}@school.test", lrn);
    let created = request_ok(
        stdin,
        reader,
        "student-create",
        "users.create",
        json!({
            "name": name,
            "role": "student",
            "email": email,
            "password": "student-pass",
            "lrn": lrn,
            "gradeLevel": "Grade 5",
            "section": section,
            "sex": "F",
            "birthDate": "2015-03-14",
            "guardianName": "Maria Santos",
            "guardianPhone": "0917-000-0000",
            "adviser": "Mr. Reyes",
        }),
    );
    created
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string()
}

pub fn student_email(lrn: &str) -> String {
    format!("{}@school.test", lrn)
}

/// Header row followed by data rows on a single sheet, as xlsx bytes.
pub fn table_xlsx(sheet: &str, rows: &[Vec<&str>]) -> Vec<u8> {
    let mut book = umya_spreadsheet::new_file_empty_worksheet();
    let ws = book.new_sheet(sheet).expect("new sheet");
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            ws.get_cell_mut((c as u32 + 1, r as u32 + 1))
                .set_value(value.to_string());
        }
    }
    xlsx_bytes(&book)
}

pub fn xlsx_bytes(book: &umya_spreadsheet::Spreadsheet) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    umya_spreadsheet::writer::xlsx::write_writer(book, &mut buf).expect("write xlsx");
    buf.into_inner()
}

pub fn read_xlsx(bytes: &[u8]) -> umya_spreadsheet::Spreadsheet {
    umya_spreadsheet::reader::xlsx::read_reader(Cursor::new(bytes.to_vec()), true)
        .expect("read xlsx")
}

pub fn b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn unb64(value: &serde_json::Value) -> Vec<u8> {
    STANDARD
        .decode(value.as_str().expect("base64 string"))
        .expect("decode base64")
}
