use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "registrar.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT UNIQUE,
            role TEXT NOT NULL,
            lrn TEXT,
            grade_level TEXT,
            section TEXT,
            avatar TEXT,
            password_hash TEXT,
            password_salt TEXT,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    // Guardian/demographic columns arrived after the first schema.
    ensure_users_profile_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_section ON users(section)",
        [],
    )?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_users_lrn ON users(lrn)", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            q1 REAL NOT NULL DEFAULT 0,
            q2 REAL NOT NULL DEFAULT 0,
            q3 REAL NOT NULL DEFAULT 0,
            q4 REAL NOT NULL DEFAULT 0,
            final_average REAL NOT NULL DEFAULT 0,
            remarks TEXT NOT NULL DEFAULT 'Failed',
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES users(id),
            UNIQUE(student_id, subject)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_records_student ON grade_records(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES users(id),
            UNIQUE(student_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_date ON attendance_records(date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_student ON attendance_records(student_id)",
        [],
    )?;

    // Older stores spelled the teacher role "faculty".
    conn.execute(
        "UPDATE users SET role = 'teacher' WHERE role IN ('faculty', 'FACULTY', 'TEACHER')",
        [],
    )?;

    Ok(conn)
}

fn ensure_users_profile_columns(conn: &Connection) -> anyhow::Result<()> {
    for (column, decl) in [
        ("guardian_name", "TEXT"),
        ("guardian_phone", "TEXT"),
        ("adviser", "TEXT"),
        ("sex", "TEXT"),
        ("birth_date", "TEXT"),
        ("assigned_sections", "TEXT NOT NULL DEFAULT '[]'"),
    ] {
        if !table_has_column(conn, "users", column)? {
            conn.execute(
                &format!("ALTER TABLE users ADD COLUMN {} {}", column, decl),
                [],
            )?;
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
