use crate::auth::{self, Actor, Role};
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_str, get_required_str, parse_date, require_admin, require_confirm, require_db,
    respond, with_session, Ctx,
};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, NaiveDate};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub role: Role,
    pub lrn: Option<String>,
    pub grade_level: Option<String>,
    pub section: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub adviser: Option<String>,
    pub avatar: Option<String>,
    pub sex: Option<String>,
    pub birth_date: Option<String>,
    pub age: Option<i32>,
    pub assigned_sections: Vec<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

const USER_COLUMNS: &str = "id, name, email, role, lrn, grade_level, section, guardian_name,
    guardian_phone, adviser, avatar, sex, birth_date, assigned_sections, created_at, updated_at";

/// Whole years between `birth` and `today`.
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age.max(0)
}

fn user_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    let role_raw: String = r.get(3)?;
    let birth_date: Option<String> = r.get(12)?;
    let sections_raw: String = r.get(13)?;
    let today = chrono::Local::now().date_naive();
    let age = birth_date
        .as_deref()
        .and_then(|b| NaiveDate::parse_from_str(b, "%Y-%m-%d").ok())
        .map(|b| age_on(b, today));
    Ok(UserRecord {
        id: r.get(0)?,
        name: r.get(1)?,
        email: r.get(2)?,
        role: Role::parse(&role_raw).unwrap_or(Role::Student),
        lrn: r.get(4)?,
        grade_level: r.get(5)?,
        section: r.get(6)?,
        guardian_name: r.get(7)?,
        guardian_phone: r.get(8)?,
        adviser: r.get(9)?,
        avatar: r.get(10)?,
        sex: r.get(11)?,
        birth_date,
        age,
        assigned_sections: auth::parse_sections(&sections_raw),
        created_at: r.get(14)?,
        updated_at: r.get(15)?,
    })
}

pub fn load_user(conn: &Connection, user_id: &str) -> Result<Option<UserRecord>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
        [user_id],
        user_from_row,
    )
    .optional()
    .map_err(HandlerErr::query)
}

pub fn actor_for(user: &UserRecord) -> Actor {
    Actor {
        user_id: user.id.clone(),
        role: user.role,
        assigned_sections: user.assigned_sections.clone(),
    }
}

fn can_view(actor: &Actor, user: &UserRecord) -> bool {
    if actor.user_id == user.id {
        return true;
    }
    match user.role {
        Role::Student => actor.can_access_student(&user.id, user.section.as_deref()),
        Role::Teacher | Role::Admin => actor.role == Role::Admin,
    }
}

fn normalize_sex(raw: &str) -> Result<String, HandlerErr> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "M" | "MALE" => Ok("MALE".to_string()),
        "F" | "FEMALE" => Ok("FEMALE".to_string()),
        _ => Err(HandlerErr::bad_params("sex must be MALE or FEMALE")),
    }
}

fn parse_sections_param(v: &serde_json::Value) -> Result<Vec<String>, HandlerErr> {
    let Some(items) = v.as_array() else {
        return Err(HandlerErr::bad_params("assignedSections must be an array of strings"));
    };
    let mut out = Vec::new();
    for item in items {
        let Some(s) = item.as_str() else {
            return Err(HandlerErr::bad_params("assignedSections must be an array of strings"));
        };
        let s = s.trim();
        if !s.is_empty() {
            out.push(s.to_string());
        }
    }
    Ok(out)
}

fn email_taken(
    conn: &Connection,
    email: &str,
    except_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    let other: Option<String> = conn
        .query_row(
            "SELECT id FROM users WHERE lower(email) = lower(?)",
            [email],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    Ok(match (other, except_id) {
        (Some(found), Some(me)) => found != me,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

/// Optional profile columns settable on create and through `patch` on update.
const PROFILE_FIELDS: [(&str, &str); 7] = [
    ("lrn", "lrn"),
    ("gradeLevel", "grade_level"),
    ("section", "section"),
    ("guardianName", "guardian_name"),
    ("guardianPhone", "guardian_phone"),
    ("adviser", "adviser"),
    ("avatar", "avatar"),
];

/// Patch keys only an admin may set.
const ADMIN_ONLY_FIELDS: [&str; 3] = ["role", "email", "assignedSections"];

/// Loads a user the actor may see.
pub fn require_visible_user(ctx: &Ctx<'_>, user_id: &str) -> Result<UserRecord, HandlerErr> {
    if ctx.actor.role == Role::Student && ctx.actor.user_id != user_id {
        return Err(HandlerErr::forbidden("students may only access their own records"));
    }
    let user = load_user(ctx.conn, user_id)?.ok_or_else(|| HandlerErr::not_found("user"))?;
    if !can_view(ctx.actor, &user) {
        return Err(HandlerErr::forbidden("you may not view this user"));
    }
    Ok(user)
}

/// Builds an unsaved record from caller-supplied profile data, as sent by a
/// client that renders a document before (or without) storing the learner.
pub fn user_from_inline(data: &serde_json::Value) -> Result<UserRecord, HandlerErr> {
    if !data.is_object() {
        return Err(HandlerErr::bad_params("user data must be an object"));
    }
    let birth_date = get_optional_str(data, "birthDate");
    let age = match data.get("age") {
        Some(serde_json::Value::Number(n)) => n.as_i64().and_then(|a| i32::try_from(a).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
    .or_else(|| {
        let birth = NaiveDate::parse_from_str(birth_date.as_deref()?, "%Y-%m-%d").ok()?;
        Some(age_on(birth, chrono::Local::now().date_naive()))
    });
    let sex = get_optional_str(data, "sex").map(|s| normalize_sex(&s)).transpose()?;
    Ok(UserRecord {
        id: get_optional_str(data, "id").unwrap_or_default(),
        name: get_optional_str(data, "name").unwrap_or_default(),
        email: None,
        role: Role::Student,
        lrn: get_optional_str(data, "lrn"),
        grade_level: get_optional_str(data, "gradeLevel"),
        section: get_optional_str(data, "section"),
        guardian_name: get_optional_str(data, "guardianName"),
        guardian_phone: get_optional_str(data, "guardianPhone"),
        adviser: get_optional_str(data, "adviser"),
        avatar: get_optional_str(data, "avatar"),
        sex,
        birth_date,
        age,
        assigned_sections: Vec::new(),
        created_at: None,
        updated_at: None,
    })
}

/// The person a rendered document is about: a stored user named by `id_key`,
/// or inline profile data under `inline_key`.
pub fn document_user(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
    id_key: &str,
    inline_key: &str,
) -> Result<UserRecord, HandlerErr> {
    if let Some(id) = get_optional_str(params, id_key) {
        return require_visible_user(ctx, &id);
    }
    match params.get(inline_key) {
        Some(data) => user_from_inline(data),
        None => Err(HandlerErr::bad_params(format!(
            "missing {} or {}",
            id_key, inline_key
        ))),
    }
}

fn users_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let role_filter = match get_optional_str(params, "role") {
        Some(r) => Some(Role::parse(&r).ok_or_else(|| HandlerErr::bad_params("unknown role"))?),
        None => None,
    };
    let section_filter = get_optional_str(params, "section");

    let mut stmt = ctx
        .conn
        .prepare(&format!("SELECT {} FROM users ORDER BY name, id", USER_COLUMNS))
        .map_err(HandlerErr::query)?;
    let users = stmt
        .query_map([], user_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let visible: Vec<UserRecord> = users
        .into_iter()
        .filter(|u| can_view(ctx.actor, u))
        .filter(|u| role_filter.map(|r| u.role == r).unwrap_or(true))
        .filter(|u| match section_filter.as_deref() {
            Some(want) => u
                .section
                .as_deref()
                .map(|have| have.eq_ignore_ascii_case(want))
                .unwrap_or(false),
            None => true,
        })
        .collect();
    Ok(json!({ "users": visible }))
}

fn users_get(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "id")?;
    let user = require_visible_user(ctx, &user_id)?;
    Ok(json!({ "user": user }))
}

fn users_create(
    conn: &Connection,
    actor: Option<&Actor>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let role_raw = get_required_str(params, "role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| HandlerErr::bad_params("role must be student, teacher or admin"))?;

    match actor {
        Some(a) => require_admin(a)?,
        None => {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
                .map_err(HandlerErr::query)?;
            if count > 0 {
                return Err(HandlerErr::new("unauthenticated", "log in first"));
            }
            if role != Role::Admin {
                return Err(HandlerErr::bad_params(
                    "the first account of a new workspace must be an admin",
                ));
            }
        }
    }

    let email = get_optional_str(params, "email");
    let password = params.get("password").and_then(|v| v.as_str()).unwrap_or("");
    if email.is_some() != !password.is_empty() {
        return Err(HandlerErr::bad_params(
            "email and password must be given together",
        ));
    }
    if let Some(e) = email.as_deref() {
        if email_taken(conn, e, None)? {
            return Err(HandlerErr::new("conflict", "email already in use"));
        }
    }
    let (salt, hash) = if password.is_empty() {
        (None, None)
    } else {
        let salt = auth::new_salt();
        let hash = auth::hash_password(&salt, password);
        (Some(salt), Some(hash))
    };

    let sex = get_optional_str(params, "sex")
        .map(|s| normalize_sex(&s))
        .transpose()?;
    let birth_date = match get_optional_str(params, "birthDate") {
        Some(b) => Some(parse_date(&b)?.format("%Y-%m-%d").to_string()),
        None => None,
    };
    let sections = match params.get("assignedSections") {
        Some(v) if !v.is_null() => parse_sections_param(v)?,
        _ => Vec::new(),
    };
    let sections_json = serde_json::to_string(&sections)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let user_id = Uuid::new_v4().to_string();
    let now = db::now_timestamp();
    let mut columns: Vec<&str> = vec![
        "id",
        "name",
        "email",
        "role",
        "password_hash",
        "password_salt",
        "sex",
        "birth_date",
        "assigned_sections",
        "created_at",
        "updated_at",
    ];
    let mut values: Vec<Value> = vec![
        Value::Text(user_id.clone()),
        Value::Text(name),
        email.map(Value::Text).unwrap_or(Value::Null),
        Value::Text(role.as_str().to_string()),
        hash.map(Value::Text).unwrap_or(Value::Null),
        salt.map(Value::Text).unwrap_or(Value::Null),
        sex.map(Value::Text).unwrap_or(Value::Null),
        birth_date.map(Value::Text).unwrap_or(Value::Null),
        Value::Text(sections_json),
        Value::Text(now.clone()),
        Value::Text(now),
    ];
    for (key, column) in PROFILE_FIELDS {
        if let Some(v) = get_optional_str(params, key) {
            columns.push(column);
            values.push(Value::Text(v));
        }
    }
    let placeholders = vec!["?"; columns.len()].join(", ");
    conn.execute(
        &format!(
            "INSERT INTO users({}) VALUES({})",
            columns.join(", "),
            placeholders
        ),
        params_from_iter(values),
    )
    .map_err(|e| HandlerErr::insert("users", e))?;

    info!(user_id = %user_id, role = role.as_str(), "user created");
    Ok(json!({ "userId": user_id }))
}

/// Teachers edit learner profiles in their own sections; account fields stay admin-only.
fn require_teacher_edit(
    actor: &Actor,
    target: &UserRecord,
    patch: &serde_json::Value,
) -> Result<(), HandlerErr> {
    if target.role != Role::Student
        || !actor.can_write_student(&target.id, target.section.as_deref())
    {
        return Err(HandlerErr::forbidden("you may not edit this user"));
    }
    if let Some(key) = ADMIN_ONLY_FIELDS.iter().find(|k| patch.get(**k).is_some()) {
        return Err(HandlerErr::forbidden(format!("only admins may change {}", key)));
    }
    if let Some(section) = patch.get("section").and_then(|v| v.as_str()) {
        if !actor.can_write_student(&target.id, Some(section)) {
            return Err(HandlerErr::forbidden("you may not move a learner out of your sections"));
        }
    }
    Ok(())
}

fn users_update(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    if !ctx.actor.is_staff() {
        return Err(HandlerErr::forbidden("only teachers and admins may edit users"));
    }
    let user_id = get_required_str(params, "id")?;
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("missing/invalid patch"));
    };
    let target = load_user(ctx.conn, &user_id)?.ok_or_else(|| HandlerErr::not_found("user"))?;
    if ctx.actor.role != Role::Admin {
        require_teacher_edit(ctx.actor, &target, patch)?;
    }

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if patch.get("name").is_some() {
        let name = get_required_str(patch, "name")
            .map_err(|_| HandlerErr::bad_params("name must not be empty"))?;
        set_parts.push("name = ?".into());
        bind_values.push(Value::Text(name));
    }
    if let Some(v) = patch.get("role") {
        let role = v
            .as_str()
            .and_then(Role::parse)
            .ok_or_else(|| HandlerErr::bad_params("role must be student, teacher or admin"))?;
        if user_id == ctx.actor.user_id && role != Role::Admin {
            return Err(HandlerErr::bad_params("admins may not demote themselves"));
        }
        set_parts.push("role = ?".into());
        bind_values.push(Value::Text(role.as_str().to_string()));
    }
    if let Some(v) = patch.get("email") {
        match v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
            Some(email) => {
                if email_taken(ctx.conn, email, Some(&user_id))? {
                    return Err(HandlerErr::new("conflict", "email already in use"));
                }
                set_parts.push("email = ?".into());
                bind_values.push(Value::Text(email.to_string()));
            }
            None => {
                set_parts.push("email = NULL".into());
            }
        }
    }
    if let Some(v) = patch.get("sex") {
        match v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => {
                set_parts.push("sex = ?".into());
                bind_values.push(Value::Text(normalize_sex(s)?));
            }
            None => set_parts.push("sex = NULL".into()),
        }
    }
    if let Some(v) = patch.get("birthDate") {
        match v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => {
                set_parts.push("birth_date = ?".into());
                bind_values.push(Value::Text(parse_date(s)?.format("%Y-%m-%d").to_string()));
            }
            None => set_parts.push("birth_date = NULL".into()),
        }
    }
    if let Some(v) = patch.get("assignedSections") {
        let sections = parse_sections_param(v)?;
        set_parts.push("assigned_sections = ?".into());
        bind_values.push(Value::Text(
            serde_json::to_string(&sections).map_err(|e| HandlerErr::bad_params(e.to_string()))?,
        ));
    }
    for (key, column) in PROFILE_FIELDS {
        let Some(v) = patch.get(key) else { continue };
        if v.is_null() {
            set_parts.push(format!("{} = NULL", column));
            continue;
        }
        let Some(s) = v.as_str() else {
            return Err(HandlerErr::bad_params(format!("patch.{} must be a string", key)));
        };
        let s = s.trim();
        if s.is_empty() {
            set_parts.push(format!("{} = NULL", column));
        } else {
            set_parts.push(format!("{} = ?", column));
            bind_values.push(Value::Text(s.to_string()));
        }
    }

    if set_parts.is_empty() {
        return Ok(json!({ "ok": true }));
    }
    set_parts.push("updated_at = ?".into());
    bind_values.push(Value::Text(db::now_timestamp()));
    bind_values.push(Value::Text(user_id.clone()));
    ctx.conn
        .execute(
            &format!("UPDATE users SET {} WHERE id = ?", set_parts.join(", ")),
            params_from_iter(bind_values),
        )
        .map_err(|e| HandlerErr::update("users", e))?;
    Ok(json!({ "ok": true }))
}

fn users_delete(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(ctx.actor)?;
    let user_id = get_required_str(params, "id")?;
    require_confirm(params)?;
    if user_id == ctx.actor.user_id {
        return Err(HandlerErr::bad_params("you cannot delete your own account"));
    }
    if load_user(ctx.conn, &user_id)?.is_none() {
        return Err(HandlerErr::not_found("user"));
    }

    let tx = ctx
        .conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let grades = tx
        .execute("DELETE FROM grade_records WHERE student_id = ?", [&user_id])
        .map_err(|e| HandlerErr::update("grade_records", e))?;
    let attendance = tx
        .execute("DELETE FROM attendance_records WHERE student_id = ?", [&user_id])
        .map_err(|e| HandlerErr::update("attendance_records", e))?;
    tx.execute("DELETE FROM users WHERE id = ?", [&user_id])
        .map_err(|e| HandlerErr::update("users", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    info!(user_id = %user_id, grades, attendance, "user deleted");
    Ok(json!({
        "ok": true,
        "deletedGrades": grades,
        "deletedAttendance": attendance
    }))
}

fn users_set_password(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "id")?;
    if user_id != ctx.actor.user_id {
        require_admin(ctx.actor)?;
    }
    let password = params
        .get("password")
        .and_then(|v| v.as_str())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| HandlerErr::bad_params("missing password"))?;
    if load_user(ctx.conn, &user_id)?.is_none() {
        return Err(HandlerErr::not_found("user"));
    }
    let salt = auth::new_salt();
    let hash = auth::hash_password(&salt, password);
    ctx.conn
        .execute(
            "UPDATE users SET password_hash = ?, password_salt = ?, updated_at = ? WHERE id = ?",
            (&hash, &salt, db::now_timestamp(), &user_id),
        )
        .map_err(|e| HandlerErr::update("users", e))?;
    Ok(json!({ "ok": true }))
}

fn handle_users_create(state: &AppState, req: &Request) -> serde_json::Value {
    let result = require_db(state)
        .and_then(|conn| users_create(conn, state.session.as_ref(), &req.params));
    respond(req, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(with_session(state, req, users_list)),
        "users.get" => Some(with_session(state, req, users_get)),
        "users.create" => Some(handle_users_create(state, req)),
        "users.update" => Some(with_session(state, req, users_update)),
        "users.delete" => Some(with_session(state, req, users_delete)),
        "users.setPassword" => Some(with_session(state, req, users_set_password)),
        _ => None,
    }
}
