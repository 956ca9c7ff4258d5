use crate::auth;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::handlers::users::{actor_for, load_user, UserRecord};
use crate::ipc::helpers::{get_required_str, require_db, respond, session_ctx};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::{info, warn};

/// Looks the user up by email and checks the password. Unknown emails and wrong
/// passwords are indistinguishable to the caller.
fn check_credentials(
    conn: &Connection,
    email: &str,
    password: &str,
) -> Result<UserRecord, HandlerErr> {
    let row: Option<(String, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT id, password_salt, password_hash FROM users
             WHERE lower(email) = lower(?)
             ORDER BY rowid LIMIT 1",
            [email],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let invalid = || HandlerErr::new("invalid_credentials", "wrong email or password");
    let Some((user_id, Some(salt), Some(hash))) = row else {
        return Err(invalid());
    };
    if !auth::verify_password(&salt, password, &hash) {
        return Err(invalid());
    }
    load_user(conn, &user_id)?.ok_or_else(invalid)
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = require_db(state).and_then(|conn| {
        let email = get_required_str(&req.params, "email")?;
        let password = req
            .params
            .get("password")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::bad_params("missing password"))?;
        match check_credentials(conn, &email, password) {
            Ok(user) => {
                info!(email = %email, role = user.role.as_str(), "login");
                Ok(user)
            }
            Err(e) => {
                warn!(email = %email, "login rejected");
                Err(e)
            }
        }
    });
    match result {
        Ok(user) => {
            state.session = Some(actor_for(&user));
            ok(&req.id, json!({ "user": user }))
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let was_logged_in = state.session.take().is_some();
    ok(&req.id, json!({ "ok": true, "wasLoggedIn": was_logged_in }))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = session_ctx(state).and_then(|ctx| {
        let user = load_user(ctx.conn, &ctx.actor.user_id)?
            .ok_or_else(|| HandlerErr::new("unauthenticated", "session user no longer exists"))?;
        Ok(json!({ "user": user }))
    });
    respond(req, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.whoami" => Some(handle_whoami(state, req)),
        _ => None,
    }
}
