//! Sign-up and sign-in are public; everything else here needs a session.

use serde_json::{json, Value};

use crate::auth::{self, Caller, Session};
use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::guard::{self, Access, Ctx, Handler};
use crate::ipc::helpers::{get_optional_str, get_required_str, get_secret};
use crate::ipc::types::{AppState, Request};

fn signed_in(caller: &Caller, session: &Session) -> Value {
    json!({ "session": session.to_json(), "user": caller.to_json() })
}

fn handle_sign_up(state: &AppState, params: &Value) -> AppResult<Value> {
    let conn = state.db.as_ref().ok_or(AppError::NoWorkspace)?;
    let email = get_required_str(params, "email")?;
    let password = get_secret(params, "password")?;
    let full_name = get_optional_str(params, "fullName").unwrap_or_default();
    let (caller, session) = auth::sign_up(conn, &state.config, &email, &password, &full_name)?;
    Ok(signed_in(&caller, &session))
}

fn handle_sign_in(state: &AppState, params: &Value) -> AppResult<Value> {
    let conn = state.db.as_ref().ok_or(AppError::NoWorkspace)?;
    let email = get_required_str(params, "email")?;
    let password = get_secret(params, "password")?;
    let (caller, session) = auth::sign_in(conn, &state.config, &email, &password)?;
    Ok(signed_in(&caller, &session))
}

fn handle_sign_out(ctx: &Ctx<'_>, _params: &Value) -> AppResult<Value> {
    auth::sign_out(ctx.conn, &ctx.caller.token)?;
    tracing::info!(user_id = %ctx.caller.user_id, "signed out");
    Ok(json!({ "signedOut": true }))
}

fn handle_session(ctx: &Ctx<'_>, _params: &Value) -> AppResult<Value> {
    Ok(json!({ "user": ctx.caller.to_json() }))
}

fn handle_change_password(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    let current = get_secret(params, "currentPassword")?;
    let next = get_secret(params, "newPassword")?;
    auth::change_password(ctx.conn, ctx.config, ctx.caller, &current, &next)?;
    Ok(json!({ "changed": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let (access, handler): (Access, Handler) = match req.method.as_str() {
        "auth.signUp" => {
            return Some(respond(&req.id, &req.method, handle_sign_up(state, &req.params)))
        }
        "auth.signIn" => {
            return Some(respond(&req.id, &req.method, handle_sign_in(state, &req.params)))
        }
        "auth.signOut" => (Access::Authenticated, handle_sign_out),
        "auth.session" => (Access::Authenticated, handle_session),
        "auth.changePassword" => (Access::Authenticated, handle_change_password),
        _ => return None,
    };
    Some(guard::dispatch(state, req, access, handler))
}
