//! Session and role checks that run before any protected handler.

use rusqlite::Connection;
use serde_json::Value;

use crate::auth::{self, Caller, Role};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone, Copy)]
pub enum Access {
    Authenticated,
    AnyOf(&'static [Role]),
}

impl Access {
    pub fn allows(self, caller: &Caller) -> bool {
        match self {
            Access::Authenticated => true,
            Access::AnyOf(roles) => caller.has_any(roles),
        }
    }
}

/// What a protected handler gets to work with.
pub struct Ctx<'a> {
    pub conn: &'a Connection,
    pub caller: &'a Caller,
    pub config: &'a Config,
}

pub type Handler = fn(&Ctx<'_>, &Value) -> AppResult<Value>;

pub fn authorize(state: &AppState, req: &Request, access: Access) -> AppResult<Caller> {
    let conn = state.db.as_ref().ok_or(AppError::NoWorkspace)?;
    let token = req
        .session
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Unauthenticated)?;
    let caller = auth::lookup_session(conn, token)?.ok_or(AppError::Unauthenticated)?;
    if !access.allows(&caller) {
        return Err(AppError::Forbidden(format!(
            "{} is not available to the {} role",
            req.method,
            caller.primary_role().as_str()
        )));
    }
    Ok(caller)
}

pub fn dispatch(state: &AppState, req: &Request, access: Access, handler: Handler) -> Value {
    let result = authorize(state, req, access).and_then(|caller| {
        let conn = state.db.as_ref().ok_or(AppError::NoWorkspace)?;
        let ctx = Ctx {
            conn,
            caller: &caller,
            config: &state.config,
        };
        handler(&ctx, &req.params)
    });
    respond(&req.id, &req.method, result)
}
