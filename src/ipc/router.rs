use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::auth::try_handle,
    handlers::dashboard::try_handle,
    handlers::profiles::try_handle,
    handlers::users::try_handle,
    handlers::academic_years::try_handle,
    handlers::duties::try_handle,
    handlers::gate_logs::try_handle,
    handlers::events::try_handle,
    handlers::complaints::try_handle,
    handlers::incidents::try_handle,
    handlers::applications::try_handle,
    handlers::evaluations::try_handle,
    handlers::weekly_reports::try_handle,
    handlers::training::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(request_id = %req.id, method = %req.method, "request");
    for try_handle in HANDLERS {
        if let Some(resp) = try_handle(state, &req) {
            return resp;
        }
    }

    tracing::warn!(method = %req.method, "unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
