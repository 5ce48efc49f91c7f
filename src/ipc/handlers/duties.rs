use serde_json::{json, Value};

use crate::auth::{Role, STAFF};
use crate::error::{AppError, AppResult};
use crate::ipc::guard::{self, Access, Ctx, Handler};
use crate::ipc::handlers::crud::{self, Feature, Owner};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use crate::store::{self, ProfileDirectory, Row};
use crate::tables::DUTIES;

const ON_DUTY: &[Role] = &[Role::Admin, Role::Faculty, Role::Prefect];

static FEATURE: Feature = Feature {
    def: &DUTIES,
    owner: Some(Owner::PrefectList("prefectIds")),
    stamp: Some("assignedBy"),
    locked: &["assignedBy"],
    staff_only: &[],
    names: &[
        ("prefectIds", "prefectNames"),
        ("assignedBy", "assignedByName"),
    ],
};

fn handle_list(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    crud::list(ctx, &FEATURE, params)
}

fn handle_get(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    crud::get(ctx, &FEATURE, params)
}

fn handle_create(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    crud::create(ctx, &FEATURE, params)
}

fn handle_update(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    crud::update(ctx, &FEATURE, params)
}

fn handle_delete(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    crud::delete(ctx, &FEATURE, params)
}

fn handle_stats(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    crud::stats(ctx, &FEATURE, params)
}

/// Prefects may only move their own assigned duties to completed; staff may
/// set any status.
fn handle_update_status(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    let id = get_required_str(params, "id")?;
    let status = get_required_str(params, "status")?;
    let current = FEATURE.load_visible(ctx, &id)?;
    if !ctx.caller.is_staff() {
        if status != "completed" {
            return Err(AppError::Forbidden(
                "prefects can only mark duties completed".into(),
            ));
        }
        if current.get("status").and_then(|v| v.as_str()) != Some("assigned") {
            return Err(AppError::Conflict(
                "only assigned duties can be completed".into(),
            ));
        }
    }

    let mut patch = Row::new();
    patch.insert("status".into(), json!(status));
    let row = store::update(ctx.conn, &DUTIES, &id, &patch)?;
    tracing::info!(id = %id, status = %status, user_id = %ctx.caller.user_id, "duty status changed");

    let dir = ProfileDirectory::load(ctx.conn)?;
    Ok(json!({ "row": FEATURE.annotate(&dir, row) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let (access, handler): (Access, Handler) = match req.method.as_str() {
        "duties.list" => (Access::AnyOf(ON_DUTY), handle_list),
        "duties.get" => (Access::AnyOf(ON_DUTY), handle_get),
        "duties.stats" => (Access::AnyOf(ON_DUTY), handle_stats),
        "duties.updateStatus" => (Access::AnyOf(ON_DUTY), handle_update_status),
        "duties.create" => (Access::AnyOf(STAFF), handle_create),
        "duties.update" => (Access::AnyOf(STAFF), handle_update),
        "duties.delete" => (Access::AnyOf(STAFF), handle_delete),
        _ => return None,
    };
    Some(guard::dispatch(state, req, access, handler))
}
