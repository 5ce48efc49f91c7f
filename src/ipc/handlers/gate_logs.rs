use serde_json::Value;

use crate::auth::{Role, STAFF};
use crate::error::{AppError, AppResult};
use crate::ipc::guard::{self, Access, Ctx, Handler};
use crate::ipc::handlers::crud::{self, Feature, Owner};
use crate::ipc::helpers::get_object;
use crate::ipc::types::{AppState, Request};
use crate::store;
use crate::tables::{DUTIES, GATE_LOGS};

const ON_DUTY: &[Role] = &[Role::Admin, Role::Faculty, Role::Prefect];

static FEATURE: Feature = Feature {
    def: &GATE_LOGS,
    owner: Some(Owner::Column("prefectId")),
    stamp: Some("recordedBy"),
    locked: &["recordedBy"],
    staff_only: &[],
    names: &[
        ("prefectId", "prefectName"),
        ("recordedBy", "recordedByName"),
    ],
};

fn handle_list(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    crud::list(ctx, &FEATURE, params)
}

fn handle_get(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    crud::get(ctx, &FEATURE, params)
}

/// A prefect logging against a duty must be one of the duty's prefects.
fn handle_create(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    if !ctx.caller.is_staff() {
        let values = get_object(params, "values")?;
        if let Some(duty_id) = values
            .get("dutyId")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
        {
            let duty = store::get(ctx.conn, &DUTIES, duty_id)
                .map_err(|_| AppError::validation("dutyId", "refers to a missing record"))?;
            let assigned = duty
                .get("prefectIds")
                .and_then(|v| v.as_array())
                .map(|ids| ids.iter().any(|id| id.as_str() == Some(ctx.caller.user_id.as_str())))
                .unwrap_or(false);
            if !assigned {
                return Err(AppError::validation("dutyId", "is not assigned to you"));
            }
        }
    }
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

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let (access, handler): (Access, Handler) = match req.method.as_str() {
        "gateLogs.list" => (Access::AnyOf(ON_DUTY), handle_list),
        "gateLogs.get" => (Access::AnyOf(ON_DUTY), handle_get),
        "gateLogs.stats" => (Access::AnyOf(ON_DUTY), handle_stats),
        "gateLogs.create" => (Access::AnyOf(ON_DUTY), handle_create),
        "gateLogs.update" => (Access::AnyOf(STAFF), handle_update),
        "gateLogs.delete" => (Access::AnyOf(STAFF), handle_delete),
        _ => return None,
    };
    Some(guard::dispatch(state, req, access, handler))
}
