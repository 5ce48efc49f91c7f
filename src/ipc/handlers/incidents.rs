use serde_json::Value;

use crate::auth::{Role, STAFF};
use crate::error::AppResult;
use crate::ipc::guard::{self, Access, Ctx, Handler};
use crate::ipc::handlers::crud::{self, Feature, Owner};
use crate::ipc::types::{AppState, Request};
use crate::tables::INCIDENTS;

const REPORTERS: &[Role] = &[Role::Admin, Role::Faculty, Role::Prefect];

static FEATURE: Feature = Feature {
    def: &INCIDENTS,
    owner: Some(Owner::Column("reportedBy")),
    stamp: Some("reportedBy"),
    locked: &["reportedBy"],
    staff_only: &["status", "actionTaken"],
    names: &[("reportedBy", "reportedByName")],
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

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let (access, handler): (Access, Handler) = match req.method.as_str() {
        "incidents.list" => (Access::AnyOf(REPORTERS), handle_list),
        "incidents.get" => (Access::AnyOf(REPORTERS), handle_get),
        "incidents.stats" => (Access::AnyOf(REPORTERS), handle_stats),
        "incidents.create" => (Access::AnyOf(REPORTERS), handle_create),
        "incidents.update" => (Access::AnyOf(STAFF), handle_update),
        "incidents.delete" => (Access::AnyOf(STAFF), handle_delete),
        _ => return None,
    };
    Some(guard::dispatch(state, req, access, handler))
}
