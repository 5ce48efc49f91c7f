use serde_json::Value;

use crate::auth::STAFF;
use crate::error::AppResult;
use crate::ipc::guard::{self, Access, Ctx, Handler};
use crate::ipc::handlers::crud::{self, Feature, Owner};
use crate::ipc::types::{AppState, Request};
use crate::tables::COMPLAINTS;

static FEATURE: Feature = Feature {
    def: &COMPLAINTS,
    owner: Some(Owner::Column("submittedBy")),
    stamp: Some("submittedBy"),
    locked: &["submittedBy"],
    staff_only: &["status", "assignedTo", "resolution"],
    names: &[
        ("submittedBy", "submittedByName"),
        ("assignedTo", "assignedToName"),
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

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let (access, handler): (Access, Handler) = match req.method.as_str() {
        "complaints.list" => (Access::Authenticated, handle_list),
        "complaints.get" => (Access::Authenticated, handle_get),
        "complaints.stats" => (Access::Authenticated, handle_stats),
        "complaints.create" => (Access::Authenticated, handle_create),
        "complaints.update" => (Access::AnyOf(STAFF), handle_update),
        "complaints.delete" => (Access::AnyOf(STAFF), handle_delete),
        _ => return None,
    };
    Some(guard::dispatch(state, req, access, handler))
}
