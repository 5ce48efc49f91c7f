use serde_json::Value;

use crate::auth::{Role, STAFF};
use crate::error::AppResult;
use crate::ipc::guard::{self, Access, Ctx, Handler};
use crate::ipc::handlers::crud::{self, Feature};
use crate::ipc::types::{AppState, Request};
use crate::tables::TRAINING;

const READERS: &[Role] = &[Role::Admin, Role::Faculty, Role::Prefect];

static FEATURE: Feature = Feature {
    def: &TRAINING,
    owner: None,
    stamp: Some("uploadedBy"),
    locked: &["uploadedBy"],
    staff_only: &[],
    names: &[("uploadedBy", "uploadedByName")],
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
        "training.list" => (Access::AnyOf(READERS), handle_list),
        "training.get" => (Access::AnyOf(READERS), handle_get),
        "training.stats" => (Access::AnyOf(READERS), handle_stats),
        "training.create" => (Access::AnyOf(STAFF), handle_create),
        "training.update" => (Access::AnyOf(STAFF), handle_update),
        "training.delete" => (Access::AnyOf(STAFF), handle_delete),
        _ => return None,
    };
    Some(guard::dispatch(state, req, access, handler))
}
