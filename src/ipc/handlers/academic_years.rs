use serde_json::{json, Value};

use crate::auth::ADMIN_ONLY;
use crate::db::now_rfc3339;
use crate::error::{AppError, AppResult};
use crate::ipc::guard::{self, Access, Ctx, Handler};
use crate::ipc::handlers::crud::{self, Feature};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use crate::store::{self, ListQuery};
use crate::tables::ACADEMIC_YEARS;

static FEATURE: Feature = Feature {
    def: &ACADEMIC_YEARS,
    owner: None,
    stamp: None,
    locked: &[],
    staff_only: &[],
    names: &[],
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

fn handle_current(ctx: &Ctx<'_>, _params: &Value) -> AppResult<Value> {
    let query = ListQuery {
        filters: vec![("isCurrent".to_string(), json!(true))],
        limit: 1,
        ..ListQuery::default()
    };
    let current = store::list(ctx.conn, &ACADEMIC_YEARS, &query, |_| true)?
        .into_iter()
        .next();
    Ok(json!({ "row": current }))
}

/// Exactly one year is current afterwards.
fn handle_set_current(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    let id = get_required_str(params, "id")?;
    if !store::row_exists(ctx.conn, ACADEMIC_YEARS.table, &id)? {
        return Err(AppError::NotFound(ACADEMIC_YEARS.entity.to_string()));
    }

    let now = now_rfc3339();
    let tx = ctx.conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE academic_years SET is_current = 0, updated_at = ? WHERE is_current <> 0",
        [&now],
    )?;
    tx.execute(
        "UPDATE academic_years SET is_current = 1, updated_at = ? WHERE id = ?",
        (&now, &id),
    )?;
    tx.commit()?;
    tracing::info!(id = %id, user_id = %ctx.caller.user_id, "current academic year changed");

    Ok(json!({ "row": store::get(ctx.conn, &ACADEMIC_YEARS, &id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let (access, handler): (Access, Handler) = match req.method.as_str() {
        "academicYears.list" => (Access::Authenticated, handle_list),
        "academicYears.get" => (Access::Authenticated, handle_get),
        "academicYears.stats" => (Access::Authenticated, handle_stats),
        "academicYears.current" => (Access::Authenticated, handle_current),
        "academicYears.create" => (Access::AnyOf(ADMIN_ONLY), handle_create),
        "academicYears.update" => (Access::AnyOf(ADMIN_ONLY), handle_update),
        "academicYears.delete" => (Access::AnyOf(ADMIN_ONLY), handle_delete),
        "academicYears.setCurrent" => (Access::AnyOf(ADMIN_ONLY), handle_set_current),
        _ => return None,
    };
    Some(guard::dispatch(state, req, access, handler))
}
