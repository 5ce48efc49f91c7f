use serde_json::{json, Value};

use crate::auth::{ADMIN_ONLY, STAFF};
use crate::error::{AppError, AppResult};
use crate::ipc::guard::{self, Access, Ctx, Handler};
use crate::ipc::handlers::crud::{self, Feature};
use crate::ipc::helpers::{get_object, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::prefect_ids;
use crate::store;
use crate::tables::PROFILES;

static FEATURE: Feature = Feature {
    def: &PROFILES,
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

fn handle_me(ctx: &Ctx<'_>, _params: &Value) -> AppResult<Value> {
    let row = store::get(ctx.conn, &PROFILES, &ctx.caller.user_id)?;
    Ok(json!({ "row": row, "user": ctx.caller.to_json() }))
}

fn handle_stats(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    crud::stats(ctx, &FEATURE, params)
}

/// Users edit their own profile; admins edit anyone's.
fn handle_update(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    let id = get_required_str(params, "id")?;
    if id != ctx.caller.user_id && !ctx.caller.has_any(ADMIN_ONLY) {
        return Err(AppError::Forbidden(
            "you can only edit your own profile".into(),
        ));
    }
    let patch = get_object(params, "patch")?;
    let row = store::update(ctx.conn, &PROFILES, &id, &patch)?;
    tracing::info!(id = %id, user_id = %ctx.caller.user_id, "profile updated");
    Ok(json!({ "row": row }))
}

/// Removes the account entirely. Fails with `conflict` while other records
/// still point at the profile.
fn handle_delete(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    let id = get_required_str(params, "id")?;
    if id == ctx.caller.user_id {
        return Err(AppError::Conflict("you cannot delete your own account".into()));
    }
    if !store::row_exists(ctx.conn, "profiles", &id)? {
        return Err(AppError::NotFound(PROFILES.entity.to_string()));
    }

    let tx = ctx.conn.unchecked_transaction()?;
    // duty_assignments.prefect_id carries no foreign key.
    let assigned = {
        let mut stmt = tx.prepare("SELECT prefect_id FROM duty_assignments")?;
        let raws = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        raws.iter().any(|raw| prefect_ids::contains(raw, &id))
    };
    if assigned {
        return Err(AppError::Conflict(
            "profile is still assigned to duties".into(),
        ));
    }
    tx.execute("DELETE FROM sessions WHERE user_id = ?", [&id])?;
    tx.execute("DELETE FROM user_roles WHERE user_id = ?", [&id])?;
    tx.execute("DELETE FROM profiles WHERE id = ?", [&id])?;
    tx.execute("DELETE FROM auth_users WHERE id = ?", [&id])?;
    tx.commit()?;
    tracing::info!(id = %id, user_id = %ctx.caller.user_id, "account deleted");

    Ok(json!({ "id": id, "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let (access, handler): (Access, Handler) = match req.method.as_str() {
        "profiles.list" => (Access::Authenticated, handle_list),
        "profiles.get" => (Access::Authenticated, handle_get),
        "profiles.me" => (Access::Authenticated, handle_me),
        "profiles.update" => (Access::Authenticated, handle_update),
        "profiles.stats" => (Access::AnyOf(STAFF), handle_stats),
        "profiles.delete" => (Access::AnyOf(ADMIN_ONLY), handle_delete),
        _ => return None,
    };
    Some(guard::dispatch(state, req, access, handler))
}
