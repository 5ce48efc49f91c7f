use serde_json::{json, Value};

use crate::auth::{self, Role, STAFF};
use crate::db::now_rfc3339;
use crate::error::{AppError, AppResult};
use crate::ipc::guard::{self, Access, Ctx, Handler};
use crate::ipc::handlers::crud::{self, Feature, Owner};
use crate::ipc::helpers::{get_optional_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, ProfileDirectory, Row};
use crate::tables::APPLICATIONS;

static FEATURE: Feature = Feature {
    def: &APPLICATIONS,
    owner: Some(Owner::Column("applicantId")),
    stamp: Some("applicantId"),
    locked: &[
        "applicantId",
        "status",
        "reviewedBy",
        "reviewedAt",
        "reviewNotes",
    ],
    staff_only: &[],
    names: &[
        ("applicantId", "applicantName"),
        ("reviewedBy", "reviewedByName"),
    ],
};

fn status_of(row: &Row) -> &str {
    row.get("status").and_then(|v| v.as_str()).unwrap_or("")
}

/// Applicants may change or withdraw an application until it is reviewed.
fn ensure_pending_for_applicant(ctx: &Ctx<'_>, id: &str) -> AppResult<()> {
    let row = FEATURE.load_visible(ctx, id)?;
    if !ctx.caller.is_staff() && status_of(&row) != "pending" {
        return Err(AppError::Conflict(
            "application has already been reviewed".into(),
        ));
    }
    Ok(())
}

fn handle_list(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    crud::list(ctx, &FEATURE, params)
}

fn handle_get(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    crud::get(ctx, &FEATURE, params)
}

fn handle_create(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    if ctx.caller.roles.contains(&Role::Prefect) {
        return Err(AppError::Conflict("you are already a prefect".into()));
    }
    let pending: i64 = ctx.conn.query_row(
        "SELECT COUNT(*) FROM prefect_applications WHERE applicant_id = ? AND status = 'pending'",
        [&ctx.caller.user_id],
        |r| r.get(0),
    )?;
    if pending > 0 {
        return Err(AppError::Conflict(
            "you already have a pending application".into(),
        ));
    }
    crud::create(ctx, &FEATURE, params)
}

fn handle_update(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    ensure_pending_for_applicant(ctx, &get_required_str(params, "id")?)?;
    crud::update(ctx, &FEATURE, params)
}

fn handle_delete(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    ensure_pending_for_applicant(ctx, &get_required_str(params, "id")?)?;
    crud::delete(ctx, &FEATURE, params)
}

fn handle_stats(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    crud::stats(ctx, &FEATURE, params)
}

/// Approving an application grants the applicant the prefect role.
fn handle_review(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    let id = get_required_str(params, "id")?;
    let decision = get_required_str(params, "status")?;
    if decision != "approved" && decision != "rejected" {
        return Err(AppError::validation("status", "must be approved or rejected"));
    }
    let existing = store::get(ctx.conn, &APPLICATIONS, &id)?;
    if status_of(&existing) != "pending" {
        return Err(AppError::Conflict(
            "application has already been reviewed".into(),
        ));
    }
    let applicant = existing
        .get("applicantId")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut patch = Row::new();
    patch.insert("status".into(), json!(decision));
    patch.insert("reviewedBy".into(), json!(ctx.caller.user_id));
    patch.insert("reviewedAt".into(), json!(now_rfc3339()));
    patch.insert(
        "reviewNotes".into(),
        json!(get_optional_str(params, "reviewNotes")),
    );

    let tx = ctx.conn.unchecked_transaction()?;
    let row = store::update(&tx, &APPLICATIONS, &id, &patch)?;
    if decision == "approved" {
        auth::grant_role(&tx, &applicant, Role::Prefect)?;
    }
    tx.commit()?;
    tracing::info!(
        id = %id,
        applicant = %applicant,
        decision = %decision,
        user_id = %ctx.caller.user_id,
        "application reviewed"
    );

    let dir = ProfileDirectory::load(ctx.conn)?;
    Ok(json!({ "row": FEATURE.annotate(&dir, row) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let (access, handler): (Access, Handler) = match req.method.as_str() {
        "applications.list" => (Access::Authenticated, handle_list),
        "applications.get" => (Access::Authenticated, handle_get),
        "applications.stats" => (Access::Authenticated, handle_stats),
        "applications.create" => (Access::Authenticated, handle_create),
        "applications.update" => (Access::Authenticated, handle_update),
        "applications.delete" => (Access::Authenticated, handle_delete),
        "applications.review" => (Access::AnyOf(STAFF), handle_review),
        _ => return None,
    };
    Some(guard::dispatch(state, req, access, handler))
}
