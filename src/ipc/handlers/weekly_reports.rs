use serde_json::{json, Value};

use crate::auth::{Role, STAFF};
use crate::error::{AppError, AppResult};
use crate::ipc::guard::{self, Access, Ctx, Handler};
use crate::ipc::handlers::crud::{self, Feature, Owner};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use crate::store::{self, ProfileDirectory, Row};
use crate::tables::WEEKLY_REPORTS;

const READERS: &[Role] = &[Role::Admin, Role::Faculty, Role::Prefect];
const AUTHORS: &[Role] = &[Role::Prefect];

static FEATURE: Feature = Feature {
    def: &WEEKLY_REPORTS,
    owner: Some(Owner::Column("prefectId")),
    stamp: Some("prefectId"),
    locked: &["prefectId", "status", "feedback", "reviewedBy"],
    staff_only: &[],
    names: &[
        ("prefectId", "prefectName"),
        ("reviewedBy", "reviewedByName"),
    ],
};

fn status_of(row: &Row) -> &str {
    row.get("status").and_then(|v| v.as_str()).unwrap_or("")
}

fn load_own_draft(ctx: &Ctx<'_>, id: &str) -> AppResult<Row> {
    let row = FEATURE.load_visible(ctx, id)?;
    if !FEATURE.owns(ctx.caller, &row) {
        return Err(AppError::Forbidden("only the author can change a report".into()));
    }
    if status_of(&row) != "draft" {
        return Err(AppError::Conflict("report has already been submitted".into()));
    }
    Ok(row)
}

fn set_status(ctx: &Ctx<'_>, id: &str, mut patch: Row, status: &str) -> AppResult<Value> {
    patch.insert("status".into(), json!(status));
    let row = store::update(ctx.conn, &WEEKLY_REPORTS, id, &patch)?;
    tracing::info!(id = %id, status, user_id = %ctx.caller.user_id, "weekly report status changed");
    let dir = ProfileDirectory::load(ctx.conn)?;
    Ok(json!({ "row": FEATURE.annotate(&dir, row) }))
}

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
    load_own_draft(ctx, &get_required_str(params, "id")?)?;
    crud::update(ctx, &FEATURE, params)
}

fn handle_delete(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    let id = get_required_str(params, "id")?;
    if !ctx.caller.is_staff() {
        load_own_draft(ctx, &id)?;
    }
    crud::delete(ctx, &FEATURE, params)
}

fn handle_stats(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    crud::stats(ctx, &FEATURE, params)
}

fn handle_submit(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    let id = get_required_str(params, "id")?;
    load_own_draft(ctx, &id)?;
    set_status(ctx, &id, Row::new(), "submitted")
}

fn handle_review(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    let id = get_required_str(params, "id")?;
    let feedback = get_required_str(params, "feedback")
        .map_err(|_| AppError::validation("feedback", "is required"))?;
    let row = store::get(ctx.conn, &WEEKLY_REPORTS, &id)?;
    if status_of(&row) != "submitted" {
        return Err(AppError::Conflict("only submitted reports can be reviewed".into()));
    }
    let mut patch = Row::new();
    patch.insert("feedback".into(), json!(feedback));
    patch.insert("reviewedBy".into(), json!(ctx.caller.user_id));
    set_status(ctx, &id, patch, "reviewed")
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let (access, handler): (Access, Handler) = match req.method.as_str() {
        "weeklyReports.list" => (Access::AnyOf(READERS), handle_list),
        "weeklyReports.get" => (Access::AnyOf(READERS), handle_get),
        "weeklyReports.stats" => (Access::AnyOf(READERS), handle_stats),
        "weeklyReports.delete" => (Access::AnyOf(READERS), handle_delete),
        "weeklyReports.create" => (Access::AnyOf(AUTHORS), handle_create),
        "weeklyReports.update" => (Access::AnyOf(AUTHORS), handle_update),
        "weeklyReports.submit" => (Access::AnyOf(AUTHORS), handle_submit),
        "weeklyReports.review" => (Access::AnyOf(STAFF), handle_review),
        _ => return None,
    };
    Some(guard::dispatch(state, req, access, handler))
}
