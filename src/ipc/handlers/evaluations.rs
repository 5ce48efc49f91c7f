use serde_json::{json, Value};

use crate::auth::{self, Role, STAFF};
use crate::error::{AppError, AppResult};
use crate::ipc::guard::{self, Access, Ctx, Handler};
use crate::ipc::handlers::crud::{self, Feature, Owner};
use crate::ipc::helpers::{get_object, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::ListQuery;
use crate::tables::EVALUATIONS;

const READERS: &[Role] = &[Role::Admin, Role::Faculty, Role::Prefect];

static FEATURE: Feature = Feature {
    def: &EVALUATIONS,
    owner: Some(Owner::Column("prefectId")),
    stamp: Some("evaluatorId"),
    locked: &["evaluatorId"],
    staff_only: &[],
    names: &[
        ("prefectId", "prefectName"),
        ("evaluatorId", "evaluatorName"),
    ],
};

fn ensure_prefect(ctx: &Ctx<'_>, input: &serde_json::Map<String, Value>) -> AppResult<()> {
    if let Some(id) = input.get("prefectId").and_then(|v| v.as_str()) {
        if !auth::roles_for(ctx.conn, id)?.contains(&Role::Prefect) {
            return Err(AppError::validation("prefectId", "is not a prefect"));
        }
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
    ensure_prefect(ctx, &get_object(params, "values")?)?;
    crud::create(ctx, &FEATURE, params)
}

fn handle_update(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    ensure_prefect(ctx, &get_object(params, "patch")?)?;
    crud::update(ctx, &FEATURE, params)
}

fn handle_delete(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    crud::delete(ctx, &FEATURE, params)
}

fn handle_stats(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    crud::stats(ctx, &FEATURE, params)
}

/// Average overall score of one prefect across their evaluations.
fn handle_summary(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    let prefect_id = get_required_str(params, "prefectId")?;
    let query = ListQuery {
        filters: vec![("prefectId".to_string(), json!(prefect_id))],
        limit: usize::MAX,
        ..ListQuery::default()
    };
    let rows = FEATURE.visible_rows(ctx, &query)?;
    let scores: Vec<f64> = rows
        .iter()
        .filter_map(|r| r.get("overallScore").and_then(|v| v.as_f64()))
        .collect();
    let average = if scores.is_empty() {
        None
    } else {
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        Some((mean * 100.0).round() / 100.0)
    };
    Ok(json!({
        "prefectId": prefect_id,
        "evaluationCount": rows.len(),
        "averageScore": average,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let (access, handler): (Access, Handler) = match req.method.as_str() {
        "evaluations.list" => (Access::AnyOf(READERS), handle_list),
        "evaluations.get" => (Access::AnyOf(READERS), handle_get),
        "evaluations.stats" => (Access::AnyOf(READERS), handle_stats),
        "evaluations.summary" => (Access::AnyOf(READERS), handle_summary),
        "evaluations.create" => (Access::AnyOf(STAFF), handle_create),
        "evaluations.update" => (Access::AnyOf(STAFF), handle_update),
        "evaluations.delete" => (Access::AnyOf(STAFF), handle_delete),
        _ => return None,
    };
    Some(guard::dispatch(state, req, access, handler))
}
