//! User management: profiles joined with their role claims.

use serde_json::{json, Value};
use std::collections::HashMap;

use crate::auth::{self, Role, ADMIN_ONLY};
use crate::error::{AppError, AppResult};
use crate::ipc::guard::{self, Access, Ctx, Handler};
use crate::ipc::helpers::{get_optional_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, ListQuery};
use crate::tables::PROFILES;

fn parse_role(params: &Value) -> AppResult<Role> {
    let raw = get_required_str(params, "role")?;
    Role::parse(&raw).ok_or_else(|| {
        AppError::validation("role", "must be one of: admin, faculty, prefect, student")
    })
}

fn all_roles(ctx: &Ctx<'_>) -> AppResult<HashMap<String, Vec<Role>>> {
    let mut stmt = ctx.conn.prepare("SELECT user_id, role FROM user_roles")?;
    let pairs = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut by_user: HashMap<String, Vec<Role>> = HashMap::new();
    for (user_id, role) in pairs {
        if let Some(role) = Role::parse(&role) {
            by_user.entry(user_id).or_default().push(role);
        }
    }
    for roles in by_user.values_mut() {
        roles.sort();
        roles.reverse();
    }
    Ok(by_user)
}

fn role_names(roles: &[Role]) -> Vec<&'static str> {
    roles.iter().map(|r| r.as_str()).collect()
}

fn handle_users_list(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    let query = ListQuery::from_params(&PROFILES, params)?;
    let role_filter = match get_optional_str(params, "role") {
        Some(r) if r != "all" => Some(
            Role::parse(&r).ok_or_else(|| AppError::BadParams(format!("unknown role {}", r)))?,
        ),
        _ => None,
    };
    let roles = all_roles(ctx)?;

    let mut users = Vec::new();
    for mut row in store::list(ctx.conn, &PROFILES, &query, |_| true)? {
        let id = row.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let user_roles = roles.get(&id).cloned().unwrap_or_default();
        if let Some(want) = role_filter {
            if !user_roles.contains(&want) {
                continue;
            }
        }
        let primary = user_roles.first().copied().unwrap_or(Role::Student);
        row.insert("roles".into(), json!(role_names(&user_roles)));
        row.insert("primaryRole".into(), json!(primary.as_str()));
        users.push(row);
    }
    Ok(json!({ "total": users.len(), "rows": users }))
}

fn handle_roles_list(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    let user_id = get_optional_str(params, "userId");
    let mut stmt = ctx.conn.prepare(
        "SELECT r.id, r.user_id, r.role, r.created_at, p.full_name
         FROM user_roles r LEFT JOIN profiles p ON p.id = r.user_id
         WHERE (?1 IS NULL OR r.user_id = ?1)
         ORDER BY p.full_name, r.role",
    )?;
    let rows = stmt
        .query_map([&user_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "userId": r.get::<_, String>(1)?,
                "role": r.get::<_, String>(2)?,
                "createdAt": r.get::<_, String>(3)?,
                "userName": r.get::<_, Option<String>>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "total": rows.len(), "rows": rows }))
}

fn handle_roles_assign(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    let user_id = get_required_str(params, "userId")?;
    let role = parse_role(params)?;
    if !store::row_exists(ctx.conn, "profiles", &user_id)? {
        return Err(AppError::NotFound("user".into()));
    }
    let added = auth::grant_role(ctx.conn, &user_id, role)?;
    tracing::info!(target_user = %user_id, role = role.as_str(), added, user_id = %ctx.caller.user_id, "role assigned");
    Ok(json!({
        "userId": user_id,
        "roles": role_names(&auth::roles_for(ctx.conn, &user_id)?),
        "added": added,
    }))
}

fn handle_roles_remove(ctx: &Ctx<'_>, params: &Value) -> AppResult<Value> {
    let user_id = get_required_str(params, "userId")?;
    let role = parse_role(params)?;
    if role == Role::Admin {
        let admins: i64 = ctx.conn.query_row(
            "SELECT COUNT(*) FROM user_roles WHERE role = 'admin' AND user_id <> ?",
            [&user_id],
            |r| r.get(0),
        )?;
        if admins == 0 {
            return Err(AppError::Conflict("cannot remove the last admin".into()));
        }
    }
    let n = ctx.conn.execute(
        "DELETE FROM user_roles WHERE user_id = ? AND role = ?",
        (&user_id, role.as_str()),
    )?;
    if n == 0 {
        return Err(AppError::NotFound("role assignment".into()));
    }
    tracing::info!(target_user = %user_id, role = role.as_str(), user_id = %ctx.caller.user_id, "role removed");
    Ok(json!({
        "userId": user_id,
        "roles": role_names(&auth::roles_for(ctx.conn, &user_id)?),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let (access, handler): (Access, Handler) = match req.method.as_str() {
        "users.list" => (Access::AnyOf(ADMIN_ONLY), handle_users_list),
        "roles.list" => (Access::AnyOf(ADMIN_ONLY), handle_roles_list),
        "roles.assign" => (Access::AnyOf(ADMIN_ONLY), handle_roles_assign),
        "roles.remove" => (Access::AnyOf(ADMIN_ONLY), handle_roles_remove),
        _ => return None,
    };
    Some(guard::dispatch(state, req, access, handler))
}
