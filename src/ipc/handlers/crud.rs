//! The list/get/create/update/delete/stats contract every feature table
//! shares. Feature modules describe ownership and server-managed fields and
//! delegate here.

use serde_json::{json, Value};

use crate::auth::Caller;
use crate::error::{AppError, AppResult};
use crate::ipc::guard::Ctx;
use crate::ipc::helpers::{get_object, get_required_str};
use crate::store::{self, ListQuery, ProfileDirectory, Row, TableDef};

#[derive(Debug, Clone, Copy)]
pub enum Owner {
    /// Key holding a single profile id.
    Column(&'static str),
    /// Key holding a list of profile ids.
    PrefectList(&'static str),
}

pub struct Feature {
    pub def: &'static TableDef,
    /// Non-staff callers only see rows they own.
    pub owner: Option<Owner>,
    /// Key set to the caller's id on create.
    pub stamp: Option<&'static str>,
    /// Keys clients may not write directly.
    pub locked: &'static [&'static str],
    /// Keys only staff may write.
    pub staff_only: &'static [&'static str],
    /// `(id key, name key)` pairs resolved against profiles on output.
    pub names: &'static [(&'static str, &'static str)],
}

impl Feature {
    pub fn owns(&self, caller: &Caller, row: &Row) -> bool {
        match self.owner {
            None => false,
            Some(Owner::Column(key)) => {
                row.get(key).and_then(|v| v.as_str()) == Some(caller.user_id.as_str())
            }
            Some(Owner::PrefectList(key)) => row
                .get(key)
                .and_then(|v| v.as_array())
                .map(|ids| ids.iter().any(|v| v.as_str() == Some(caller.user_id.as_str())))
                .unwrap_or(false),
        }
    }

    pub fn visible(&self, caller: &Caller, row: &Row) -> bool {
        self.owner.is_none() || caller.is_staff() || self.owns(caller, row)
    }

    fn owner_key(&self) -> Option<&'static str> {
        match self.owner {
            Some(Owner::Column(k)) | Some(Owner::PrefectList(k)) => Some(k),
            None => None,
        }
    }

    pub fn check_writable(&self, caller: &Caller, input: &Row) -> AppResult<()> {
        for key in self.locked {
            if input.contains_key(*key) {
                return Err(AppError::validation(key, "is managed by the server"));
            }
        }
        if !caller.is_staff() {
            for key in self.staff_only {
                if input.contains_key(*key) {
                    return Err(AppError::validation(key, "can only be set by staff"));
                }
            }
        }
        Ok(())
    }

    pub fn annotate(&self, dir: &ProfileDirectory, mut row: Row) -> Row {
        dir.annotate(&mut row, self.names);
        row
    }

    /// Load a row the caller is allowed to see.
    pub fn load_visible(&self, ctx: &Ctx<'_>, id: &str) -> AppResult<Row> {
        let row = store::get(ctx.conn, self.def, id)?;
        if !self.visible(ctx.caller, &row) {
            return Err(AppError::Forbidden(format!(
                "this {} belongs to someone else",
                self.def.entity
            )));
        }
        Ok(row)
    }

    pub fn visible_rows(&self, ctx: &Ctx<'_>, query: &ListQuery) -> AppResult<Vec<Row>> {
        store::list(ctx.conn, self.def, query, |row| self.visible(ctx.caller, row))
    }
}

pub fn list(ctx: &Ctx<'_>, f: &Feature, params: &Value) -> AppResult<Value> {
    let query = ListQuery::from_params(f.def, params)?;
    let rows = f.visible_rows(ctx, &query)?;
    let dir = ProfileDirectory::load(ctx.conn)?;
    let rows: Vec<Row> = rows.into_iter().map(|r| f.annotate(&dir, r)).collect();
    Ok(json!({ "total": rows.len(), "rows": rows }))
}

pub fn get(ctx: &Ctx<'_>, f: &Feature, params: &Value) -> AppResult<Value> {
    let id = get_required_str(params, "id")?;
    let row = f.load_visible(ctx, &id)?;
    let dir = ProfileDirectory::load(ctx.conn)?;
    Ok(json!({ "row": f.annotate(&dir, row) }))
}

pub fn create(ctx: &Ctx<'_>, f: &Feature, params: &Value) -> AppResult<Value> {
    let mut values = get_object(params, "values")?;
    f.check_writable(ctx.caller, &values)?;
    if let Some(stamp) = f.stamp {
        values.insert(stamp.to_string(), json!(ctx.caller.user_id));
    }
    if !ctx.caller.is_staff() {
        if let Some(Owner::Column(key)) = f.owner {
            values.insert(key.to_string(), json!(ctx.caller.user_id));
        }
    }
    let row = store::insert(ctx.conn, f.def, &values)?;
    tracing::info!(
        table = f.def.table,
        id = row.get("id").and_then(|v| v.as_str()).unwrap_or(""),
        user_id = %ctx.caller.user_id,
        "row created"
    );
    let dir = ProfileDirectory::load(ctx.conn)?;
    Ok(json!({ "row": f.annotate(&dir, row) }))
}

pub fn update(ctx: &Ctx<'_>, f: &Feature, params: &Value) -> AppResult<Value> {
    let id = get_required_str(params, "id")?;
    let patch = get_object(params, "patch")?;
    f.check_writable(ctx.caller, &patch)?;
    f.load_visible(ctx, &id)?;
    if !ctx.caller.is_staff() {
        if let Some(key) = f.owner_key() {
            if patch.contains_key(key) {
                return Err(AppError::validation(key, "cannot be reassigned"));
            }
        }
    }
    let row = store::update(ctx.conn, f.def, &id, &patch)?;
    tracing::info!(table = f.def.table, id = %id, user_id = %ctx.caller.user_id, "row updated");
    let dir = ProfileDirectory::load(ctx.conn)?;
    Ok(json!({ "row": f.annotate(&dir, row) }))
}

pub fn delete(ctx: &Ctx<'_>, f: &Feature, params: &Value) -> AppResult<Value> {
    let id = get_required_str(params, "id")?;
    f.load_visible(ctx, &id)?;
    store::delete(ctx.conn, f.def, &id)?;
    tracing::info!(table = f.def.table, id = %id, user_id = %ctx.caller.user_id, "row deleted");
    Ok(json!({ "id": id, "deleted": true }))
}

pub fn stats(ctx: &Ctx<'_>, f: &Feature, _params: &Value) -> AppResult<Value> {
    let query = ListQuery {
        limit: usize::MAX,
        ..ListQuery::default()
    };
    let rows = f.visible_rows(ctx, &query)?;
    Ok(store::stats(f.def, &rows))
}
