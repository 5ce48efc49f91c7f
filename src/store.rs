//! Generic row access for the feature tables.
//!
//! Each table is described once by a [`TableDef`]; the functions here turn
//! that description into SELECT/INSERT/UPDATE/DELETE statements, validate
//! incoming JSON field by field, and hand rows back as camelCase JSON maps.

use crate::db::now_rfc3339;
use crate::error::{AppError, AppResult};
use crate::prefect_ids;
use chrono::{NaiveDate, NaiveTime};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use uuid::Uuid;

pub type Row = Map<String, Value>;

const MAX_TEXT_LEN: usize = 5000;
pub const DEFAULT_LIST_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy)]
pub enum Kind {
    Text,
    Email,
    Url,
    Date,
    Time,
    Bool,
    /// Integer rating in 1..=5.
    Rating,
    /// Real value computed from other columns.
    Score,
    Choice(&'static [&'static str]),
    /// Id of a row in the named table.
    Ref(&'static str),
    /// One or more profile ids, see [`prefect_ids`].
    PrefectList,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub sql: &'static str,
    pub key: &'static str,
    pub kind: Kind,
    pub required: bool,
    pub writable: bool,
    pub default: Option<&'static str>,
}

impl Column {
    pub const fn new(sql: &'static str, key: &'static str, kind: Kind) -> Self {
        Column {
            sql,
            key,
            kind,
            required: false,
            writable: true,
            default: None,
        }
    }

    pub const fn required(self) -> Self {
        Column {
            required: true,
            ..self
        }
    }

    pub const fn read_only(self) -> Self {
        Column {
            writable: false,
            ..self
        }
    }

    pub const fn default_to(self, value: &'static str) -> Self {
        Column {
            default: Some(value),
            ..self
        }
    }
}

pub struct TableDef {
    pub table: &'static str,
    /// Singular noun used in error messages.
    pub entity: &'static str,
    pub columns: &'static [Column],
    /// Keys matched by the free-text search.
    pub search: &'static [&'static str],
    /// Keys accepted as equality filters.
    pub filters: &'static [&'static str],
    pub order_by: &'static str,
    /// Keys counted per value by `stats`.
    pub stats_by: &'static [&'static str],
    /// Cross-field rule run on the full row before it is written.
    pub check: Option<fn(&Row) -> AppResult<()>>,
    /// Fills read-only computed columns before the row is written.
    pub derive: Option<fn(&mut Row)>,
}

impl TableDef {
    pub fn column(&self, key: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.key == key)
    }

    fn select_sql(&self) -> String {
        let cols: Vec<&str> = self.columns.iter().map(|c| c.sql).collect();
        format!(
            "SELECT id, created_at, updated_at, {} FROM {}",
            cols.join(", "),
            self.table
        )
    }
}

#[derive(Debug, Clone)]
pub struct ListQuery {
    pub search: Option<String>,
    pub filters: Vec<(String, Value)>,
    pub limit: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            search: None,
            filters: Vec::new(),
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl ListQuery {
    pub fn from_params(def: &TableDef, params: &Value) -> AppResult<Self> {
        let search = params
            .get("search")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut filters = Vec::new();
        match params.get("filters") {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (k, v) in map {
                    if !def.filters.contains(&k.as_str()) {
                        return Err(AppError::BadParams(format!(
                            "cannot filter {} by {}",
                            def.table, k
                        )));
                    }
                    if v.is_null() || v.as_str() == Some("") || v.as_str() == Some("all") {
                        continue;
                    }
                    filters.push((k.clone(), v.clone()));
                }
            }
            Some(_) => return Err(AppError::BadParams("filters must be an object".into())),
        }

        let limit = match params.get("limit") {
            None | Some(Value::Null) => DEFAULT_LIST_LIMIT,
            Some(v) => match v.as_u64() {
                Some(n) if n > 0 => n as usize,
                _ => return Err(AppError::BadParams("limit must be a positive integer".into())),
            },
        };

        Ok(ListQuery {
            search,
            filters,
            limit,
        })
    }

    pub fn matches(&self, def: &TableDef, row: &Row) -> bool {
        for (key, want) in &self.filters {
            let ok = match row.get(key) {
                Some(Value::Array(items)) => items.contains(want),
                Some(have) => have == want,
                None => false,
            };
            if !ok {
                return false;
            }
        }
        if let Some(needle) = &self.search {
            return def.search.iter().any(|k| {
                row.get(*k)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_lowercase().contains(needle.as_str()))
                    .unwrap_or(false)
            });
        }
        true
    }
}

fn read_row(def: &TableDef, r: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let mut row = Row::new();
    row.insert("id".into(), Value::String(r.get(0)?));
    row.insert("createdAt".into(), Value::String(r.get(1)?));
    row.insert("updatedAt".into(), Value::String(r.get(2)?));
    for (i, col) in def.columns.iter().enumerate() {
        let idx = i + 3;
        let v = match col.kind {
            Kind::Bool => json!(r.get::<_, Option<i64>>(idx)?.unwrap_or(0) != 0),
            Kind::Rating => json!(r.get::<_, Option<i64>>(idx)?),
            Kind::Score => json!(r.get::<_, Option<f64>>(idx)?),
            Kind::PrefectList => {
                let raw: Option<String> = r.get(idx)?;
                json!(prefect_ids::parse(raw.as_deref().unwrap_or("")))
            }
            _ => json!(r.get::<_, Option<String>>(idx)?),
        };
        row.insert(col.key.to_string(), v);
    }
    Ok(row)
}

/// Every row of the table that passes `scope` and the query, in table order.
pub fn list(
    conn: &Connection,
    def: &TableDef,
    query: &ListQuery,
    scope: impl Fn(&Row) -> bool,
) -> AppResult<Vec<Row>> {
    let sql = format!("{} ORDER BY {}", def.select_sql(), def.order_by);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |r| read_row(def, r))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter(|row| scope(row) && query.matches(def, row))
        .take(query.limit)
        .collect())
}

pub fn get(conn: &Connection, def: &TableDef, id: &str) -> AppResult<Row> {
    let sql = format!("{} WHERE id = ?", def.select_sql());
    conn.query_row(&sql, [id], |r| read_row(def, r))
        .optional()?
        .ok_or_else(|| AppError::NotFound(def.entity.to_string()))
}

pub fn insert(conn: &Connection, def: &TableDef, input: &Row) -> AppResult<Row> {
    reject_unknown_keys(def, input)?;

    let mut row = Row::new();
    for col in def.columns.iter().filter(|c| c.writable) {
        let value = match input.get(col.key) {
            Some(v) => normalize(conn, col, v)?,
            None => match (col.default, col.kind) {
                (Some(d), _) => Value::String(d.to_string()),
                (None, Kind::Bool) => Value::Bool(false),
                (None, _) if col.required => {
                    return Err(AppError::validation(col.key, "is required"))
                }
                (None, _) => Value::Null,
            },
        };
        row.insert(col.key.to_string(), value);
    }
    if let Some(derive) = def.derive {
        derive(&mut row);
    }
    if let Some(check) = def.check {
        check(&row)?;
    }

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    let mut names = vec!["id", "created_at", "updated_at"];
    let mut values = vec![
        SqlValue::Text(id.clone()),
        SqlValue::Text(now.clone()),
        SqlValue::Text(now),
    ];
    for col in def.columns {
        names.push(col.sql);
        let v = match (row.get(col.key), col.kind) {
            (Some(v), _) => to_sql(v),
            (None, Kind::Bool) => SqlValue::Integer(0),
            (None, _) => SqlValue::Null,
        };
        values.push(v);
    }
    let placeholders = vec!["?"; names.len()].join(", ");
    conn.execute(
        &format!(
            "INSERT INTO {}({}) VALUES({})",
            def.table,
            names.join(", "),
            placeholders
        ),
        params_from_iter(values),
    )?;

    get(conn, def, &id)
}

pub fn update(conn: &Connection, def: &TableDef, id: &str, patch: &Row) -> AppResult<Row> {
    let existing = get(conn, def, id)?;
    reject_unknown_keys(def, patch)?;
    if patch.is_empty() {
        return Err(AppError::BadParams("patch must not be empty".into()));
    }

    let mut merged = existing;
    let mut changed: Vec<&Column> = Vec::new();
    for col in def.columns.iter().filter(|c| c.writable) {
        if let Some(v) = patch.get(col.key) {
            merged.insert(col.key.to_string(), normalize(conn, col, v)?);
            changed.push(col);
        }
    }
    if let Some(derive) = def.derive {
        derive(&mut merged);
        changed.extend(def.columns.iter().filter(|c| !c.writable));
    }
    if let Some(check) = def.check {
        check(&merged)?;
    }

    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    for col in changed {
        sets.push(format!("{} = ?", col.sql));
        values.push(to_sql(merged.get(col.key).unwrap_or(&Value::Null)));
    }
    sets.push("updated_at = ?".into());
    values.push(SqlValue::Text(now_rfc3339()));
    values.push(SqlValue::Text(id.to_string()));
    conn.execute(
        &format!("UPDATE {} SET {} WHERE id = ?", def.table, sets.join(", ")),
        params_from_iter(values),
    )?;

    get(conn, def, id)
}

pub fn delete(conn: &Connection, def: &TableDef, id: &str) -> AppResult<()> {
    let n = conn.execute(&format!("DELETE FROM {} WHERE id = ?", def.table), [id])?;
    if n == 0 {
        return Err(AppError::NotFound(def.entity.to_string()));
    }
    Ok(())
}

/// Total plus a per-value count for each `stats_by` key over `rows`.
pub fn stats(def: &TableDef, rows: &[Row]) -> Value {
    let mut by = Map::new();
    for key in def.stats_by {
        let mut counts = Map::new();
        if let Some(Kind::Choice(values)) = def.column(key).map(|c| c.kind) {
            for v in values {
                counts.insert(v.to_string(), json!(0));
            }
        }
        for row in rows {
            let label = match row.get(*key) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Bool(b)) => b.to_string(),
                _ => "none".to_string(),
            };
            let n = counts.get(&label).and_then(|v| v.as_i64()).unwrap_or(0);
            counts.insert(label, json!(n + 1));
        }
        by.insert(key.to_string(), Value::Object(counts));
    }
    json!({ "total": rows.len(), "by": by })
}

fn reject_unknown_keys(def: &TableDef, input: &Row) -> AppResult<()> {
    for key in input.keys() {
        match def.column(key) {
            Some(col) if col.writable => {}
            Some(_) => return Err(AppError::validation(key, "is read-only")),
            None => return Err(AppError::validation(key, "unknown field")),
        }
    }
    Ok(())
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn as_text<'a>(col: &Column, v: &'a Value) -> AppResult<&'a str> {
    v.as_str()
        .map(str::trim)
        .ok_or_else(|| AppError::validation(col.key, "must be text"))
}

/// Validate one incoming value and convert it to the form that is stored.
pub fn normalize(conn: &Connection, col: &Column, v: &Value) -> AppResult<Value> {
    if is_blank(v) {
        if col.required {
            return Err(AppError::validation(col.key, "is required"));
        }
        return Ok(match col.kind {
            Kind::Bool => Value::Bool(false),
            _ => Value::Null,
        });
    }

    match col.kind {
        Kind::Text => {
            let s = as_text(col, v)?;
            if s.chars().count() > MAX_TEXT_LEN {
                return Err(AppError::validation(
                    col.key,
                    format!("must be at most {} characters", MAX_TEXT_LEN),
                ));
            }
            Ok(json!(s))
        }
        Kind::Email => {
            let s = as_text(col, v)?;
            if !s.contains('@') || s.starts_with('@') || s.ends_with('@') {
                return Err(AppError::validation(col.key, "must be an email address"));
            }
            Ok(json!(s.to_lowercase()))
        }
        Kind::Url => {
            let s = as_text(col, v)?;
            if !(s.starts_with("http://") || s.starts_with("https://")) {
                return Err(AppError::validation(col.key, "must be an http(s) URL"));
            }
            Ok(json!(s))
        }
        Kind::Date => {
            let s = as_text(col, v)?;
            let d = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| AppError::validation(col.key, "must be a date (YYYY-MM-DD)"))?;
            Ok(json!(d.format("%Y-%m-%d").to_string()))
        }
        Kind::Time => {
            let s = as_text(col, v)?;
            let t = NaiveTime::parse_from_str(s, "%H:%M")
                .map_err(|_| AppError::validation(col.key, "must be a time (HH:MM)"))?;
            Ok(json!(t.format("%H:%M").to_string()))
        }
        Kind::Bool => v
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| AppError::validation(col.key, "must be true or false")),
        Kind::Rating => match v.as_i64() {
            Some(n) if (1..=5).contains(&n) => Ok(json!(n)),
            _ => Err(AppError::validation(col.key, "must be an integer from 1 to 5")),
        },
        Kind::Score => Err(AppError::validation(col.key, "is read-only")),
        Kind::Choice(values) => {
            let s = as_text(col, v)?;
            if !values.contains(&s) {
                return Err(AppError::validation(
                    col.key,
                    format!("must be one of: {}", values.join(", ")),
                ));
            }
            Ok(json!(s))
        }
        Kind::Ref(table) => {
            let id = as_text(col, v)?;
            if !row_exists(conn, table, id)? {
                return Err(AppError::validation(col.key, "refers to a missing record"));
            }
            Ok(json!(id))
        }
        Kind::PrefectList => {
            let ids: Vec<String> = match v {
                Value::String(s) => prefect_ids::parse(s),
                Value::Array(items) => items
                    .iter()
                    .map(|i| {
                        i.as_str()
                            .map(|s| s.to_string())
                            .ok_or_else(|| AppError::validation(col.key, "must list profile ids"))
                    })
                    .collect::<AppResult<Vec<_>>>()?,
                _ => return Err(AppError::validation(col.key, "must list profile ids")),
            };
            let stored = prefect_ids::serialize(&ids);
            if stored.is_empty() {
                return Err(AppError::validation(col.key, "is required"));
            }
            for id in prefect_ids::parse(&stored) {
                if !row_exists(conn, "profiles", &id)? {
                    return Err(AppError::validation(col.key, "refers to a missing record"));
                }
            }
            Ok(json!(stored))
        }
    }
}

pub fn row_exists(conn: &Connection, table: &str, id: &str) -> AppResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE id = ?", table),
            [id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn to_sql(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Id to display-name lookup over the profile list.
pub struct ProfileDirectory {
    entries: Vec<(String, String)>,
}

impl ProfileDirectory {
    pub fn load(conn: &Connection) -> AppResult<Self> {
        let mut stmt = conn.prepare("SELECT id, full_name FROM profiles ORDER BY full_name")?;
        let entries = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(pid, _)| pid == id)
            .map(|(_, name)| name.as_str())
    }

    /// For each `(from, to)` pair, write the display name(s) of the ids in
    /// `from` under `to`.
    pub fn annotate(&self, row: &mut Row, pairs: &[(&str, &str)]) {
        for (from, to) in pairs {
            let named = match row.get(*from) {
                Some(Value::String(id)) => json!(self.name_of(id)),
                Some(Value::Array(ids)) => Value::Array(
                    ids.iter()
                        .map(|id| json!(id.as_str().and_then(|id| self.name_of(id))))
                        .collect(),
                ),
                _ => Value::Null,
            };
            row.insert(to.to_string(), named);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    static NOTES: TableDef = TableDef {
        table: "events",
        entity: "event",
        columns: &[
            Column::new("title", "title", Kind::Text).required(),
            Column::new("description", "description", Kind::Text),
            Column::new("event_date", "eventDate", Kind::Date).required(),
            Column::new("location", "location", Kind::Text),
            Column::new("category", "category", Kind::Choice(&["academic", "other"]))
                .default_to("other"),
            Column::new("status", "status", Kind::Choice(&["upcoming", "completed"]))
                .default_to("upcoming"),
            Column::new("created_by", "createdBy", Kind::Ref("profiles")),
        ],
        search: &["title", "location"],
        filters: &["status", "category"],
        order_by: "event_date, created_at",
        stats_by: &["status"],
        check: None,
        derive: None,
    };

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        conn
    }

    fn obj(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn insert_applies_defaults_and_reads_back_camel_case() {
        let conn = conn();
        let row = insert(
            &conn,
            &NOTES,
            &obj(json!({ "title": " Assembly ", "eventDate": "2026-09-01" })),
        )
        .unwrap();
        assert_eq!(row["title"], "Assembly");
        assert_eq!(row["eventDate"], "2026-09-01");
        assert_eq!(row["status"], "upcoming");
        assert_eq!(row["category"], "other");
        assert!(row["createdBy"].is_null());
        assert!(row["id"].as_str().is_some());
    }

    #[test]
    fn missing_required_field_blocks_insert() {
        let conn = conn();
        let e = insert(&conn, &NOTES, &obj(json!({ "eventDate": "2026-09-01" }))).unwrap_err();
        assert!(matches!(e, AppError::Validation { ref field, .. } if field == "title"));
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn field_kinds_are_validated() {
        let conn = conn();
        let bad = [
            json!({ "title": "x", "eventDate": "01/09/2026" }),
            json!({ "title": "x", "eventDate": "2026-09-01", "status": "later" }),
            json!({ "title": "x", "eventDate": "2026-09-01", "createdBy": "ghost" }),
            json!({ "title": "x", "eventDate": "2026-09-01", "bogus": 1 }),
            json!({ "title": 5, "eventDate": "2026-09-01" }),
        ];
        for input in bad {
            let e = insert(&conn, &NOTES, &obj(input.clone())).unwrap_err();
            assert_eq!(e.code(), "validation_failed", "{input}");
        }
    }

    #[test]
    fn update_patches_only_given_fields_and_rejects_blank_required() {
        let conn = conn();
        let row = insert(
            &conn,
            &NOTES,
            &obj(json!({ "title": "Fair", "eventDate": "2026-10-01", "location": "Gym" })),
        )
        .unwrap();
        let id = row["id"].as_str().unwrap();

        let updated = update(&conn, &NOTES, id, &obj(json!({ "status": "completed" }))).unwrap();
        assert_eq!(updated["status"], "completed");
        assert_eq!(updated["location"], "Gym");

        let e = update(&conn, &NOTES, id, &obj(json!({ "title": "  " }))).unwrap_err();
        assert_eq!(e.code(), "validation_failed");

        let e = update(&conn, &NOTES, "missing", &obj(json!({ "title": "x" }))).unwrap_err();
        assert_eq!(e.code(), "not_found");
    }

    #[test]
    fn list_filters_searches_and_counts() {
        let conn = conn();
        for (title, loc, status) in [
            ("Sports day", "Field", "upcoming"),
            ("Science fair", "Hall", "completed"),
            ("Book fair", "Library", "upcoming"),
        ] {
            insert(
                &conn,
                &NOTES,
                &obj(json!({
                    "title": title, "eventDate": "2026-11-01",
                    "location": loc, "status": status
                })),
            )
            .unwrap();
        }

        let q = ListQuery::from_params(&NOTES, &json!({ "search": "FAIR" })).unwrap();
        assert_eq!(list(&conn, &NOTES, &q, |_| true).unwrap().len(), 2);

        let q = ListQuery::from_params(
            &NOTES,
            &json!({ "search": "fair", "filters": { "status": "upcoming" } }),
        )
        .unwrap();
        let rows = list(&conn, &NOTES, &q, |_| true).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], "Book fair");

        assert!(ListQuery::from_params(&NOTES, &json!({ "filters": { "title": "x" } })).is_err());

        let all = list(&conn, &NOTES, &ListQuery::from_params(&NOTES, &json!({})).unwrap(), |_| true)
            .unwrap();
        let s = stats(&NOTES, &all);
        assert_eq!(s["total"], 3);
        assert_eq!(s["by"]["status"]["upcoming"], 2);
        assert_eq!(s["by"]["status"]["completed"], 1);
    }

    #[test]
    fn delete_reports_missing_rows() {
        let conn = conn();
        let row = insert(
            &conn,
            &NOTES,
            &obj(json!({ "title": "x", "eventDate": "2026-01-01" })),
        )
        .unwrap();
        delete(&conn, &NOTES, row["id"].as_str().unwrap()).unwrap();
        assert_eq!(
            delete(&conn, &NOTES, row["id"].as_str().unwrap())
                .unwrap_err()
                .code(),
            "not_found"
        );
    }
}
