use serde_json::json;
use std::path::PathBuf;

use crate::auth::ADMIN_ONLY;
use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok, respond};
use crate::ipc::guard::{self, Access};
use crate::ipc::types::{AppState, Request};

fn path_param(req: &Request, key: &str) -> Option<PathBuf> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = guard::authorize(state, req, Access::AnyOf(ADMIN_ONLY)) {
        return respond(&req.id, &req.method, Err(e));
    }
    let Some(out_path) = path_param(req, "outPath") else {
        return err(&req.id, "bad_params", "missing outPath", None);
    };
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match backup::export_bundle(conn, workspace, &out_path) {
        Ok(summary) => {
            tracing::info!(path = %out_path.display(), bytes = summary.db_bytes, "workspace exported");
            ok(
                &req.id,
                json!({
                    "path": out_path.to_string_lossy(),
                    "bundleFormat": summary.bundle_format,
                    "dbSha256": summary.db_sha256,
                    "dbBytes": summary.db_bytes,
                }),
            )
        }
        Err(e) => err(
            &req.id,
            "io_failed",
            format!("{e:#}"),
            Some(json!({ "path": out_path.to_string_lossy() })),
        ),
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = guard::authorize(state, req, Access::AnyOf(ADMIN_ONLY)) {
        return respond(&req.id, &req.method, Err(e));
    }
    let Some(in_path) = path_param(req, "inPath") else {
        return err(&req.id, "bad_params", "missing inPath", None);
    };
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if !in_path.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path.to_string_lossy() })),
        );
    }

    // Drop open handle before replacing file.
    state.db = None;
    let imported = backup::import_bundle(&in_path, &workspace);

    let conn = match db::open_db(&workspace) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:#}"), None),
    };
    state.db = Some(conn);

    match imported {
        Ok(()) => {
            tracing::info!(path = %in_path.display(), "workspace restored from bundle");
            ok(
                &req.id,
                json!({
                    "workspacePath": workspace.to_string_lossy(),
                    "bundleFormat": backup::BUNDLE_FORMAT,
                }),
            )
        }
        Err(e) => err(
            &req.id,
            "io_failed",
            format!("{e:#}"),
            Some(json!({ "path": in_path.to_string_lossy() })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_export(state, req)),
        "backup.import" => Some(handle_import(state, req)),
        _ => None,
    }
}
