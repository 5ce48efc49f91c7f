use anyhow::{anyhow, Context};
use rusqlite::Connection;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::{now_rfc3339, DB_FILE};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/prefect.sqlite3";
pub const BUNDLE_FORMAT: &str = "prefect-workspace-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub db_sha256: String,
    pub db_bytes: u64,
}

/// Snapshot the open database and write it into a zip bundle with a manifest
/// carrying the snapshot's SHA-256.
pub fn export_bundle(
    conn: &Connection,
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let snapshot = workspace_path.join(format!("{}.snapshot", DB_FILE));
    if snapshot.exists() {
        std::fs::remove_file(&snapshot).ok();
    }
    conn.execute("VACUUM INTO ?", [snapshot.to_string_lossy().as_ref()])
        .context("failed to snapshot database")?;

    let result = write_bundle(&snapshot, out_path);
    std::fs::remove_file(&snapshot).ok();
    result
}

fn write_bundle(snapshot: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let mut db_bytes = Vec::new();
    File::open(snapshot)
        .and_then(|mut f| f.read_to_end(&mut db_bytes))
        .context("failed to read database snapshot")?;
    let digest = hex_digest(&db_bytes);

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": now_rfc3339(),
        "dbSha256": digest,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;
    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        db_sha256: digest,
        db_bytes: db_bytes.len() as u64,
    })
}

/// Replace the workspace database with the one inside `in_path`. The caller
/// must have closed its connection first.
pub fn import_bundle(in_path: &Path, workspace_path: &Path) -> anyhow::Result<()> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected = manifest
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .context("bundle missing db/prefect.sqlite3")?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;
    if hex_digest(&db_bytes) != expected {
        return Err(anyhow!("database checksum does not match manifest"));
    }

    std::fs::create_dir_all(workspace_path)?;
    let dst = workspace_path.join(DB_FILE);
    let tmp_dst = workspace_path.join(format!("{}.importing", DB_FILE));
    {
        let mut out = File::create(&tmp_dst).with_context(|| {
            format!(
                "failed to create temp database {}",
                tmp_dst.to_string_lossy()
            )
        })?;
        out.write_all(&db_bytes)
            .and_then(|_| out.flush())
            .context("failed to write extracted database")?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })?;
    Ok(())
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
