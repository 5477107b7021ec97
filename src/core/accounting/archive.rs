// src/core/accounting/archive.rs

//! Post-rollup archival: detaches event/job/suspend/reservation rows
//! older than the cutoff from the store and dumps them to a
//! zstd-compressed JSON-lines file under the state directory.

use crate::core::LatticeError;
use crate::core::accounting::store::{AccountingStore, ArchiveBundle};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

const ZSTD_LEVEL: i32 = 3;

#[derive(Serialize)]
struct ArchiveLine<'a> {
    table: &'a str,
    #[serde(flatten)]
    row: serde_json::Value,
}

fn push_rows<T: std::fmt::Debug>(
    out: &mut Vec<u8>,
    table: &str,
    rows: &[T],
) -> Result<(), LatticeError> {
    for row in rows {
        // Rows are dumped in their debug form wrapped in JSON so the file
        // stays greppable without a schema.
        let line = serde_json::to_vec(&ArchiveLine {
            table,
            row: serde_json::Value::String(format!("{row:?}")),
        })?;
        out.extend_from_slice(&line);
        out.push(b'\n');
    }
    Ok(())
}

/// Detaches archivable rows older than `cutoff` and writes them to
/// `<state_dir>/archive/archive-<cutoff>.jsonl.zst`. Returns the path
/// when rows were archived, `None` when there was nothing to do.
pub async fn archive_old_records(
    store: &dyn AccountingStore,
    state_dir: &Path,
    cutoff: i64,
) -> Result<Option<PathBuf>, LatticeError> {
    let bundle: ArchiveBundle = store.take_archivable(cutoff).await;
    if bundle.is_empty() {
        return Ok(None);
    }

    let mut raw = Vec::new();
    push_rows(&mut raw, "event", &bundle.events)?;
    push_rows(&mut raw, "job", &bundle.jobs)?;
    push_rows(&mut raw, "suspend", &bundle.suspends)?;
    push_rows(&mut raw, "resv", &bundle.resvs)?;

    let dir = state_dir.join("archive");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("archive-{cutoff}.jsonl.zst"));

    let file = std::fs::File::create(&path)?;
    let mut encoder =
        zstd::Encoder::new(file, ZSTD_LEVEL).map_err(|e| LatticeError::Internal(e.to_string()))?;
    encoder.write_all(&raw)?;
    let mut file = encoder
        .finish()
        .map_err(|e| LatticeError::Internal(e.to_string()))?;
    file.flush()?;

    info!(
        path = %path.display(),
        events = bundle.events.len(),
        jobs = bundle.jobs.len(),
        "archived accounting records"
    );
    Ok(Some(path))
}
