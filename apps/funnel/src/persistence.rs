//! # CSV Persistence
//!
//! File I/O around the core CSV format. Writes go to a sibling temporary
//! file first and are renamed into place, so a reader never sees a
//! half-written table.

use funnel_core::{FunnelError, FunnelTable, merge_tables, table_from_csv, table_to_csv};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

fn io_err(path: &Path, e: std::io::Error) -> FunnelError {
    FunnelError::IoError(format!("'{}': {}", path.display(), e))
}

/// Load a persisted table; `Ok(None)` when the file does not exist.
pub fn load_table(path: &Path) -> Result<Option<FunnelTable>, FunnelError> {
    match std::fs::read(path) {
        Ok(bytes) => table_from_csv(&bytes).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Write `table` to `path`, replacing any previous file.
pub fn save_table(path: &Path, table: &FunnelTable) -> Result<(), FunnelError> {
    let bytes = table_to_csv(table)?;
    let tmp = temp_path(path);
    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))
}

/// Merge `latest` into the table stored at `path` and write the result back.
///
/// Rows of deal/stage pairs present in `latest` replace the stored ones;
/// stored rows for pairs `latest` does not mention are kept.
pub fn merge_into_file(path: &Path, latest: &FunnelTable) -> Result<FunnelTable, FunnelError> {
    let merged = match load_table(path)? {
        Some(previous) => merge_tables(&previous, latest),
        None => latest.clone(),
    };
    save_table(path, &merged)?;
    Ok(merged)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "funnel.csv".into());
    name.push(".tmp");
    path.with_file_name(name)
}

// =============================================================================
// TESTS
// =============================================================================
