//! # CSV Table Format
//!
//! Textual persistence of a [`FunnelTable`].
//!
//! Layout (header row always written, even for an empty table):
//!
//! ```text
//! Deal ID,Stage ID,Start Date,End Date,Value,Status,Owner Name,pipeline_id,lost_reason
//! 1,1,2024-01-01 00:00:00,2024-01-01 01:00:00,1000.0,won,Ana,1,
//! ```
//!
//! - Dates are UTC in `YYYY-MM-DD HH:MM:SS`; RFC 3339 is accepted on read
//! - `lost_reason` is optional on read (older tables lack the column)
//! - `pipeline_id` may be written as `1.0` by spreadsheet tools; integral
//!   floats are accepted
//!
//! This is a pure transformation - file I/O lives in the app layer.

use crate::primitives::{CSV_HEADERS, format_timestamp, parse_timestamp};
use crate::{DealId, DealStatus, FunnelError, FunnelTable, StageId, StageInterval};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// On-disk shape of one row.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    #[serde(rename = "Deal ID")]
    deal_id: u64,
    #[serde(rename = "Stage ID")]
    stage_id: String,
    #[serde(rename = "Start Date")]
    start_date: String,
    #[serde(rename = "End Date")]
    end_date: String,
    #[serde(rename = "Value")]
    value: f64,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Owner Name")]
    owner_name: String,
    #[serde(default)]
    pipeline_id: Option<String>,
    #[serde(default)]
    lost_reason: Option<String>,
}

impl From<&StageInterval> for CsvRow {
    fn from(row: &StageInterval) -> Self {
        Self {
            deal_id: row.deal_id.0,
            stage_id: row.stage_id.0.clone(),
            start_date: format_timestamp(&row.start_time),
            end_date: format_timestamp(&row.end_time),
            value: row.value,
            status: row.status.as_str().to_string(),
            owner_name: row.owner_name.clone(),
            pipeline_id: row.pipeline_id.map(|p| p.to_string()),
            lost_reason: row.lost_reason.clone(),
        }
    }
}

impl CsvRow {
    fn into_interval(self, line: usize) -> Result<StageInterval, FunnelError> {
        let at_line = |e: FunnelError| FunnelError::Csv(format!("line {}: {}", line, e));

        Ok(StageInterval {
            deal_id: DealId(self.deal_id),
            stage_id: StageId(self.stage_id),
            start_time: parse_timestamp(&self.start_date).map_err(at_line)?,
            end_time: parse_timestamp(&self.end_date).map_err(at_line)?,
            value: self.value,
            status: self.status.parse::<DealStatus>().map_err(at_line)?,
            owner_name: self.owner_name,
            pipeline_id: parse_pipeline_id(self.pipeline_id.as_deref()).map_err(at_line)?,
            lost_reason: self.lost_reason.filter(|r| !r.is_empty()),
        })
    }
}

/// Parse an optional pipeline id, accepting integral floats (`1.0`).
fn parse_pipeline_id(raw: Option<&str>) -> Result<Option<i64>, FunnelError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(id) = raw.parse::<i64>() {
        return Ok(Some(id));
    }
    match raw.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f.is_finite() => Ok(Some(f as i64)),
        _ => Err(FunnelError::Csv(format!("invalid pipeline_id {:?}", raw))),
    }
}

// =============================================================================
// ENCODE / DECODE
// =============================================================================

/// Serialize a table to CSV bytes.
pub fn table_to_csv(table: &FunnelTable) -> Result<Vec<u8>, FunnelError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer
        .write_record(CSV_HEADERS)
        .map_err(|e| FunnelError::Csv(e.to_string()))?;

    for row in table {
        writer
            .serialize(CsvRow::from(row))
            .map_err(|e| FunnelError::Csv(e.to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|e| FunnelError::Csv(e.to_string()))
}

/// Parse a table from CSV bytes.
///
/// The two date columns are parsed as timestamps; any unparseable row fails
/// the whole load with the offending line number.
pub fn table_from_csv(bytes: &[u8]) -> Result<FunnelTable, FunnelError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for (index, record) in reader.deserialize::<CsvRow>().enumerate() {
        // Header is line 1.
        let line = index + 2;
        let record = record.map_err(|e| FunnelError::Csv(format!("line {}: {}", line, e)))?;
        rows.push(record.into_interval(line)?);
    }

    Ok(FunnelTable::from_rows(rows))
}

// =============================================================================
// MERGE
// =============================================================================

/// Merge a freshly built table into a previously persisted one.
///
/// Rows are keyed by `(Deal ID, Stage ID)`; the latest write wins. Every row
/// of `latest` is kept (a deal that re-entered a stage keeps both visits),
/// while rows of `previous` survive only if `latest` has no row with the
/// same key.
#[must_use]
pub fn merge_tables(previous: &FunnelTable, latest: &FunnelTable) -> FunnelTable {
    let latest_keys: BTreeSet<(DealId, &StageId)> =
        latest.iter().map(|r| (r.deal_id, &r.stage_id)).collect();

    previous
        .iter()
        .filter(|r| !latest_keys.contains(&(r.deal_id, &r.stage_id)))
        .chain(latest.iter())
        .cloned()
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
