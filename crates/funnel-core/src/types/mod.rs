//! # Core Type Definitions
//!
//! This module contains the data model of the funnel transformation:
//! - Identifiers (`DealId`, `StageId`)
//! - Input records (`Deal`, `DealStatus`, `StageDuration`)
//! - Output rows (`StageInterval`)
//! - Error types (`FunnelError`, `MalformedReason`)
//!
//! ## Ordering Guarantees
//!
//! A deal's `stage_durations` is a `Vec`, not a map: its order is the order in
//! which the deal traversed the pipeline and must never be re-sorted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique identifier of a deal in the CRM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DealId(pub u64);

impl fmt::Display for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a pipeline stage.
///
/// The CRM reports stage ids as integers in some places and as object keys
/// (strings) in others, so ids are kept as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub String);

impl StageId {
    /// Create a new stage id.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the stage id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for StageId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for StageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// =============================================================================
// DEAL STATUS
// =============================================================================

/// Lifecycle status of a deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealStatus {
    Open,
    Won,
    Lost,
    /// Reported by the CRM for deals removed from a pipeline.
    Deleted,
}

impl DealStatus {
    /// Wire representation (`open`, `won`, `lost`, `deleted`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Open => "open",
            DealStatus::Won => "won",
            DealStatus::Lost => "lost",
            DealStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DealStatus {
    type Err = FunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(DealStatus::Open),
            "won" => Ok(DealStatus::Won),
            "lost" => Ok(DealStatus::Lost),
            "deleted" => Ok(DealStatus::Deleted),
            other => Err(FunnelError::InvalidStatus(other.to_string())),
        }
    }
}

// =============================================================================
// DEAL (input)
// =============================================================================

/// Time a deal spent in one stage, in seconds.
///
/// Signed so that a corrupt negative duration can be detected and rejected
/// instead of wrapping around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDuration {
    pub stage_id: StageId,
    pub seconds: i64,
}

impl StageDuration {
    #[must_use]
    pub fn new(stage_id: impl Into<StageId>, seconds: i64) -> Self {
        Self {
            stage_id: stage_id.into(),
            seconds,
        }
    }
}

/// A CRM sales opportunity, as handed over by the fetcher.
///
/// `value` and `status` are optional here because the CRM may omit them;
/// the builder rejects deals that lack either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub add_time: DateTime<Utc>,
    pub value: Option<f64>,
    pub status: Option<DealStatus>,
    pub owner_name: Option<String>,
    pub pipeline_id: Option<i64>,
    pub lost_reason: Option<String>,
    /// Stage durations in traversal order.
    pub stage_durations: Vec<StageDuration>,
}

impl Deal {
    /// Create a deal with only the mandatory identity fields set.
    #[must_use]
    pub fn new(id: DealId, add_time: DateTime<Utc>) -> Self {
        Self {
            id,
            add_time,
            value: None,
            status: None,
            owner_name: None,
            pipeline_id: None,
            lost_reason: None,
            stage_durations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: DealStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner_name = Some(owner.into());
        self
    }

    #[must_use]
    pub fn with_pipeline(mut self, pipeline_id: i64) -> Self {
        self.pipeline_id = Some(pipeline_id);
        self
    }

    #[must_use]
    pub fn with_lost_reason(mut self, reason: impl Into<String>) -> Self {
        self.lost_reason = Some(reason.into());
        self
    }

    /// Append a stage to the traversal history.
    #[must_use]
    pub fn with_stage(mut self, stage_id: impl Into<StageId>, seconds: i64) -> Self {
        self.stage_durations.push(StageDuration::new(stage_id, seconds));
        self
    }

    /// Total recorded time across all stages (saturating).
    #[must_use]
    pub fn total_duration_secs(&self) -> i64 {
        self.stage_durations
            .iter()
            .fold(0i64, |acc, d| acc.saturating_add(d.seconds))
    }
}

// =============================================================================
// STAGE INTERVAL (output)
// =============================================================================

/// One row of the funnel table: a deal's stay in one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInterval {
    pub deal_id: DealId,
    pub stage_id: StageId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub value: f64,
    pub status: DealStatus,
    pub owner_name: String,
    pub pipeline_id: Option<i64>,
    pub lost_reason: Option<String>,
}

impl StageInterval {
    /// Length of the interval in whole seconds.
    #[must_use]
    pub fn duration_secs(&self) -> i64 {
        (self.end_time - self.start_time).num_seconds()
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Why a deal could not be turned into intervals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedReason {
    #[error("missing value")]
    MissingValue,

    #[error("missing status")]
    MissingStatus,

    #[error("negative duration {seconds}s in stage {stage_id}")]
    NegativeDuration { stage_id: StageId, seconds: i64 },

    #[error("timestamp overflow in stage {stage_id}")]
    TimestampOverflow { stage_id: StageId },

    /// The raw record could not be mapped to a deal at all.
    #[error("{0}")]
    Unparseable(String),
}

/// Errors that can occur in the funnel core.
///
/// - No silent failures
/// - The core never panics; every error is returned
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunnelError {
    /// A deal lacks a required field or violates the duration invariant.
    #[error("Malformed deal {deal_id}: {reason}")]
    MalformedDeal {
        deal_id: DealId,
        reason: MalformedReason,
    },

    /// A status string outside the known set.
    #[error("Invalid deal status: {0:?}")]
    InvalidStatus(String),

    /// A timestamp string in none of the accepted formats.
    #[error("Invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    /// A date key outside `created` / `stage_exit`.
    #[error("Invalid date key: {0:?} (use created or stage_exit)")]
    InvalidDateKey(String),

    /// A CSV encoding or decoding error.
    #[error("CSV error: {0}")]
    Csv(String),

    /// An I/O error (raised by the app layer around file persistence).
    #[error("I/O error: {0}")]
    IoError(String),
}

impl FunnelError {
    /// Shorthand for a `MalformedDeal` error.
    #[must_use]
    pub fn malformed(deal_id: DealId, reason: MalformedReason) -> Self {
        Self::MalformedDeal { deal_id, reason }
    }
}

// =============================================================================
// TESTS
// =============================================================================
