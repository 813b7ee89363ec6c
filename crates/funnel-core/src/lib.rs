//! # funnel-core
//!
//! The deal-to-funnel transformation - THE TRANSFORM.
//!
//! A CRM deal records how long it spent in each pipeline stage, in the order
//! the stages were traversed. This crate reshapes that history into a flat
//! table of contiguous per-stage intervals, and provides the pure pieces the
//! dashboard needs around it: a CSV format with merge-on-reload, and the
//! stage/revenue aggregations.
//!
//! ## Architectural Constraints
//!
//! - NO async, NO network, NO file I/O (the app layer owns those)
//! - NO logging: rejected deals are returned so the caller can log them
//! - Tables are rebuilt from scratch, never edited in place

// =============================================================================
// MODULES
// =============================================================================

pub mod builder;
pub mod formats;
pub mod primitives;
pub mod report;
pub mod table;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Deal, DealId, DealStatus, FunnelError, MalformedReason, StageDuration, StageId,
    StageInterval,
};

// =============================================================================
// RE-EXPORTS: Transform
// =============================================================================

pub use builder::{FunnelBuild, build_deal_intervals, build_funnel};
pub use table::FunnelTable;

// =============================================================================
// RE-EXPORTS: Formats & Reports
// =============================================================================

pub use formats::{merge_tables, table_from_csv, table_to_csv};
pub use primitives::{format_timestamp, parse_timestamp};
pub use report::{
    DailyRevenue, DateKey, DealSummary, FunnelFilter, FunnelSummary, StageCount, filter_table,
};
