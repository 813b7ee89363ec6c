//! # Funnel Builder
//!
//! Turns deals into stage intervals.
//!
//! For each deal the builder walks `stage_durations` in traversal order,
//! starting a cursor at `add_time` and advancing it by each stage's duration:
//!
//! ```text
//! add_time ──stage 1 (3600s)──► +1h ──stage 2 (7200s)──► +3h
//!          [    interval 0    ][        interval 1       ]
//! ```
//!
//! - Intervals of one deal are contiguous: `end[i] == start[i + 1]`
//! - `start[0] == add_time`
//! - `end - start` equals the recorded duration
//!
//! A deal that cannot satisfy these (missing value/status, negative duration,
//! timestamp overflow) is rejected as a whole and reported in
//! [`FunnelBuild::skipped`]; it never contributes partial rows.

use crate::primitives::DEFAULT_OWNER_NAME;
use crate::{Deal, FunnelError, FunnelTable, MalformedReason, StageInterval};
use chrono::TimeDelta;

/// Result of building a table from a batch of deals.
#[derive(Debug, Clone, Default)]
pub struct FunnelBuild {
    /// Rows of every well-formed deal.
    pub table: FunnelTable,
    /// Deals that were rejected, with the reason.
    pub skipped: Vec<FunnelError>,
}

impl FunnelBuild {
    /// Number of deals that contributed to the table (including those with no stages).
    #[must_use]
    pub fn accepted(&self, total_deals: usize) -> usize {
        total_deals.saturating_sub(self.skipped.len())
    }
}

/// Build the intervals of a single deal.
pub fn build_deal_intervals(deal: &Deal) -> Result<Vec<StageInterval>, FunnelError> {
    let value = deal
        .value
        .ok_or_else(|| FunnelError::malformed(deal.id, MalformedReason::MissingValue))?;
    let status = deal
        .status
        .ok_or_else(|| FunnelError::malformed(deal.id, MalformedReason::MissingStatus))?;
    let owner_name = deal
        .owner_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_OWNER_NAME.to_string());
    let lost_reason = deal.lost_reason.clone().filter(|r| !r.is_empty());

    let mut intervals = Vec::with_capacity(deal.stage_durations.len());
    let mut cursor = deal.add_time;
    let mut elapsed: i64 = 0;

    for stage in &deal.stage_durations {
        if stage.seconds < 0 {
            return Err(FunnelError::malformed(
                deal.id,
                MalformedReason::NegativeDuration {
                    stage_id: stage.stage_id.clone(),
                    seconds: stage.seconds,
                },
            ));
        }

        let overflow = || {
            FunnelError::malformed(
                deal.id,
                MalformedReason::TimestampOverflow {
                    stage_id: stage.stage_id.clone(),
                },
            )
        };
        let step = TimeDelta::try_seconds(stage.seconds).ok_or_else(overflow)?;
        let end = cursor.checked_add_signed(step).ok_or_else(overflow)?;

        intervals.push(StageInterval {
            deal_id: deal.id,
            stage_id: stage.stage_id.clone(),
            start_time: cursor,
            end_time: end,
            value,
            status,
            owner_name: owner_name.clone(),
            pipeline_id: deal.pipeline_id,
            lost_reason: lost_reason.clone(),
        });

        cursor = end;
        elapsed = elapsed.saturating_add(stage.seconds);
    }

    debug_assert_eq!(
        (cursor - deal.add_time).num_seconds(),
        elapsed,
        "cursor drifted from accumulated duration"
    );

    Ok(intervals)
}

/// Build the funnel table for a batch of deals.
///
/// Deals are processed in input order; rows of each deal stay in traversal
/// order. Malformed deals are skipped and returned in `skipped`.
pub fn build_funnel(deals: &[Deal]) -> FunnelBuild {
    let mut rows = Vec::new();
    let mut skipped = Vec::new();

    for deal in deals {
        match build_deal_intervals(deal) {
            Ok(intervals) => rows.extend(intervals),
            Err(e) => skipped.push(e),
        }
    }

    FunnelBuild {
        table: FunnelTable::from_rows(rows),
        skipped,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{DealId, DealStatus, StageId};
    use chrono::{TimeZone, Utc};

    fn new_year() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .expect("valid date")
    }

    fn won_deal() -> Deal {
        Deal::new(DealId(1), new_year())
            .with_value(1000.0)
            .with_status(DealStatus::Won)
            .with_stage("1", 3600)
            .with_stage("2", 7200)
    }

    #[test]
    fn two_stage_deal_produces_contiguous_rows() {
        let rows = build_deal_intervals(&won_deal()).expect("build");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].stage_id, StageId::from("1"));
        assert_eq!(rows[0].start_time, new_year());
        assert_eq!(
            rows[0].end_time,
            Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()
        );
        assert_eq!(rows[1].stage_id, StageId::from("2"));
        assert_eq!(rows[1].start_time, rows[0].end_time);
        assert_eq!(
            rows[1].end_time,
            Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap()
        );
        assert!(rows.iter().all(|r| r.value == 1000.0));
        assert!(rows.iter().all(|r| r.status == DealStatus::Won));
    }

    #[test]
    fn traversal_order_is_kept_not_sorted() {
        let deal = Deal::new(DealId(9), new_year())
            .with_value(1.0)
            .with_status(DealStatus::Open)
            .with_stage("5", 10)
            .with_stage("2", 20)
            .with_stage("10", 30);
        let stages: Vec<_> = build_deal_intervals(&deal)
            .expect("build")
            .into_iter()
            .map(|r| r.stage_id.0)
            .collect();
        assert_eq!(stages, vec!["5", "2", "10"]);
    }

    #[test]
    fn missing_owner_defaults_to_unknown() {
        let rows = build_deal_intervals(&won_deal()).expect("build");
        assert!(rows.iter().all(|r| r.owner_name == "Unknown"));
        assert!(rows.iter().all(|r| r.pipeline_id.is_none()));
    }

    #[test]
    fn blank_owner_defaults_to_unknown() {
        let rows = build_deal_intervals(&won_deal().with_owner("  ")).expect("build");
        assert_eq!(rows[0].owner_name, "Unknown");
    }

    #[test]
    fn empty_lost_reason_becomes_none() {
        let rows = build_deal_intervals(&won_deal().with_lost_reason("")).expect("build");
        assert!(rows[0].lost_reason.is_none());
    }

    #[test]
    fn empty_stage_map_yields_no_rows() {
        let deal = Deal::new(DealId(2), new_year())
            .with_value(5.0)
            .with_status(DealStatus::Open);
        assert!(build_deal_intervals(&deal).expect("build").is_empty());
    }

    #[test]
    fn missing_value_is_malformed() {
        let mut deal = won_deal();
        deal.value = None;
        assert_eq!(
            build_deal_intervals(&deal),
            Err(FunnelError::malformed(
                DealId(1),
                MalformedReason::MissingValue
            ))
        );
    }

    #[test]
    fn missing_status_is_malformed() {
        let mut deal = won_deal();
        deal.status = None;
        assert!(matches!(
            build_deal_intervals(&deal),
            Err(FunnelError::MalformedDeal {
                reason: MalformedReason::MissingStatus,
                ..
            })
        ));
    }

    #[test]
    fn negative_duration_is_malformed() {
        let deal = won_deal().with_stage("3", -1);
        assert!(matches!(
            build_deal_intervals(&deal),
            Err(FunnelError::MalformedDeal {
                reason: MalformedReason::NegativeDuration { seconds: -1, .. },
                ..
            })
        ));
    }

    #[test]
    fn overflow_is_malformed() {
        let deal = won_deal().with_stage("3", i64::MAX);
        assert!(matches!(
            build_deal_intervals(&deal),
            Err(FunnelError::MalformedDeal {
                reason: MalformedReason::TimestampOverflow { .. },
                ..
            })
        ));
    }

    #[test]
    fn build_funnel_skips_bad_deals_and_keeps_good_ones() {
        let bad = Deal::new(DealId(2), new_year())
            .with_value(10.0)
            .with_status(DealStatus::Lost)
            .with_stage("1", 100)
            .with_stage("2", -100);
        let build = build_funnel(&[won_deal(), bad]);

        assert_eq!(build.table.len(), 2);
        assert_eq!(build.table.deal_count(), 1);
        assert_eq!(build.skipped.len(), 1);
        assert_eq!(build.accepted(2), 1);
        assert_eq!(build.table.for_deal(DealId(2)).count(), 0);
    }
}
