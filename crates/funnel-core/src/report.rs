//! # Funnel Report
//!
//! Aggregations the dashboard draws from a funnel table:
//! stage counts (how many deals sit in / reached each stage) and revenue
//! per day for won deals.
//!
//! All functions work on deals, not rows: a deal with three intervals is
//! still one deal and its value is counted once.
//!
//! ## Date Key
//!
//! Which timestamp places a deal on the calendar is a policy choice, so it is
//! a parameter ([`DateKey`]): the deal's creation (`add_time`, the start of its
//! first interval) or its exit from the last recorded stage.

use crate::{DealId, DealStatus, FunnelError, FunnelTable, StageId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

// =============================================================================
// DATE KEY
// =============================================================================

/// Timestamp used to place a deal on the calendar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateKey {
    /// Deal creation (`add_time`).
    #[default]
    Created,
    /// End of the deal's last recorded stage.
    StageExit,
}

impl FromStr for DateKey {
    type Err = FunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(DateKey::Created),
            "stage_exit" => Ok(DateKey::StageExit),
            other => Err(FunnelError::InvalidDateKey(other.to_string())),
        }
    }
}

// =============================================================================
// DEAL SUMMARY
// =============================================================================

/// One deal reconstructed from its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct DealSummary {
    pub deal_id: DealId,
    pub created: DateTime<Utc>,
    pub exited: DateTime<Utc>,
    /// Stage of the latest interval.
    pub current_stage: StageId,
    /// Every stage the deal passed through.
    pub reached: BTreeSet<StageId>,
    pub value: f64,
    pub status: DealStatus,
    pub owner_name: String,
    pub pipeline_id: Option<i64>,
}

impl DealSummary {
    /// Calendar date of the deal under `key` (UTC).
    #[must_use]
    pub fn date(&self, key: DateKey) -> NaiveDate {
        match key {
            DateKey::Created => self.created.date_naive(),
            DateKey::StageExit => self.exited.date_naive(),
        }
    }
}

/// Collapse a table into one summary per deal, ordered by deal id.
#[must_use]
pub fn deal_summaries(table: &FunnelTable) -> Vec<DealSummary> {
    let mut by_deal: BTreeMap<DealId, DealSummary> = BTreeMap::new();

    for row in table {
        by_deal
            .entry(row.deal_id)
            .and_modify(|s| {
                if row.start_time < s.created {
                    s.created = row.start_time;
                }
                if row.end_time >= s.exited {
                    s.exited = row.end_time;
                    s.current_stage = row.stage_id.clone();
                }
                s.reached.insert(row.stage_id.clone());
            })
            .or_insert_with(|| DealSummary {
                deal_id: row.deal_id,
                created: row.start_time,
                exited: row.end_time,
                current_stage: row.stage_id.clone(),
                reached: BTreeSet::from([row.stage_id.clone()]),
                value: row.value,
                status: row.status,
                owner_name: row.owner_name.clone(),
                pipeline_id: row.pipeline_id,
            });
    }

    by_deal.into_values().collect()
}

// =============================================================================
// FILTER
// =============================================================================

/// Dashboard filter. Empty sets and `None` bounds match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunnelFilter {
    /// Inclusive lower date bound.
    pub from: Option<NaiveDate>,
    /// Inclusive upper date bound.
    pub to: Option<NaiveDate>,
    pub owners: BTreeSet<String>,
    pub statuses: BTreeSet<DealStatus>,
    pub pipeline_id: Option<i64>,
    #[serde(default)]
    pub date_key: DateKey,
}

impl FunnelFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owners.insert(owner.into());
        self
    }

    #[must_use]
    pub fn status(mut self, status: DealStatus) -> Self {
        self.statuses.insert(status);
        self
    }

    #[must_use]
    pub fn pipeline(mut self, pipeline_id: i64) -> Self {
        self.pipeline_id = Some(pipeline_id);
        self
    }

    #[must_use]
    pub fn keyed_by(mut self, key: DateKey) -> Self {
        self.date_key = key;
        self
    }

    /// Same filter restricted to a single status.
    #[must_use]
    pub fn only_status(&self, status: DealStatus) -> Self {
        let mut f = self.clone();
        f.statuses = BTreeSet::from([status]);
        f
    }

    /// Whether a deal passes the filter.
    #[must_use]
    pub fn matches(&self, deal: &DealSummary) -> bool {
        let date = deal.date(self.date_key);
        self.from.is_none_or(|from| date >= from)
            && self.to.is_none_or(|to| date <= to)
            && (self.owners.is_empty() || self.owners.contains(&deal.owner_name))
            && (self.statuses.is_empty() || self.statuses.contains(&deal.status))
            && self
                .pipeline_id
                .is_none_or(|p| deal.pipeline_id == Some(p))
    }
}

/// Rows of every deal that passes `filter`, in table order.
#[must_use]
pub fn filter_table(table: &FunnelTable, filter: &FunnelFilter) -> FunnelTable {
    let kept: BTreeSet<DealId> = deal_summaries(table)
        .into_iter()
        .filter(|d| filter.matches(d))
        .map(|d| d.deal_id)
        .collect();
    table.filtered(|r| kept.contains(&r.deal_id))
}

// =============================================================================
// AGGREGATES
// =============================================================================

/// Deal counts for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCount {
    pub stage_id: StageId,
    /// Deals whose latest interval is this stage.
    pub current: usize,
    /// Deals that passed through this stage at some point.
    pub reached: usize,
}

/// Revenue of the deals dated on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRevenue {
    pub date: NaiveDate,
    pub revenue: f64,
    pub deals: usize,
}

/// Per-stage counts for deals passing `filter`.
///
/// `stage_order` fixes which stages are reported and in what order; when it
/// is empty, every stage seen in the table is reported in first-seen order.
#[must_use]
pub fn stage_counts(
    table: &FunnelTable,
    filter: &FunnelFilter,
    stage_order: &[StageId],
) -> Vec<StageCount> {
    let order: Vec<StageId> = if stage_order.is_empty() {
        let mut seen = BTreeSet::new();
        table
            .iter()
            .filter(|r| seen.insert(r.stage_id.clone()))
            .map(|r| r.stage_id.clone())
            .collect()
    } else {
        stage_order.to_vec()
    };

    let deals: Vec<DealSummary> = deal_summaries(table)
        .into_iter()
        .filter(|d| filter.matches(d))
        .collect();

    order
        .into_iter()
        .map(|stage_id| StageCount {
            current: deals.iter().filter(|d| d.current_stage == stage_id).count(),
            reached: deals.iter().filter(|d| d.reached.contains(&stage_id)).count(),
            stage_id,
        })
        .collect()
}

/// Revenue per day for deals passing `filter`, ascending by date.
///
/// Each deal contributes its value once, on its date under `filter.date_key`.
#[must_use]
pub fn revenue_by_day(table: &FunnelTable, filter: &FunnelFilter) -> Vec<DailyRevenue> {
    let mut days: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();

    for deal in deal_summaries(table).iter().filter(|d| filter.matches(d)) {
        let entry = days.entry(deal.date(filter.date_key)).or_insert((0.0, 0));
        entry.0 += deal.value;
        entry.1 += 1;
    }

    days.into_iter()
        .map(|(date, (revenue, deals))| DailyRevenue {
            date,
            revenue,
            deals,
        })
        .collect()
}

/// Sorted distinct owner names, for filter widgets.
#[must_use]
pub fn owners(table: &FunnelTable) -> Vec<String> {
    table
        .iter()
        .map(|r| r.owner_name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Everything the dashboard shows for one filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelSummary {
    pub stage_counts: Vec<StageCount>,
    /// Revenue of won deals only.
    pub revenue: Vec<DailyRevenue>,
    pub total_revenue: f64,
    pub owners: Vec<String>,
}

impl FunnelSummary {
    /// Compute the summary.
    ///
    /// Stage counts cover open deals unless `filter` names statuses; revenue
    /// is restricted to won deals within the same date/owner/pipeline window.
    #[must_use]
    pub fn compute(table: &FunnelTable, filter: &FunnelFilter, stage_order: &[StageId]) -> Self {
        let revenue = revenue_by_day(table, &filter.only_status(DealStatus::Won));
        let total_revenue = revenue.iter().map(|d| d.revenue).sum();

        let count_filter = if filter.statuses.is_empty() {
            filter.only_status(DealStatus::Open)
        } else {
            filter.clone()
        };

        Self {
            stage_counts: stage_counts(table, &count_filter, stage_order),
            revenue,
            total_revenue,
            owners: owners(table),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{Deal, build_funnel};
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, 9, 0, 0).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).expect("valid date")
    }

    fn sample_table() -> FunnelTable {
        let deals = vec![
            Deal::new(DealId(1), day(1))
                .with_value(1000.0)
                .with_status(DealStatus::Won)
                .with_owner("Ana")
                .with_pipeline(1)
                .with_stage("1", 3600)
                .with_stage("2", 86_400 * 2),
            Deal::new(DealId(2), day(1))
                .with_value(500.0)
                .with_status(DealStatus::Won)
                .with_owner("Bruno")
                .with_pipeline(1)
                .with_stage("1", 60),
            Deal::new(DealId(3), day(2))
                .with_value(250.0)
                .with_status(DealStatus::Open)
                .with_owner("Ana")
                .with_pipeline(1)
                .with_stage("1", 60)
                .with_stage("2", 60)
                .with_stage("3", 60),
            Deal::new(DealId(4), day(5))
                .with_value(9999.0)
                .with_status(DealStatus::Won)
                .with_owner("Ana")
                .with_pipeline(2)
                .with_stage("1", 60),
        ];
        build_funnel(&deals).table
    }

    #[test]
    fn summaries_collapse_rows_per_deal() {
        let summaries = deal_summaries(&sample_table());
        assert_eq!(summaries.len(), 4);
        let first = &summaries[0];
        assert_eq!(first.deal_id, DealId(1));
        assert_eq!(first.created, day(1));
        assert_eq!(first.current_stage, StageId::from("2"));
        assert_eq!(first.reached.len(), 2);
    }

    #[test]
    fn stage_counts_current_and_reached() {
        let filter = FunnelFilter::new().pipeline(1);
        let counts = stage_counts(
            &sample_table(),
            &filter,
            &[StageId::from("1"), StageId::from("2"), StageId::from("3")],
        );
        assert_eq!(counts[0].stage_id, StageId::from("1"));
        assert_eq!(counts[0].current, 1);
        assert_eq!(counts[0].reached, 3);
        assert_eq!(counts[1].current, 1);
        assert_eq!(counts[1].reached, 2);
        assert_eq!(counts[2].current, 1);
        assert_eq!(counts[2].reached, 1);
    }

    #[test]
    fn stage_counts_default_to_first_seen_order() {
        let counts = stage_counts(&sample_table(), &FunnelFilter::new(), &[]);
        let ids: Vec<_> = counts.iter().map(|c| c.stage_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn revenue_counts_each_deal_once_by_creation_day() {
        let filter = FunnelFilter::new().pipeline(1).status(DealStatus::Won);
        let revenue = revenue_by_day(&sample_table(), &filter);
        assert_eq!(revenue.len(), 1);
        assert_eq!(revenue[0].date, date(1));
        assert_eq!(revenue[0].revenue, 1500.0);
        assert_eq!(revenue[0].deals, 2);
    }

    #[test]
    fn revenue_by_stage_exit_moves_deals() {
        let filter = FunnelFilter::new()
            .pipeline(1)
            .status(DealStatus::Won)
            .keyed_by(DateKey::StageExit);
        let revenue = revenue_by_day(&sample_table(), &filter);
        let dates: Vec<_> = revenue.iter().map(|d| d.date).collect();
        assert_eq!(dates, vec![date(1), date(3)]);
    }

    #[test]
    fn date_window_is_inclusive() {
        let filter = FunnelFilter::new().between(date(2), date(5));
        let table = filter_table(&sample_table(), &filter);
        assert_eq!(table.deal_count(), 2);
        assert_eq!(table.for_deal(DealId(3)).count(), 3);
    }

    #[test]
    fn owner_filter_limits_deals() {
        let filter = FunnelFilter::new().owner("Bruno");
        let table = filter_table(&sample_table(), &filter);
        assert_eq!(table.deal_count(), 1);
    }

    #[test]
    fn summary_restricts_revenue_to_won() {
        let filter = FunnelFilter::new().pipeline(1).status(DealStatus::Open);
        let summary = FunnelSummary::compute(&sample_table(), &filter, &[]);
        assert_eq!(summary.total_revenue, 1500.0);
        assert_eq!(summary.stage_counts.iter().map(|c| c.current).sum::<usize>(), 1);
        assert_eq!(summary.owners, vec!["Ana".to_string(), "Bruno".to_string()]);
    }

    #[test]
    fn summary_counts_only_open_deals_by_default() {
        let closing = |id: u64, status: DealStatus| {
            Deal::new(DealId(id), day(1))
                .with_value(100.0)
                .with_status(status)
                .with_pipeline(1)
                .with_stage("1", 60)
                .with_stage("7", 60)
        };
        let table = build_funnel(&[
            closing(1, DealStatus::Won),
            closing(2, DealStatus::Lost),
            closing(3, DealStatus::Open),
        ])
        .table;
        let order = [StageId::from("7")];

        let summary = FunnelSummary::compute(&table, &FunnelFilter::new().pipeline(1), &order);
        assert_eq!(summary.stage_counts[0].current, 1);
        assert_eq!(summary.stage_counts[0].reached, 1);
        assert_eq!(summary.total_revenue, 100.0);

        let every = FunnelFilter::new()
            .pipeline(1)
            .status(DealStatus::Won)
            .status(DealStatus::Lost)
            .status(DealStatus::Open);
        let summary = FunnelSummary::compute(&table, &every, &order);
        assert_eq!(summary.stage_counts[0].current, 3);
    }

    #[test]
    fn date_key_parses() {
        assert_eq!("stage_exit".parse::<DateKey>(), Ok(DateKey::StageExit));
        assert!("updated".parse::<DateKey>().is_err());
    }
}
