//! # Funnel Table
//!
//! The flat, per-stage-interval view of all deals.
//!
//! A table is built in one pass and then treated as immutable: refreshes
//! produce a new table rather than editing an existing one.

use crate::{DealId, StageInterval};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ordered sequence of stage intervals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunnelTable {
    rows: Vec<StageInterval>,
}

impl FunnelTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table from rows, keeping their order.
    #[must_use]
    pub fn from_rows(rows: Vec<StageInterval>) -> Self {
        Self { rows }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All rows, in table order.
    #[must_use]
    pub fn rows(&self) -> &[StageInterval] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StageInterval> {
        self.rows.iter()
    }

    /// Rows of a single deal, in traversal order.
    pub fn for_deal(&self, deal_id: DealId) -> impl Iterator<Item = &StageInterval> {
        self.rows.iter().filter(move |r| r.deal_id == deal_id)
    }

    /// Number of distinct deals with at least one row.
    #[must_use]
    pub fn deal_count(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.deal_id)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Keep only rows matching `predicate`, preserving order.
    #[must_use]
    pub fn filtered<F>(&self, predicate: F) -> Self
    where
        F: Fn(&StageInterval) -> bool,
    {
        Self {
            rows: self.rows.iter().filter(|r| predicate(r)).cloned().collect(),
        }
    }

    /// Consume the table, returning its rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<StageInterval> {
        self.rows
    }
}

impl<'a> IntoIterator for &'a FunnelTable {
    type Item = &'a StageInterval;
    type IntoIter = std::slice::Iter<'a, StageInterval>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

impl FromIterator<StageInterval> for FunnelTable {
    fn from_iter<I: IntoIterator<Item = StageInterval>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}
