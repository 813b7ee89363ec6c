//! # CRM Module
//!
//! Where deals come from.
//!
//! [`DealSource`] is the seam between the refresh cache and the outside
//! world: the server uses [`CrmClient`] (paginated HTTP fetch plus per-deal
//! enrichment), the offline `build` command uses [`JsonFileSource`], and
//! tests plug in stubs.

mod client;
mod file;
mod records;

pub use client::CrmClient;
pub use file::JsonFileSource;
pub use records::{
    AdditionalData, DealDetail, DealPage, Pagination, RawDeal, StageStay, decode_record,
    record_id,
};

use crate::error::FetchError;
use funnel_core::{Deal, FunnelError};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// Future returned by [`DealSource::fetch_all_deals`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<Deal>, FetchError>> + Send + 'a>>;

/// A provider of the full current deal set.
///
/// Implementations return every deal in one call; partial results are an
/// error, never a shorter list. Dropping the future abandons the fetch.
pub trait DealSource: Send + Sync {
    /// Fetch every deal.
    fn fetch_all_deals(&self) -> FetchFuture<'_>;

    /// Short description for logs (never includes credentials).
    fn describe(&self) -> String;
}

/// Deals mapped from one batch of raw records.
#[derive(Debug, Clone, Default)]
pub struct FetchedDeals {
    pub deals: Vec<Deal>,
    /// Records that could not be mapped to a deal at all.
    pub dropped: Vec<FunnelError>,
}

impl FetchedDeals {
    /// Raw records seen, mapped or not.
    #[must_use]
    pub fn records(&self) -> usize {
        self.deals.len() + self.dropped.len()
    }
}

/// Map raw records to deals, logging and dropping the ones that cannot be
/// decoded or mapped.
pub fn records_to_deals(records: Vec<Value>) -> FetchedDeals {
    let mut fetched = FetchedDeals::default();
    for record in records {
        match decode_record(record).and_then(RawDeal::into_deal) {
            Ok(deal) => fetched.deals.push(deal),
            Err(e) => {
                log_skipped(&e);
                fetched.dropped.push(e);
            }
        }
    }
    fetched
}

/// Log a deal the pipeline had to skip.
pub fn log_skipped(err: &FunnelError) {
    match err {
        FunnelError::MalformedDeal { deal_id, reason } => {
            tracing::warn!(
                event = "deal_skipped",
                deal_id = deal_id.0,
                reason = %reason,
                "Skipping malformed deal"
            );
        }
        other => tracing::warn!(event = "deal_skipped", error = %other, "Skipping deal"),
    }
}
