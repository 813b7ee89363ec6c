//! File-backed deal source: a JSON array of CRM-shaped deal records.

use super::{DealSource, FetchFuture, FetchedDeals, records_to_deals};
use crate::error::FetchError;
use serde_json::Value;
use std::path::PathBuf;

/// Reads deals from a JSON file on every fetch.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse a JSON array of raw records. Records are not decoded here, so
    /// one odd record never fails the file.
    pub fn parse(bytes: &[u8]) -> Result<Vec<Value>, FetchError> {
        serde_json::from_slice(bytes).map_err(|e| FetchError::MalformedResponse(e.to_string()))
    }

    /// Read and map the file; unmappable records land in
    /// [`FetchedDeals::dropped`].
    pub async fn fetch_deals(&self) -> Result<FetchedDeals, FetchError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| FetchError::Source(format!("'{}': {}", self.path.display(), e)))?;
        Ok(records_to_deals(Self::parse(&bytes)?))
    }
}

impl DealSource for JsonFileSource {
    fn fetch_all_deals(&self) -> FetchFuture<'_> {
        Box::pin(async move { Ok(self.fetch_deals().await?.deals) })
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
