//! # CRM HTTP Client
//!
//! Fetches the full deal set from the CRM REST API.
//!
//! - `GET {base}/deals?api_token=..&limit=..&start=..` page by page until a
//!   page is empty or the CRM reports no more items
//! - with enrichment on, `GET {base}/deals/{id}` for each deal to obtain its
//!   stage history
//!
//! One failed request fails the whole fetch; a partial deal list is never
//! returned.

use super::records::{DealDetail, DealPage, record_id};
use super::{DealSource, FetchFuture, FetchedDeals, records_to_deals};
use crate::config::CrmSettings;
use crate::error::FetchError;
use funnel_core::DealId;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Instant;

/// Longest error body kept in a `FetchError::Status`.
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for the CRM deal endpoints.
#[derive(Clone)]
pub struct CrmClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
    page_limit: u32,
    enrich: bool,
}

impl CrmClient {
    /// Create a client from the `[crm]` settings.
    pub fn new(settings: &CrmSettings, api_token: impl Into<String>) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| FetchError::ConnectionFailed(format!("HTTP client setup: {e}")))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            page_limit: settings.page_limit,
            enrich: settings.enrich,
        })
    }

    /// GET `path` with the token and `query`, decoding a JSON body.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .query(&[("api_token", self.api_token.as_str())])
            .query(query)
            .send()
            .await
            .map_err(|e| match FetchError::from(e) {
                FetchError::ConnectionFailed(msg) => {
                    FetchError::ConnectionFailed(format!("{} ({msg})", self.base_url))
                }
                other => other,
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            if let Some((cut, _)) = body.char_indices().nth(MAX_ERROR_BODY) {
                body.truncate(cut);
            }
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| FetchError::MalformedResponse(e.without_url().to_string()))
    }

    /// One page of the deal list.
    pub async fn fetch_page(&self, start: u64) -> Result<DealPage, FetchError> {
        self.get_json(
            "/deals",
            &[
                ("limit", self.page_limit.to_string()),
                ("start", start.to_string()),
            ],
        )
        .await
    }

    /// The raw detail record of one deal, if the CRM has one.
    pub async fn fetch_deal_detail(&self, id: DealId) -> Result<Option<Value>, FetchError> {
        let detail: DealDetail = self.get_json(&format!("/deals/{id}"), &[]).await?;
        Ok(detail.data.filter(|d| !d.is_null()))
    }

    /// Every raw record of the deal list, across all pages.
    pub async fn fetch_listed_deals(&self) -> Result<Vec<Value>, FetchError> {
        let step = u64::from(self.page_limit);
        let mut records = Vec::new();
        let mut start = 0u64;
        let mut pages = 0u32;

        loop {
            let page = self.fetch_page(start).await?;
            pages += 1;
            let more = page.more_items();
            let next = page.next_start();
            let data = page.data.unwrap_or_default();

            tracing::debug!(start, records = data.len(), more, "Fetched deal page");
            if data.is_empty() {
                break;
            }
            records.extend(data);
            if !more {
                break;
            }
            start = next.filter(|n| *n > start).unwrap_or(start + step);
        }

        tracing::debug!(pages, records = records.len(), "Deal list complete");
        Ok(records)
    }

    /// Replace each listed record with its detail record.
    async fn enrich_records(&self, listed: Vec<Value>) -> Result<Vec<Value>, FetchError> {
        let mut enriched = Vec::with_capacity(listed.len());
        for record in listed {
            let Some(id) = record_id(&record) else {
                enriched.push(record);
                continue;
            };
            match self.fetch_deal_detail(DealId(id)).await? {
                Some(detail) => enriched.push(detail),
                None => {
                    tracing::debug!(deal_id = id, "No detail record, keeping list entry");
                    enriched.push(record);
                }
            }
        }
        Ok(enriched)
    }

    /// Listed records, enriched when configured.
    pub async fn fetch_records(&self) -> Result<Vec<Value>, FetchError> {
        let listed = self.fetch_listed_deals().await?;
        if self.enrich {
            self.enrich_records(listed).await
        } else {
            Ok(listed)
        }
    }

    /// Every record, mapped to deals; unmappable records are reported in
    /// [`FetchedDeals::dropped`].
    pub async fn fetch_deals(&self) -> Result<FetchedDeals, FetchError> {
        let started = Instant::now();
        let fetched = records_to_deals(self.fetch_records().await?);

        tracing::info!(
            event = "crm_fetch",
            records = fetched.records(),
            deals = fetched.deals.len(),
            dropped = fetched.dropped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched deals from CRM"
        );
        Ok(fetched)
    }
}

impl DealSource for CrmClient {
    fn fetch_all_deals(&self) -> FetchFuture<'_> {
        Box::pin(async move { Ok(self.fetch_deals().await?.deals) })
    }

    fn describe(&self) -> String {
        format!("CRM at {}", self.base_url)
    }
}
