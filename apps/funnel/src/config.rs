//! # Configuration
//!
//! `funnel.toml` deserialized with serde, then overridden from the
//! environment. Every field has a default, so an absent file is a valid
//! configuration (minus the CRM token, which only commands that talk to
//! the CRM require).
//!
//! ## Environment Overrides
//!
//! - `FUNNEL_API_TOKEN`: CRM API token
//! - `FUNNEL_CRM_URL`: CRM base URL
//! - `FUNNEL_STALENESS_SECS`: staleness threshold
//! - `FUNNEL_REFRESH_INTERVAL_SECS`: timer period
//! - `FUNNEL_CSV_PATH`: CSV file merged on every successful refresh
//! - `FUNNEL_API_KEY`: bearer key for the HTTP API
//! - `FUNNEL_CORS_ORIGINS`: comma-separated origins, or `*`

use crate::error::AppError;
use funnel_core::primitives::{
    DEFAULT_PAGE_LIMIT, DEFAULT_REPORT_WINDOW_DAYS, DEFAULT_STALENESS_SECS,
};
use funnel_core::{DateKey, StageId};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pipedrive v1 API root.
pub const DEFAULT_CRM_URL: &str = "https://api.pipedrive.com/api/v1";

/// Seconds before a CRM request is abandoned.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// SECTIONS
// =============================================================================

/// `[crm]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrmSettings {
    pub base_url: String,
    /// Read from `FUNNEL_API_TOKEN`; never written back out.
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    pub page_limit: u32,
    /// Fetch each deal's detail record for its stage history.
    pub enrich: bool,
    pub timeout_secs: u64,
}

impl Default for CrmSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CRM_URL.to_string(),
            api_token: None,
            page_limit: DEFAULT_PAGE_LIMIT,
            enrich: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl CrmSettings {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[cache]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub staleness_secs: u64,
    pub refresh_interval_secs: u64,
    pub csv_path: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            staleness_secs: DEFAULT_STALENESS_SECS,
            refresh_interval_secs: DEFAULT_STALENESS_SECS,
            csv_path: None,
        }
    }
}

impl CacheSettings {
    #[must_use]
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// A pipeline stage with its display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLabel {
    #[serde(deserialize_with = "stage_id_from_any")]
    pub id: StageId,
    pub label: String,
}

impl StageLabel {
    fn new(id: u64, label: &str) -> Self {
        Self {
            id: StageId::from(id),
            label: label.to_string(),
        }
    }
}

/// `[report]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub date_key: DateKey,
    /// Pipeline shown when a request names none.
    pub pipeline_id: Option<i64>,
    /// Summary window when a request gives no dates.
    pub window_days: i64,
    /// Reported stages, in funnel order.
    pub stages: Vec<StageLabel>,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            date_key: DateKey::Created,
            pipeline_id: Some(1),
            window_days: DEFAULT_REPORT_WINDOW_DAYS,
            stages: vec![
                StageLabel::new(1, "Not started"),
                StageLabel::new(2, "Started"),
                StageLabel::new(3, "Scheduled"),
                StageLabel::new(5, "Proposal"),
                StageLabel::new(6, "Negotiation"),
                StageLabel::new(7, "Closing"),
            ],
        }
    }
}

impl ReportSettings {
    /// Stage ids in funnel order.
    #[must_use]
    pub fn stage_order(&self) -> Vec<StageId> {
        self.stages.iter().map(|s| s.id.clone()).collect()
    }

    /// Display label of a stage, if configured.
    #[must_use]
    pub fn label(&self, id: &StageId) -> Option<&str> {
        self.stages
            .iter()
            .find(|s| &s.id == id)
            .map(|s| s.label.as_str())
    }
}

/// `[api]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Empty means localhost only.
    pub cors_origins: Vec<String>,
}

// =============================================================================
// CONFIG
// =============================================================================

/// Whole configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crm: CrmSettings,
    pub cache: CacheSettings,
    pub report: ReportSettings,
    pub api: ApiSettings,
}

impl Config {
    /// Load the TOML file (if given), apply environment overrides, validate.
    ///
    /// An explicitly given path must exist; without one, `funnel.toml` in the
    /// working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default = Path::new("funnel.toml");
                if default.is_file() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, AppError> {
        toml::from_str(text).map_err(|e| AppError::Config(e.to_string()))
    }

    /// Apply environment overrides through `lookup` (empty values are ignored).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("FUNNEL_API_TOKEN") {
            self.crm.api_token = Some(token);
        }
        if let Some(url) = get("FUNNEL_CRM_URL") {
            self.crm.base_url = url;
        }
        if let Some(secs) = get("FUNNEL_STALENESS_SECS") {
            self.cache.staleness_secs = parse_secs("FUNNEL_STALENESS_SECS", &secs)?;
        }
        if let Some(secs) = get("FUNNEL_REFRESH_INTERVAL_SECS") {
            self.cache.refresh_interval_secs =
                parse_secs("FUNNEL_REFRESH_INTERVAL_SECS", &secs)?;
        }
        if let Some(path) = get("FUNNEL_CSV_PATH") {
            self.cache.csv_path = Some(PathBuf::from(path));
        }
        if let Some(key) = get("FUNNEL_API_KEY") {
            self.api.api_key = Some(key);
        }
        if let Some(origins) = get("FUNNEL_CORS_ORIGINS") {
            self.api.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        Ok(())
    }

    /// Reject values that would stall or spin the fetcher and cache.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.crm.page_limit == 0 {
            return Err(AppError::Config("crm.page_limit must be > 0".into()));
        }
        if self.crm.timeout_secs == 0 {
            return Err(AppError::Config("crm.timeout_secs must be > 0".into()));
        }
        if self.cache.staleness_secs == 0 {
            return Err(AppError::Config("cache.staleness_secs must be > 0".into()));
        }
        if self.cache.refresh_interval_secs == 0 {
            return Err(AppError::Config(
                "cache.refresh_interval_secs must be > 0".into(),
            ));
        }
        if self.report.window_days <= 0 {
            return Err(AppError::Config("report.window_days must be > 0".into()));
        }
        if self.crm.base_url.trim().is_empty() {
            return Err(AppError::Config("crm.base_url must not be empty".into()));
        }
        Ok(())
    }

    /// The CRM token, or a configuration error naming where to set it.
    pub fn require_api_token(&self) -> Result<&str, AppError> {
        self.crm
            .api_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Config("FUNNEL_API_TOKEN is not set".into()))
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{key} must be a whole number of seconds")))
}

/// Stage ids may be written as `2` or `"2"`.
fn stage_id_from_any<'de, D>(deserializer: D) -> Result<StageId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Int(n) => StageId::from(n),
        Raw::Text(s) => StageId::new(s),
    })
}

// =============================================================================
// TESTS
// =============================================================================
