//! # CRM Wire Records
//!
//! JSON shapes of the CRM's deal endpoints and their mapping into
//! [`funnel_core::Deal`].
//!
//! The stage history lives in `stay_in_pipeline_stages` on the detail
//! record: `times_in_stages` maps stage id to seconds, `order_of_stages`
//! lists the traversal order. Offline files may instead carry an explicit
//! `stage_durations` object, read in document order.

use chrono::SubsecRound;
use funnel_core::{
    Deal, DealId, DealStatus, FunnelError, MalformedReason, StageDuration, StageId,
    parse_timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// ENVELOPES
// =============================================================================

/// `GET /deals` response.
///
/// Records stay as raw JSON here; each one is decoded on its own by
/// [`decode_record`] so a single odd record cannot fail the page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DealPage {
    #[serde(default)]
    pub success: bool,
    /// `null` when the collection is exhausted.
    #[serde(default)]
    pub data: Option<Vec<Value>>,
    #[serde(default)]
    pub additional_data: Option<AdditionalData>,
}

impl DealPage {
    /// Whether the CRM reports more records after this page.
    #[must_use]
    pub fn more_items(&self) -> bool {
        self.additional_data
            .as_ref()
            .and_then(|a| a.pagination.as_ref())
            .is_some_and(|p| p.more_items_in_collection)
    }

    /// Start offset the CRM suggests for the next page, if any.
    #[must_use]
    pub fn next_start(&self) -> Option<u64> {
        self.additional_data
            .as_ref()
            .and_then(|a| a.pagination.as_ref())
            .and_then(|p| p.next_start)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdditionalData {
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub more_items_in_collection: bool,
    #[serde(default)]
    pub next_start: Option<u64>,
}

/// `GET /deals/{id}` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DealDetail {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Id of a raw record, for error reports. `0` when absent.
#[must_use]
pub fn record_id(record: &Value) -> Option<u64> {
    record.get("id").and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    })
}

/// Decode one raw record. A shape error rejects this record only.
pub fn decode_record(record: Value) -> Result<RawDeal, FunnelError> {
    let id = DealId(record_id(&record).unwrap_or(0));
    serde_json::from_value(record)
        .map_err(|e| FunnelError::malformed(id, MalformedReason::Unparseable(e.to_string())))
}

// =============================================================================
// RAW DEAL
// =============================================================================

/// A deal record as the CRM sends it. Unknown fields are ignored.
///
/// Fields the CRM is loose about (`value`, the stage history blocks) are kept
/// as JSON and interpreted in [`RawDeal::into_deal`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDeal {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub add_time: Option<String>,
    /// A number, a numeric string, or `null`.
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub owner_name: Option<String>,
    /// Either a bare user id or an object carrying `name`.
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub pipeline_id: Option<i64>,
    #[serde(default)]
    pub lost_reason: Option<String>,
    #[serde(default)]
    pub stay_in_pipeline_stages: Option<Value>,
    #[serde(default)]
    pub stage_durations: Option<Value>,
}

/// Stage history block of a detail record.
///
/// The CRM sends an empty array instead of an empty object, and `null` for
/// missing lists; both read as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageStay {
    #[serde(default)]
    pub times_in_stages: Value,
    #[serde(default)]
    pub order_of_stages: Value,
}

impl StageStay {
    fn from_json(value: &Value) -> Result<Option<Self>, String> {
        match value {
            Value::Null => Ok(None),
            Value::Array(items) if items.is_empty() => Ok(None),
            Value::Object(_) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| format!("stay_in_pipeline_stages: {e}")),
            _ => Err("stay_in_pipeline_stages is not an object".into()),
        }
    }
}

/// Object view of a stage-to-seconds map; `null` and `[]` are empty.
fn stage_map<'a>(value: &'a Value, field: &str) -> Result<Option<&'a Map<String, Value>>, String> {
    match value {
        Value::Object(map) => Ok(Some(map)),
        Value::Null => Ok(None),
        Value::Array(items) if items.is_empty() => Ok(None),
        _ => Err(format!("{field} is not an object")),
    }
}

impl RawDeal {
    /// Owner from `owner_name`, falling back to `user_id.name`.
    fn owner(&self) -> Option<String> {
        self.owner_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| {
                self.user_id
                    .as_ref()
                    .and_then(|u| u.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
    }

    /// Deal value from a number or a numeric string.
    fn amount(&self) -> Result<Option<f64>, String> {
        match &self.value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| format!("non-numeric value {s:?}")),
            Some(other) => Err(format!("non-numeric value {other}")),
        }
    }

    /// Stage durations in traversal order.
    ///
    /// With `order_of_stages`, listed stages come first in that order and any
    /// remaining timed stages follow in document order.
    fn ordered_durations(&self) -> Result<Vec<StageDuration>, String> {
        let stay = match &self.stay_in_pipeline_stages {
            Some(value) => StageStay::from_json(value)?,
            None => None,
        };

        let (times, order) = match (&stay, &self.stage_durations) {
            (Some(stay), _) => (
                stage_map(&stay.times_in_stages, "times_in_stages")?,
                stay.order_of_stages.as_array().map(Vec::as_slice),
            ),
            (None, Some(explicit)) => (stage_map(explicit, "stage_durations")?, None),
            (None, None) => (None, None),
        };
        let Some(times) = times else {
            return Ok(Vec::new());
        };

        let mut keys: Vec<String> = order
            .unwrap_or_default()
            .iter()
            .filter_map(stage_key)
            .filter(|k| times.contains_key(k))
            .collect();
        for key in times.keys() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }

        keys.into_iter()
            .map(|key| {
                let seconds = times
                    .get(&key)
                    .and_then(as_seconds)
                    .ok_or_else(|| format!("non-numeric duration for stage {key}"))?;
                Ok(StageDuration::new(StageId::new(key), seconds))
            })
            .collect()
    }

    /// Map into a core [`Deal`].
    ///
    /// Fails only when the record cannot identify or place the deal (no id,
    /// bad `add_time`, unknown status, non-numeric value or durations).
    /// Missing value or status pass through and are rejected by the builder.
    pub fn into_deal(self) -> Result<Deal, FunnelError> {
        let unparseable = |id: DealId, msg: String| {
            FunnelError::malformed(id, MalformedReason::Unparseable(msg))
        };

        let id = DealId(
            self.id
                .ok_or_else(|| unparseable(DealId(0), "record has no id".into()))?,
        );

        // CSV persistence keeps whole seconds; truncate here so a reloaded
        // row merges with a freshly fetched one.
        let add_time = match self.add_time.as_deref() {
            Some(raw) => parse_timestamp(raw)
                .map_err(|e| unparseable(id, e.to_string()))?
                .trunc_subsecs(0),
            None => return Err(unparseable(id, "missing add_time".into())),
        };

        let status = match self.status.as_deref() {
            Some(raw) => Some(
                raw.parse::<DealStatus>()
                    .map_err(|e| unparseable(id, e.to_string()))?,
            ),
            None => None,
        };

        let value = self.amount().map_err(|msg| unparseable(id, msg))?;
        let stage_durations = self.ordered_durations().map_err(|msg| unparseable(id, msg))?;
        let owner_name = self.owner();

        Ok(Deal {
            id,
            add_time,
            value,
            status,
            owner_name,
            pipeline_id: self.pipeline_id,
            lost_reason: self.lost_reason.filter(|r| !r.trim().is_empty()),
            stage_durations,
        })
    }
}

/// Stage ids in `order_of_stages` arrive as numbers or strings.
fn stage_key(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Whole seconds from an integer or float JSON number.
fn as_seconds(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64))
}

// =============================================================================
// TESTS
// =============================================================================
