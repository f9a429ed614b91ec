//! Recent request feed
//!
//! The proxy only ever returns the latest window of requests, and a request can
//! show up again in a later window with new fields (a pending request that has
//! since completed, for example). `FeedState` folds those windows into one
//! newest-first list with a fixed capacity.

use std::collections::VecDeque;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Number of rows kept in a feed unless the caller asks for another capacity.
pub const DEFAULT_FEED_CAPACITY: usize = 150;

/// A single record that could not be decoded.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecordError {
    #[error("request is not a JSON object")]
    NotAnObject,

    #[error("request has no 'id' field")]
    MissingId,

    #[error("request id must be a non-negative integer, got {0}")]
    InvalidId(String),
}

/// A batch of records that could not be decoded.
///
/// A bad record rejects the whole batch so the feed is never half-merged.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FeedError {
    #[error("request at position {index}: {source}")]
    Record {
        index: usize,
        #[source]
        source: RecordError,
    },

    #[error("malformed requests payload: {0}")]
    MalformedEnvelope(String),
}

/// One proxied request as reported by the proxy.
///
/// `fields` holds every attribute except `id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestRecord {
    pub id: u64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RequestRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            fields: Map::new(),
        }
    }

    /// Builder-style helper, mostly for tests and fixtures.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Decode a record from the proxy's JSON representation.
    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        let Value::Object(mut fields) = value else {
            return Err(RecordError::NotAnObject);
        };

        let id = match fields.remove("id") {
            None | Some(Value::Null) => return Err(RecordError::MissingId),
            Some(Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| RecordError::InvalidId(n.to_string()))?,
            Some(other) => return Err(RecordError::InvalidId(other.to_string())),
        };

        Ok(Self { id, fields })
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    fn u64_field(&self, key: &str) -> u64 {
        match self.fields.get(key) {
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
                .unwrap_or(0),
            _ => 0,
        }
    }

    fn flag(&self, key: &str) -> bool {
        match self.fields.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
            _ => false,
        }
    }

    pub fn method(&self) -> Option<&str> {
        self.str_field("method")
    }

    pub fn url(&self) -> Option<&str> {
        self.str_field("URL")
    }

    pub fn remote_host(&self) -> Option<&str> {
        self.str_field("remoteHost")
    }

    pub fn policy_name(&self) -> Option<&str> {
        self.str_field("policyName")
    }

    pub fn rule(&self) -> Option<&str> {
        self.str_field("rule")
    }

    pub fn status(&self) -> Option<&str> {
        self.str_field("status")
    }

    pub fn in_bytes(&self) -> u64 {
        self.u64_field("inBytes")
    }

    pub fn out_bytes(&self) -> u64 {
        self.u64_field("outBytes")
    }

    /// Request start time in unix seconds.
    pub fn start_date(&self) -> Option<f64> {
        self.fields.get("startDate").and_then(Value::as_f64)
    }

    pub fn is_completed(&self) -> bool {
        self.flag("completed")
    }

    pub fn is_failed(&self) -> bool {
        self.flag("failed")
    }

    pub fn notes(&self) -> Vec<&str> {
        self.fields
            .get("notes")
            .and_then(Value::as_array)
            .map(|notes| notes.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Overwrite every non-identifier field present on `incoming`. Returns
    /// whether any value actually changed.
    fn absorb(&mut self, incoming: &RequestRecord) -> bool {
        let mut changed = false;
        for (key, value) in &incoming.fields {
            if self.fields.get(key) != Some(value) {
                self.fields.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }
}

/// Decode a `{ "requests": [...] }` payload.
///
/// A payload without `requests` is an empty batch.
pub fn decode_batch(payload: Value) -> Result<Vec<RequestRecord>, FeedError> {
    let Value::Object(mut envelope) = payload else {
        return Err(FeedError::MalformedEnvelope(
            "expected a JSON object".to_string(),
        ));
    };

    let requests = match envelope.remove("requests") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(FeedError::MalformedEnvelope(format!(
                "'requests' must be an array, got {}",
                json_kind(&other)
            )));
        }
    };

    requests
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            RequestRecord::from_value(value).map_err(|source| FeedError::Record { index, source })
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// What one merge changed. `updated` only lists rows whose fields differ from
/// before. Ids that were inserted or updated and then truncated away only show
/// up in `evicted`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: Vec<u64>,
    pub updated: Vec<u64>,
    pub evicted: Vec<u64>,
}

impl MergeSummary {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.evicted.is_empty()
    }
}

/// Newest-first, deduplicated, capacity-bounded list of request records.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedState {
    records: VecDeque<RequestRecord>,
    capacity: usize,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl FeedState {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_FEED_CAPACITY)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RequestRecord> {
        self.records.get(index)
    }

    pub fn find(&self, id: u64) -> Option<&RequestRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn position(&self, id: u64) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &RequestRecord> + ExactSizeIterator {
        self.records.iter()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.records.iter().map(|r| r.id).collect()
    }

    /// Return a new feed with `batch` merged in. `self` is left untouched.
    pub fn merge(&self, batch: &[RequestRecord]) -> FeedState {
        let mut next = self.clone();
        next.apply(batch);
        next
    }

    /// Merge `batch` (server order, newest first) into this feed.
    ///
    /// Only the first `capacity` records of the batch are considered. They are
    /// walked oldest first: a known id has its fields overwritten in place, an
    /// unknown id goes to the front when it is newer than the current front row
    /// and to the back otherwise. The feed is then cut back to `capacity`.
    pub fn apply(&mut self, batch: &[RequestRecord]) -> MergeSummary {
        let mut summary = MergeSummary::default();
        let window = &batch[..batch.len().min(self.capacity)];

        for incoming in window.iter().rev() {
            if let Some(existing) = self.records.iter_mut().find(|r| r.id == incoming.id) {
                if existing.absorb(incoming) && !summary.updated.contains(&incoming.id) {
                    summary.updated.push(incoming.id);
                }
                continue;
            }

            let newer_than_front = self
                .records
                .front()
                .is_some_and(|front| incoming.id > front.id);
            if newer_than_front {
                self.records.push_front(incoming.clone());
            } else {
                self.records.push_back(incoming.clone());
            }
            summary.inserted.push(incoming.id);
        }

        while self.records.len() > self.capacity {
            if let Some(dropped) = self.records.pop_back() {
                summary.evicted.push(dropped.id);
            }
        }

        if !summary.evicted.is_empty() {
            let evicted = &summary.evicted;
            summary.inserted.retain(|id| !evicted.contains(id));
            summary.updated.retain(|id| !evicted.contains(id));
        }

        summary
    }
}
