//! Wire types exchanged with the remote analysis service.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::error::SessionError;
use crate::subtask::SubtaskName;

/// Opaque identifier of one remote analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Validate and wrap a job identifier. Blank identifiers are rejected;
    /// anything else is kept exactly as given.
    pub fn new(id: impl Into<String>) -> Result<Self, SessionError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(SessionError::InvalidJobId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Watermark of how much of the result stream has been consumed.
///
/// Servers send either a string or a number; both are kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether moving from `current` to `self` would rewind the stream.
    ///
    /// Only numeric watermarks can be compared; anything else is trusted.
    pub fn rewinds(&self, current: &Cursor) -> bool {
        match (self.0.parse::<f64>(), current.0.parse::<f64>()) {
            (Ok(next), Ok(prev)) => next < prev,
            _ => false,
        }
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawCursor {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match RawCursor::deserialize(deserializer)? {
            RawCursor::Text(s) => Cursor(s),
            RawCursor::Number(n) => Cursor(n.to_string()),
        })
    }
}

/// Server-side steering of the polling cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recommendation {
    Aggressive,
    Moderate,
    Gentle,
    /// No more results will be produced for this run.
    Stop,
    /// A value this client does not know; treated like an absent hint.
    Unrecognized(String),
}

impl From<String> for Recommendation {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "aggressive" => Self::Aggressive,
            "moderate" => Self::Moderate,
            "gentle" => Self::Gentle,
            "stop" => Self::Stop,
            _ => Self::Unrecognized(raw),
        }
    }
}

impl From<Recommendation> for String {
    fn from(rec: Recommendation) -> Self {
        match rec {
            Recommendation::Aggressive => "aggressive".to_string(),
            Recommendation::Moderate => "moderate".to_string(),
            Recommendation::Gentle => "gentle".to_string(),
            Recommendation::Stop => "stop".to_string(),
            Recommendation::Unrecognized(raw) => raw,
        }
    }
}

/// Scheduling block of a fetch response. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_subtasks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_subtasks: Option<u32>,
}

/// One response of the results endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    #[serde(default)]
    pub new_results: BTreeMap<SubtaskName, serde_json::Value>,
    #[serde(default)]
    pub next_cursor: Option<Cursor>,
    #[serde(default)]
    pub scheduling: Option<SchedulingHints>,
}

impl FetchResponse {
    pub fn recommendation(&self) -> Option<&Recommendation> {
        self.scheduling.as_ref().and_then(|s| s.recommendation.as_ref())
    }

    pub fn is_stop(&self) -> bool {
        matches!(self.recommendation(), Some(Recommendation::Stop))
    }
}

/// A subtask whose payload could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeFailure {
    pub subtask: SubtaskName,
    pub reason: String,
}

/// Payloads that decoded cleanly, plus the ones that did not.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub payloads: BTreeMap<SubtaskName, serde_json::Value>,
    pub failures: Vec<DecodeFailure>,
}

/// Decode raw payloads from a fetch response.
///
/// Payloads arrive either as JSON values or as JSON-encoded strings. A null
/// payload or a string that is not valid JSON is a failure for that subtask
/// only; the rest of the batch is kept.
pub fn decode_results(raw: BTreeMap<SubtaskName, serde_json::Value>) -> DecodedBatch {
    let mut batch = DecodedBatch::default();

    for (subtask, value) in raw {
        let decoded = match value {
            serde_json::Value::Null => Err("payload is null".to_string()),
            serde_json::Value::String(encoded) => {
                serde_json::from_str::<serde_json::Value>(&encoded).map_err(|e| e.to_string())
            }
            other => Ok(other),
        };

        match decoded {
            Ok(payload) => {
                batch.payloads.insert(subtask, payload);
            }
            Err(reason) => {
                warn!(subtask = %subtask, reason = %reason, "Failed to decode subtask payload, leaving pending");
                batch.failures.push(DecodeFailure { subtask, reason });
            }
        }
    }

    batch
}
