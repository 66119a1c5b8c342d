//! Uniform outcome wrapper for remote calls.
//!
//! Every command reply is a `{"OK": bool, "Value": ..., "Message": ...}`
//! object. The value's shape depends on the command, so it is kept raw here
//! and decoded by the caller against the response shape it expects.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;


// ---------------------------------------------------------------------------
// ResultEnvelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    #[serde(rename = "OK")]
    pub ok: bool,
    #[serde(rename = "Value", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(rename = "Message", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResultEnvelope {
    pub fn success(value: Value) -> Self {
        ResultEnvelope {
            ok: true,
            value: Some(value),
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        ResultEnvelope {
            ok: false,
            value: None,
            message: Some(message.into()),
        }
    }

    /// Parse a raw reply. Anything that is not an envelope becomes a failed
    /// envelope carrying the parse error.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<ResultEnvelope>(raw.trim()) {
            Ok(envelope) => envelope,
            Err(e) => ResultEnvelope::failure(format!("unparsable reply ({}): {}", e, raw.trim())),
        }
    }

    /// `ok` and a value present. A missing value is a failure too.
    pub fn is_ok(&self) -> bool {
        self.ok && self.value.is_some()
    }

    /// Best description of why the call failed.
    pub fn failure_message(&self) -> String {
        match &self.message {
            Some(m) if !m.is_empty() => m.clone(),
            _ => self.to_string(),
        }
    }

    /// Decode the value into the payload a command is expected to return.
    /// `None` when the value is missing or has another shape.
    pub fn decode(&self, expect: Expect) -> Option<Payload> {
        let value = self.value.as_ref()?;
        match expect {
            Expect::Submission => {
                if let Some(id) = value.as_u64() {
                    return Some(Payload::JobId(id));
                }
                let ids = value
                    .as_array()?
                    .iter()
                    .map(|v| v.as_u64())
                    .collect::<Option<Vec<u64>>>()?;
                Some(Payload::JobIds(ids))
            }
            Expect::Statuses => {
                let rows: Vec<(Option<String>, Option<String>, Option<String>, String)> =
                    serde_json::from_value(value.clone()).ok()?;
                Some(Payload::Statuses(
                    rows.into_iter()
                        .map(|(detail, coarse, location, phase)| RemoteStatus {
                            detail: detail.unwrap_or_default(),
                            coarse,
                            location,
                            phase,
                        })
                        .collect(),
                ))
            }
            Expect::OutputInfo => serde_json::from_value(value.clone())
                .ok()
                .map(Payload::OutputInfo),
            Expect::Mapping => serde_json::from_value(value.clone())
                .ok()
                .map(Payload::Mapping),
            Expect::Text => match value {
                Value::String(s) => Some(Payload::Text(s.clone())),
                Value::Null => None,
                other => Some(Payload::Text(other.to_string())),
            },
        }
    }
}

impl fmt::Display for ResultEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => write!(f, "{}", s),
            Err(_) => write!(f, "{{\"OK\": {}}}", self.ok),
        }
    }
}


// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

/// The response shape a command is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// A single job id or a list of ids (bulk submission).
    Submission,
    /// One four-tuple per polled job.
    Statuses,
    /// Output filename -> file descriptor.
    OutputInfo,
    /// Arbitrary string-keyed mapping.
    Mapping,
    /// A scalar rendered as text (timestamps, CPU time, peek output).
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    JobId(u64),
    JobIds(Vec<u64>),
    Statuses(Vec<RemoteStatus>),
    OutputInfo(BTreeMap<String, OutputFileInfo>),
    Mapping(BTreeMap<String, Value>),
    Text(String),
}

/// One row of a batched status reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    /// Minor status / detail text.
    pub detail: String,
    /// Coarse status as the remote service names it.
    pub coarse: Option<String>,
    /// Site / computing element the job ran on.
    pub location: Option<String>,
    /// Canonical phase, mapped onto the local state machine.
    pub phase: String,
}

/// Location metadata for one output file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputFileInfo {
    #[serde(rename = "LFN", default)]
    pub lfn: Option<String>,
    #[serde(rename = "LOCATIONS", default)]
    pub locations: Option<Vec<String>>,
    #[serde(rename = "GUID", default)]
    pub guid: Option<String>,
}
