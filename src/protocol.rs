//! Wire codec for the Celery message protocol.
//!
//! Task invocations travel as a three-element JSON array (positional args,
//! an always-empty kwargs mapping, and an options object) plus a header set
//! carried as message properties. Results travel back as a flat JSON object.
//! Both directions round-trip through this module symmetrically.

use crate::error::{CourierError, CourierResult};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Protocol-compatibility marker carried in the `lang` header.
///
/// The Python ecosystem expects this literal even from non-Python clients.
pub const PROTOCOL_LANG: &str = "py";

/// Content type of every message body.
pub const CONTENT_TYPE: &str = "application/json";

/// Content encoding of every message body.
pub const CONTENT_ENCODING: &str = "utf-8";

/// A task invocation as it appears on the wire.
///
/// Only positional arguments are supported; the kwargs mapping is always
/// empty in this implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEnvelope {
    /// Positional arguments of the task call
    pub args: Vec<Value>,
}

impl TaskEnvelope {
    /// Create an envelope from positional arguments
    pub fn new(args: Vec<Value>) -> Self {
        Self { args }
    }

    /// Encode as the canonical 3-element array
    pub fn encode(&self) -> CourierResult<Vec<u8>> {
        let payload = json!([
            self.args,
            {},
            {
                "callbacks": null,
                "chain": null,
                "chord": null,
                "errbacks": null,
            }
        ]);
        Ok(serde_json::to_vec(&payload)?)
    }

    /// Decode the canonical 3-element array.
    ///
    /// Any shape violation is a [`CourierError::ProtocolDecode`]; malformed
    /// messages cannot self-heal by redelivery.
    pub fn decode(bytes: &[u8]) -> CourierResult<Self> {
        let payload: Value = serde_json::from_slice(bytes)
            .map_err(|e| CourierError::decode(format!("invalid JSON body: {e}")))?;

        let elements = payload
            .as_array()
            .ok_or_else(|| CourierError::decode("envelope is not an array"))?;
        if elements.len() < 3 {
            return Err(CourierError::decode(format!(
                "envelope has {} elements, expected 3",
                elements.len()
            )));
        }

        let args = elements[0]
            .as_array()
            .ok_or_else(|| CourierError::decode("envelope args is not an array"))?
            .clone();
        if !elements[1].is_object() {
            return Err(CourierError::decode("envelope kwargs is not an object"));
        }

        Ok(Self { args })
    }
}

/// Headers attached to every task message.
///
/// All fields are part of the protocol; `eta`, `expires`, `group` and
/// `timelimit` are carried but not enforced by this implementation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageHeaders {
    /// Task correlation id, unique per submission
    pub id: String,
    /// Fully-qualified task name, `<qualifier>#<method>`
    pub task: String,
    /// Root id of the workflow, same as `id` for plain submissions
    pub root_id: String,
    /// Parent task id, unset for plain submissions
    pub parent_id: Option<String>,
    /// Retry counter, starts at 0
    pub retries: i64,
    /// Earliest execution time, unset
    pub eta: Option<String>,
    /// Expiry time, unset
    pub expires: Option<String>,
    /// Human-readable args for diagnostics
    pub argsrepr: String,
    /// Literal `"{}"`, kwargs are never sent
    pub kwargsrepr: String,
    /// Submitting client identity, `<clientId>@<hostname>`
    pub origin: String,
    /// Protocol-compatibility marker, see [`PROTOCOL_LANG`]
    pub lang: String,
    /// Group id, unset
    pub group: Option<String>,
    /// Soft and hard time limits, both unset
    pub timelimit: (Option<f64>, Option<f64>),
}

impl MessageHeaders {
    /// Build the header set for a fresh submission
    pub fn new(
        task_id: impl Into<String>,
        task_name: impl Into<String>,
        argsrepr: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        let id = task_id.into();
        Self {
            root_id: id.clone(),
            id,
            task: task_name.into(),
            parent_id: None,
            retries: 0,
            eta: None,
            expires: None,
            argsrepr: argsrepr.into(),
            kwargsrepr: "{}".to_string(),
            origin: origin.into(),
            lang: PROTOCOL_LANG.to_string(),
            group: None,
            timelimit: (None, None),
        }
    }
}

/// Human-readable rendition of positional args for the `argsrepr` header.
pub fn args_repr(args: &[Value]) -> String {
    let joined = args
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("({joined})")
}

/// Terminal status of a task run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResultStatus {
    /// The task ran to completion
    #[serde(rename = "SUCCESS")]
    Success,
    /// The task could not be dispatched or its body failed
    #[serde(rename = "FAILURE")]
    Failure,
}

/// DTO representing a task result on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    /// Child task ids, always empty here
    pub children: Vec<Value>,
    /// Terminal status
    pub status: ResultStatus,
    /// Success payload, or `{exc_type, exc_message}` on failure
    pub result: Value,
    /// Traceback, always null here
    pub traceback: Value,
    /// Correlation id of the originating task
    pub task_id: String,
}

impl TaskResult {
    /// A successful result carrying the task's return value
    pub fn success(task_id: impl Into<String>, result: Value) -> Self {
        Self {
            children: Vec::new(),
            status: ResultStatus::Success,
            result,
            traceback: Value::Null,
            task_id: task_id.into(),
        }
    }

    /// A failure result carrying the error kind and message
    pub fn failure(
        task_id: impl Into<String>,
        exc_type: impl Into<String>,
        exc_message: impl Into<String>,
    ) -> Self {
        Self {
            children: Vec::new(),
            status: ResultStatus::Failure,
            result: json!({
                "exc_type": exc_type.into(),
                "exc_message": exc_message.into(),
            }),
            traceback: Value::Null,
            task_id: task_id.into(),
        }
    }

    /// Encode as JSON bytes
    pub fn encode(&self) -> CourierResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON bytes
    pub fn decode(bytes: &[u8]) -> CourierResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| CourierError::decode(format!("invalid result body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_encodes_three_elements() {
        let envelope = TaskEnvelope::new(vec![json!(1), json!(2)]);
        let bytes = envelope.encode().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        let elements = value.as_array().unwrap();
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0], json!([1, 2]));
        assert_eq!(elements[1], json!({}));
        assert_eq!(
            elements[2],
            json!({"callbacks": null, "chain": null, "chord": null, "errbacks": null})
        );
    }

    #[test]
    fn envelope_round_trips() {
        let envelope = TaskEnvelope::new(vec![json!("a"), json!([1, 2]), json!({"k": true})]);
        let decoded = TaskEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn envelope_rejects_malformed_bodies() {
        assert!(matches!(
            TaskEnvelope::decode(b"not json"),
            Err(CourierError::ProtocolDecode { .. })
        ));
        assert!(matches!(
            TaskEnvelope::decode(b"{\"args\": []}"),
            Err(CourierError::ProtocolDecode { .. })
        ));
        assert!(matches!(
            TaskEnvelope::decode(b"[[1, 2]]"),
            Err(CourierError::ProtocolDecode { .. })
        ));
        assert!(matches!(
            TaskEnvelope::decode(b"[{}, {}, {}]"),
            Err(CourierError::ProtocolDecode { .. })
        ));
    }

    #[test]
    fn headers_carry_protocol_defaults() {
        let headers = MessageHeaders::new("id-1", "tasks.Calc#add", "(1, 2)", "client@host");
        assert_eq!(headers.root_id, "id-1");
        assert_eq!(headers.retries, 0);
        assert_eq!(headers.kwargsrepr, "{}");
        assert_eq!(headers.lang, "py");
        assert_eq!(headers.parent_id, None);
        assert_eq!(headers.timelimit, (None, None));
    }

    #[test]
    fn args_repr_is_human_readable() {
        assert_eq!(args_repr(&[json!(1), json!("x")]), "(1, \"x\")");
        assert_eq!(args_repr(&[]), "()");
    }

    #[test]
    fn result_round_trips() {
        let result = TaskResult::success("task-1", json!(42));
        let decoded = TaskResult::decode(&result.encode().unwrap()).unwrap();
        assert_eq!(decoded.status, ResultStatus::Success);
        assert_eq!(decoded.result, json!(42));
        assert_eq!(decoded.task_id, "task-1");
    }

    #[test]
    fn failure_result_carries_exception_info() {
        let result = TaskResult::failure("task-2", "DispatchError", "not registered");
        let decoded = TaskResult::decode(&result.encode().unwrap()).unwrap();
        assert_eq!(decoded.status, ResultStatus::Failure);
        assert_eq!(decoded.result["exc_type"], "DispatchError");
        assert_eq!(decoded.result["exc_message"], "not registered");
    }

    #[test]
    fn result_wire_field_names_match_the_protocol() {
        let result = TaskResult::success("task-3", json!(null));
        let value: Value = serde_json::from_slice(&result.encode().unwrap()).unwrap();
        assert_eq!(value["status"], "SUCCESS");
        assert_eq!(value["task_id"], "task-3");
        assert_eq!(value["children"], json!([]));
        assert_eq!(value["traceback"], Value::Null);
    }
}
