//! Topic router: turns a bus command into a tagged device command.
//!
//! Routing happens in two steps:
//!
//! 1. **Normalize** the payload according to the topic.  Interval topics must
//!    carry an integer `interval`, which is raised to [`INTERVAL_FLOOR`] if it
//!    is lower.  Threshold topics and unrecognized topics are left untouched.
//! 2. **Tag** the payload by writing the [`CommandKind`] tag into `id`,
//!    replacing whatever `id` the publisher may have put there.
//!
//! The floor is a device-safety limit: the firmware cannot sample or transmit
//! faster than every 5 seconds without starving its radio, so lower values are
//! raised rather than rejected.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::protocol::codec::encode_line;
use crate::protocol::messages::{CommandKind, JsonObject, ID_FIELD};
use crate::routing::topics::TopicTable;

/// Name of the field carrying the interval on interval topics.
pub const INTERVAL_FIELD: &str = "interval";

/// Smallest interval (in seconds) the device accepts.
pub const INTERVAL_FLOOR: i64 = 5;

/// A command on a recognized topic whose payload does not satisfy the topic's
/// rules.  The command is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is absent.
    #[error("{kind} command on '{topic}' is missing required field '{field}'")]
    MissingField {
        topic: String,
        kind: CommandKind,
        field: &'static str,
    },

    /// A required field is present but has the wrong type.
    #[error("{kind} command on '{topic}' has invalid '{field}': {reason}")]
    InvalidField {
        topic: String,
        kind: CommandKind,
        field: &'static str,
        reason: String,
    },
}

/// A command ready to be written to the device.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedCommand {
    /// The kind the topic mapped to.
    pub kind: CommandKind,
    /// The normalized payload, including the `id` tag.
    pub payload: JsonObject,
}

impl RoutedCommand {
    /// Encodes the command as one serial line.
    pub fn encode(&self) -> Vec<u8> {
        encode_line(&self.payload)
    }
}

// ── Typed interval ────────────────────────────────────────────────────────────

/// An `interval` value after type validation.
///
/// JSON integers above `i64::MAX` are kept as `u64` so no publisher-supplied
/// value is ever truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntervalValue {
    Signed(i64),
    Unsigned(u64),
}

impl IntervalValue {
    fn parse(value: &Value) -> Result<Self, String> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(IntervalValue::Signed)
                .or_else(|| n.as_u64().map(IntervalValue::Unsigned))
                .ok_or_else(|| format!("expected an integer, found {n}")),
            Value::Null => Err("expected an integer, found null".to_string()),
            Value::Bool(b) => Err(format!("expected an integer, found {b}")),
            Value::String(s) => Err(format!("expected an integer, found string {s:?}")),
            Value::Array(_) => Err("expected an integer, found an array".to_string()),
            Value::Object(_) => Err("expected an integer, found an object".to_string()),
        }
    }

    /// Applies the device floor.  Returns the value to write and whether it
    /// was raised.
    fn floored(self) -> (Value, bool) {
        match self {
            IntervalValue::Signed(v) if v < INTERVAL_FLOOR => (Value::from(INTERVAL_FLOOR), true),
            IntervalValue::Signed(v) => (Value::from(v), false),
            IntervalValue::Unsigned(v) => (Value::from(v), false),
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Routes a bus payload received on `topic` into a tagged device command.
///
/// # Errors
///
/// Returns [`ValidationError`] if `topic` is an interval topic and the payload
/// has no `interval` field, or the field is not an integer.
///
/// # Examples
///
/// ```rust
/// use iot_bridge_core::{route, TopicTable};
/// use serde_json::json;
///
/// let table = TopicTable::default();
/// let payload = json!({"value": 10}).as_object().cloned().unwrap();
/// let cmd = route(&table, "d:/group5.iot/minimum_threshold", payload).unwrap();
/// assert_eq!(cmd.encode(), b"{\"value\":10,\"id\":3}\n");
/// ```
pub fn route(
    table: &TopicTable,
    topic: &str,
    mut payload: JsonObject,
) -> Result<RoutedCommand, ValidationError> {
    let kind = table.kind_for(topic);

    if kind.requires_interval() {
        let raw = payload
            .get(INTERVAL_FIELD)
            .ok_or_else(|| ValidationError::MissingField {
                topic: topic.to_string(),
                kind,
                field: INTERVAL_FIELD,
            })?;

        let interval =
            IntervalValue::parse(raw).map_err(|reason| ValidationError::InvalidField {
                topic: topic.to_string(),
                kind,
                field: INTERVAL_FIELD,
                reason,
            })?;

        let (value, raised) = interval.floored();
        if raised {
            debug!("{kind}: interval {raw} below floor, raised to {INTERVAL_FLOOR}");
        }
        payload.insert(INTERVAL_FIELD.to_string(), value);
    }

    // `insert` on an existing key replaces the value in place, so a
    // publisher-supplied `id` keeps its position but never its value.
    payload.insert(ID_FIELD.to_string(), Value::from(kind.tag()));

    Ok(RoutedCommand { kind, payload })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
