//! Message vocabulary shared by the bridge and the device firmware.
//!
//! Every object crossing the serial link carries an integer `id` field that
//! tells the receiver what the object is:
//!
//! | `id` | Direction       | Meaning                    |
//! |------|-----------------|----------------------------|
//! | 1    | bridge → device | sampling interval          |
//! | 2    | bridge → device | communication interval     |
//! | 3    | bridge → device | minimum threshold          |
//! | 4    | bridge → device | maximum threshold          |
//! | -1   | bridge → device | unrecognized bus topic     |
//! | 5    | device → bridge | telemetry sample           |
//!
//! Objects are kept as dynamic JSON maps ([`JsonObject`]) because the device
//! owns the set of telemetry fields and the bridge forwards them untouched.

use std::fmt;

use serde_json::{Map, Value};

/// A JSON object with keys kept in insertion order.
pub type JsonObject = Map<String, Value>;

/// Name of the tag field on every serial line.
pub const ID_FIELD: &str = "id";

/// Name of the field the bridge adds to telemetry before publishing it.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Tag value the device uses to mark a line as telemetry.
pub const TELEMETRY_TAG: i64 = 5;

// ── Command kinds ─────────────────────────────────────────────────────────────

/// The configuration value a command carries, as seen by the device.
///
/// [`CommandKind::Unknown`] is not an error: commands arriving on topics the
/// bridge does not recognize are still forwarded, tagged `-1`, so newer
/// firmware can act on them before the bridge learns about them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SamplingInterval,
    CommunicationInterval,
    MinimumThreshold,
    MaximumThreshold,
    Unknown,
}

impl CommandKind {
    /// The four kinds that have a dedicated bus topic.
    pub const RECOGNIZED: [CommandKind; 4] = [
        CommandKind::SamplingInterval,
        CommandKind::CommunicationInterval,
        CommandKind::MinimumThreshold,
        CommandKind::MaximumThreshold,
    ];

    /// Returns the wire tag written into the `id` field.
    pub const fn tag(self) -> i64 {
        match self {
            CommandKind::SamplingInterval => 1,
            CommandKind::CommunicationInterval => 2,
            CommandKind::MinimumThreshold => 3,
            CommandKind::MaximumThreshold => 4,
            CommandKind::Unknown => -1,
        }
    }

    /// Returns `true` for kinds whose payload must carry an `interval` field.
    pub const fn requires_interval(self) -> bool {
        matches!(
            self,
            CommandKind::SamplingInterval | CommandKind::CommunicationInterval
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::SamplingInterval => "sampling-interval",
            CommandKind::CommunicationInterval => "communication-interval",
            CommandKind::MinimumThreshold => "minimum-threshold",
            CommandKind::MaximumThreshold => "maximum-threshold",
            CommandKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

// ── Device output ─────────────────────────────────────────────────────────────

/// A decoded line from the device, classified by its tag.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceFrame {
    /// A telemetry sample (`id == 5`) with the tag already removed.
    Telemetry(TelemetryMessage),
    /// Anything else the firmware prints: boot banners, acknowledgements,
    /// debug dumps.  Logged, never republished.
    Diagnostic(JsonObject),
}

impl DeviceFrame {
    /// Classifies a decoded device object.
    ///
    /// The telemetry test is numeric equality with [`TELEMETRY_TAG`], so both
    /// `5` and `5.0` count.  A missing or non-numeric `id` is a diagnostic.
    pub fn classify(mut object: JsonObject) -> Self {
        let is_telemetry = matches!(
            object.get(ID_FIELD),
            Some(Value::Number(n)) if n.as_f64() == Some(TELEMETRY_TAG as f64)
        );

        if is_telemetry {
            // Order-preserving removal keeps the remaining fields in the order
            // the device sent them.
            object.shift_remove(ID_FIELD);
            DeviceFrame::Telemetry(TelemetryMessage { fields: object })
        } else {
            DeviceFrame::Diagnostic(object)
        }
    }
}

/// A telemetry sample without its `id` tag, not yet timestamped.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryMessage {
    fields: JsonObject,
}

impl TelemetryMessage {
    /// Adds the bridge's receipt time and returns the object to publish.
    ///
    /// A `timestamp` sent by the device is overwritten: the bridge clock is
    /// authoritative because most devices have no RTC.
    pub fn stamp(mut self, unix_secs: u64) -> JsonObject {
        self.fields
            .insert(TIMESTAMP_FIELD.to_string(), Value::from(unix_secs));
        self.fields
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
