//! Bus topic names and their mapping to [`CommandKind`].
//!
//! The bridge subscribes to exactly four command topics and publishes to one
//! telemetry topic.  Deployments conventionally put all five under a shared
//! prefix:
//!
//! ```text
//! <prefix>/sampling_interval       → CommandKind::SamplingInterval
//! <prefix>/communication_interval  → CommandKind::CommunicationInterval
//! <prefix>/minimum_threshold       → CommandKind::MinimumThreshold
//! <prefix>/maximum_threshold       → CommandKind::MaximumThreshold
//! <prefix>/status                  ← telemetry
//! ```

use crate::protocol::messages::CommandKind;

/// Prefix used when no topic configuration is supplied.
pub const DEFAULT_TOPIC_PREFIX: &str = "d:/group5.iot";

/// Leaf name of the telemetry topic under a prefix.
pub const TELEMETRY_TOPIC_LEAF: &str = "status";

/// The four command topics the bridge understands.
///
/// Topic matching is exact string comparison: the bridge subscribes to
/// literal topic names, never wildcards, so an incoming publish always carries
/// one of these names unless the broker is misbehaving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicTable {
    sampling_interval: String,
    communication_interval: String,
    minimum_threshold: String,
    maximum_threshold: String,
}

impl TopicTable {
    /// Builds a table from explicit topic names.
    pub fn new(
        sampling_interval: impl Into<String>,
        communication_interval: impl Into<String>,
        minimum_threshold: impl Into<String>,
        maximum_threshold: impl Into<String>,
    ) -> Self {
        Self {
            sampling_interval: sampling_interval.into(),
            communication_interval: communication_interval.into(),
            minimum_threshold: minimum_threshold.into(),
            maximum_threshold: maximum_threshold.into(),
        }
    }

    /// Builds the conventional table under `prefix`.
    ///
    /// A trailing `/` on the prefix is ignored.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use iot_bridge_core::{CommandKind, TopicTable};
    ///
    /// let table = TopicTable::with_prefix("plant/7/");
    /// assert_eq!(table.kind_for("plant/7/maximum_threshold"), CommandKind::MaximumThreshold);
    /// ```
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self::new(
            format!("{prefix}/sampling_interval"),
            format!("{prefix}/communication_interval"),
            format!("{prefix}/minimum_threshold"),
            format!("{prefix}/maximum_threshold"),
        )
    }

    /// Returns the kind of command carried on `topic`.
    ///
    /// Unrecognized topics map to [`CommandKind::Unknown`].  If the same name
    /// was configured for two kinds, the first in [`CommandKind::RECOGNIZED`]
    /// order wins.
    pub fn kind_for(&self, topic: &str) -> CommandKind {
        self.subscriptions()
            .find(|(_, name)| *name == topic)
            .map(|(kind, _)| kind)
            .unwrap_or(CommandKind::Unknown)
    }

    /// Returns the topic name configured for `kind`, or `None` for
    /// [`CommandKind::Unknown`].
    pub fn topic_for(&self, kind: CommandKind) -> Option<&str> {
        match kind {
            CommandKind::SamplingInterval => Some(self.sampling_interval.as_str()),
            CommandKind::CommunicationInterval => Some(self.communication_interval.as_str()),
            CommandKind::MinimumThreshold => Some(self.minimum_threshold.as_str()),
            CommandKind::MaximumThreshold => Some(self.maximum_threshold.as_str()),
            CommandKind::Unknown => None,
        }
    }

    /// Iterates over the topics to subscribe to, in tag order.
    pub fn subscriptions(&self) -> impl Iterator<Item = (CommandKind, &str)> + '_ {
        CommandKind::RECOGNIZED
            .into_iter()
            .filter_map(move |kind| self.topic_for(kind).map(|topic| (kind, topic)))
    }
}

impl Default for TopicTable {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_TOPIC_PREFIX)
    }
}

/// Returns the conventional telemetry topic under `prefix`.
pub fn telemetry_topic_for_prefix(prefix: &str) -> String {
    format!("{}/{TELEMETRY_TOPIC_LEAF}", prefix.trim_end_matches('/'))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
