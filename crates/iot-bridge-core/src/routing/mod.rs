//! Routing module: topic table and per-topic normalization rules.

pub mod router;
pub mod topics;

pub use router::{route, RoutedCommand, ValidationError, INTERVAL_FIELD, INTERVAL_FLOOR};
pub use topics::{telemetry_topic_for_prefix, TopicTable, DEFAULT_TOPIC_PREFIX};
