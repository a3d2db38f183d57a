//! The event log pipeline: per-node translation, line-safe merging, bounded
//! history, and fan-out to HTTP viewers.

/// line safe merging of many readers
pub mod aggregator;
/// fan out of the merged stream to viewers
pub mod broadcast;
/// bounded replay history
pub mod ring;
/// per node record translation
pub mod transformer;

pub use aggregator::LineAggregator;
pub use broadcast::{BroadcastHandle, LogBroadcaster};
pub use ring::RingWriter;
pub use transformer::NodeLogger;
