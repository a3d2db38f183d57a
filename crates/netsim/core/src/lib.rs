//! Core types shared across the netsim simulator: raw daemon event records,
//! the visualization event vocabulary, and the storage market primitives.

/// event records and their translation into visualization events
pub mod events;
/// storage market primitives
pub mod market;

pub use events::{translate, EventRecord, VizEvent};
pub use market::{best_pair, Ask, Bid, Deal, Role};
