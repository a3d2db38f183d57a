//! The randomized workload: market actions and their periodic schedulers.

/// payment, offer, request and deal executors
pub mod actions;
/// churn, mining and action schedulers
pub mod randomizer;

pub use actions::{Action, ActionRunner};
pub use randomizer::Randomizer;
