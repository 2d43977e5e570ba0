pub mod multipliers;
pub mod tracker;

pub use multipliers::{normalize_model_id, MultiplierError, MultiplierTable};
pub use tracker::{UsageSnapshot, UsageTracker};
