//! Multi-provider dispatch and response reconciliation.
//!
//! - **similarity**: token-set Jaccard similarity
//! - **aggregator**: reduce several responses with a strategy
//! - **executor**: concurrent fan-out with per-provider timeouts

pub mod aggregator;
pub mod executor;
pub mod similarity;

pub use executor::{FanOutExecutor, FanOutRequest};
