//! Context gathering for chat requests.

pub mod aggregator;
pub mod prefetch;
pub mod store;

pub use aggregator::{AggregatorSettings, ContextAggregator, GatheredContext};
