//! Windowed trend-aggregation engine.
//!
//! - [`Accumulator`] merges sentiment observations into per-theme stats.
//! - [`WindowAggregator`] periodically evicts expired themes and rebuilds the
//!   ranked trending set.
//! - [`TrendPublisher`] turns ranked-set changes into [`RankedView`] pushes
//!   for live subscribers.
//!
//! All shared state lives in an injected [`StatsStore`]; nothing here holds
//! a lock across store calls.
//!
//! [`RankedView`]: trendcast_core::RankedView
//! [`StatsStore`]: trendcast_store::StatsStore

pub mod accumulator;
pub mod aggregator;
pub mod error;
pub mod publisher;
mod retry;
pub mod shutdown;

pub use accumulator::{Accumulator, AccumulatorSettings, MessageReport};
pub use aggregator::{AggregationResult, WindowAggregator};
pub use error::EngineError;
pub use publisher::{PublisherSettings, TrendPublisher};
pub use shutdown::{Shutdown, ShutdownTrigger};

/// Current wall-clock time in unix seconds.
#[must_use]
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
