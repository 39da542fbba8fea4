//! Coverage model.
//!
//! [`CoverageDefinition`] owns the [`CoverageTree`](tree::CoverageTree)
//! together with the pool statistics and the running cover. It scores
//! candidates, commits selected sentences and persists what the scan
//! learned about the pool as a [snapshot](snapshot).

pub mod definition;
pub mod report;
pub mod snapshot;
pub mod stats;
pub mod tree;

pub use definition::{CoverageDefinition, SENTINEL};
pub use snapshot::SnapshotPolicy;
pub use stats::{CorpusStatistics, CoverageRatios, SelectedLengths};
