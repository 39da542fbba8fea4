//! Greedy selection loop.
//!
//! Each round scores every undecided candidate against the current cover,
//! selects the best one and commits it. See [`Selector`].

pub mod engine;
pub mod stop;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::coverage::CoverageRatios;
use crate::CandidateId;

pub use engine::Selector;

/// Classification of a candidate. Only `Undecided` ever changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Classification {
    #[default]
    Undecided,
    Selected,
    Unwanted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The configured number of sentences is selected.
    MaxSelected,
    /// Every enabled saturation criterion holds.
    Saturated,
    /// No undecided candidate scored above the sentinel.
    Exhausted,
    /// Stop was requested through a [`StopHandle`].
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionState {
    Running,
    Stopped(StopReason),
}

/// Asks a running selection to stop after the current round.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One selection, in round order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SelectionRecord {
    pub round: usize,
    pub id: CandidateId,
    pub score: f64,
}

/// Result of a selection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionOutcome {
    /// Sentences selected by the loop, with their winning scores.
    pub records: Vec<SelectionRecord>,
    /// Every selected id in commit order, preselected ones first.
    pub selected: Vec<CandidateId>,
    pub num_unwanted: usize,
    pub rounds: usize,
    pub stop_reason: Option<StopReason>,
    pub coverage: CoverageRatios,
    /// Best coverage the pool allows.
    pub possible: Option<CoverageRatios>,
}
