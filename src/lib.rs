//! # script-select
//!
//! Greedy selection of a recording script for a speech synthesis voice.
//!
//! From a pool of candidate sentences (often millions, harvested from a text
//! corpus) the selector picks a small subset that covers as many phones,
//! diphones and diphone/prosody combinations as possible.
//!
//! ## Features
//!
//! - **Coverage tree**: phone → diphone → prosody weights that decay as units
//!   get covered
//! - **Two candidate providers**: everything in memory, or paged windows from
//!   an external feature store
//! - **Snapshots**: persist the pool statistics so long runs resume without
//!   rescanning the pool
//! - **Parallel scan** (`parallel` feature, on by default)
//!
//! ## Quick Start
//!
//! ```ignore
//! use script_select::{
//!     config::SelectionConfig, coverage::CoverageDefinition,
//!     providers::InMemoryProvider, selection::Selector,
//! };
//!
//! let config = SelectionConfig::from_json_file("selection.json".as_ref())?;
//! let mut provider = InMemoryProvider::new();
//! // provider.push(id, vector) for every candidate
//!
//! let mut coverage = CoverageDefinition::new(config.alphabet, config.coverage)?;
//! coverage.initialise(&mut provider)?;
//!
//! let outcome = Selector::new(&mut provider, &mut coverage, config.stop)?.run()?;
//! println!("selected {} sentences", outcome.selected.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod coverage;
pub mod error;
pub mod features;
pub mod providers;
pub mod selection;

pub use error::SelectionError;
pub use features::{FeatureVector, Unit};

/// External identifier of a candidate sentence.
pub type CandidateId = u32;

/// Scan window used by providers without a natural page size.
pub const DEFAULT_CHUNK_LEN: usize = 16 * 1024;

/// A contiguous run of candidates borrowed from a provider.
///
/// `ids[i]` and `vectors[i]` belong to provider index `start + i`. A `None`
/// vector could not be read and is skipped by the caller.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    pub start: usize,
    pub ids: &'a [CandidateId],
    pub vectors: &'a [Option<FeatureVector>],
}

impl Chunk<'_> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Source of candidate feature vectors, addressed by provider-local index.
///
/// Indices run from `0` to `count() - 1` in a fixed order; this order is
/// the tie-break order of the selection.
pub trait CandidateProvider {
    /// Number of candidates.
    fn count(&self) -> usize;

    /// External id of the candidate at `index`, or `None` past the end.
    fn id_at(&self, index: usize) -> Option<CandidateId>;

    /// Borrow the candidates from `start` onward.
    ///
    /// The returned chunk is non-empty for `start < count()` and may be
    /// shorter than `len`; callers advance by `chunk.len()`.
    fn chunk(&mut self, start: usize, len: usize) -> Result<Chunk<'_>, SelectionError>;

    /// Like [`chunk`](Self::chunk), for the one pass that derives the pool
    /// statistics: a chunk that cannot be read as a whole is an error
    /// rather than a run of missing vectors. Ids the source has no vector
    /// for still read as `None`.
    fn strict_chunk(&mut self, start: usize, len: usize) -> Result<Chunk<'_>, SelectionError> {
        self.chunk(start, len)
    }

    /// Preferred length of the chunks requested during a scan.
    fn chunk_len(&self) -> usize {
        DEFAULT_CHUNK_LEN
    }

    /// Called before every full pass over the candidates.
    fn begin_scan(&mut self) {}

    /// Feature vector of one candidate; `None` if it could not be read.
    fn features_of(&mut self, index: usize) -> Result<Option<&FeatureVector>, SelectionError> {
        let chunk = self.chunk(index, 1)?;
        Ok(chunk.vectors.first().and_then(Option::as_ref))
    }
}
