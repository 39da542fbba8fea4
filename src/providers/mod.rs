//! Candidate providers.
//!
//! Both providers implement [`CandidateProvider`](crate::CandidateProvider):
//!
//! | Provider | Resident data | Use when |
//! |---|---|---|
//! | [`InMemoryProvider`] | ids and all vectors | the pool fits in memory |
//! | [`PagedProvider`] | ids, one window of vectors | millions of candidates in an external store |
//!
//! The paged provider reads from any [`FeatureStore`]; [`RecordFileStore`]
//! is a store over a flat record file.

pub mod memory;
pub mod paged;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;

pub use memory::InMemoryProvider;
pub use paged::{PagedProvider, DEFAULT_WINDOW_LEN};
pub use store::{write_records, FeatureStore, RecordFileStore};
