use serde::{Deserialize, Serialize};

use super::tree::CoverageTree;
use crate::features::ABSENT_PHONE;

/// Pool-wide statistics gathered by the initialisation scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusStatistics {
    /// Candidates offered by the provider.
    pub num_sentences: u64,
    /// Units over all scanned candidates.
    pub total_tokens: u64,
    pub distinct_phones: usize,
    pub distinct_diphones: usize,
    /// Distinct `(diphone, prosody)` combinations.
    pub distinct_leaves: usize,
    pub possible_phones: usize,
    pub possible_diphones: usize,
    pub possible_leaves: usize,
    pub average_length: f64,
    pub min_length: usize,
    pub max_length: usize,
}

/// Counts `(phones, diphones, leaves)` used by coverage ratios.
pub(crate) type Triple = (usize, usize, usize);

impl CorpusStatistics {
    /// Best coverage any selection from this pool can reach.
    pub fn possible_coverage(&self) -> CoverageRatios {
        CoverageRatios::of(
            (
                self.distinct_phones,
                self.distinct_diphones,
                self.distinct_leaves,
            ),
            (
                self.possible_phones,
                self.possible_diphones,
                self.possible_leaves,
            ),
        )
    }
}

/// Covered fraction of all theoretically possible phones, diphones and
/// `(diphone, prosody)` combinations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageRatios {
    pub phone: f64,
    pub diphone: f64,
    pub overall: f64,
}

impl CoverageRatios {
    pub(crate) fn of(covered: Triple, possible: Triple) -> Self {
        let ratio = |c: usize, p: usize| if p == 0 { 0.0 } else { c as f64 / p as f64 };
        Self {
            phone: ratio(covered.0, possible.0),
            diphone: ratio(covered.1, possible.1),
            overall: ratio(covered.2, possible.2),
        }
    }
}

/// Length statistics of the selected sentences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectedLengths {
    pub sentences: usize,
    pub units: usize,
    pub min: Option<usize>,
    pub max: usize,
}

impl SelectedLengths {
    pub(crate) fn record(&mut self, len: usize) {
        self.sentences += 1;
        self.units += len;
        self.max = self.max.max(len);
        self.min = Some(self.min.map_or(len, |m| m.min(len)));
    }

    pub fn average(&self) -> f64 {
        if self.sentences == 0 {
            0.0
        } else {
            self.units as f64 / self.sentences as f64
        }
    }
}

/// Theoretical maxima for a tree: with `M` counted phones there are `M`
/// phones, `M * (M + 1)` diphones (the next phone may be absent) and
/// `M * (M + 1) * R` combinations.
pub(crate) fn possible_counts(tree: &CoverageTree) -> Triple {
    let m = tree.counted_phones().count();
    let diphones = m * (m + 1);
    (m, diphones, diphones * tree.num_prosody())
}

/// Distinct counted phones, diphones and combinations seen in the pool,
/// derived from the leaves' `max_count`.
pub(crate) fn pool_distinct_counts(tree: &CoverageTree) -> Triple {
    let mut phones = 0;
    let mut diphones = 0;
    let mut leaves = 0;
    let counted: Vec<u8> = tree.counted_phones().collect();
    for &p in &counted {
        let mut phone_seen = false;
        for n in std::iter::once(ABSENT_PHONE).chain(counted.iter().copied()) {
            let seen = (0..tree.num_prosody())
                .filter(|&r| tree.leaf(p, n, r as u8).max_count() > 0)
                .count();
            if seen > 0 {
                diphones += 1;
                leaves += seen;
                phone_seen = true;
            }
        }
        if phone_seen {
            phones += 1;
        }
    }
    (phones, diphones, leaves)
}

/// Pool occurrences of one diphone, summed over prosody classes.
pub(crate) fn diphone_count(tree: &CoverageTree, phone: u8, next_phone: u8) -> u64 {
    (0..tree.num_prosody())
        .map(|r| u64::from(tree.leaf(phone, next_phone, r as u8).max_count()))
        .sum()
}
