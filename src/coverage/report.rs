//! Human readable reports on the pool and on the selected cover.

use std::fmt;

use super::definition::CoverageDefinition;
use super::stats::{self, CorpusStatistics};
use crate::features::ABSENT_PHONE;

/// Unit distribution of the candidate pool.
pub struct CorpusReport<'a> {
    coverage: &'a CoverageDefinition,
    corpus: &'a CorpusStatistics,
}

impl<'a> CorpusReport<'a> {
    pub(crate) fn new(coverage: &'a CoverageDefinition, corpus: &'a CorpusStatistics) -> Self {
        Self { coverage, corpus }
    }

    /// Counted phones that never occur in the pool.
    pub fn missing_phones(&self) -> Vec<&'a str> {
        let tree = self.coverage.tree();
        let alphabet = self.coverage.alphabet();
        tree.counted_phones()
            .filter(|&p| {
                (0..tree.num_phones()).all(|n| stats::diphone_count(tree, p, n as u8) == 0)
            })
            .map(|p| alphabet.phone_symbol(p))
            .collect()
    }

    /// Every countable diphone with its pool frequency, most frequent first.
    pub fn diphone_frequencies(&self) -> Vec<(String, u64)> {
        let tree = self.coverage.tree();
        let alphabet = self.coverage.alphabet();
        let counted: Vec<u8> = tree.counted_phones().collect();
        let mut diphones = Vec::with_capacity(counted.len() * (counted.len() + 1));
        for &p in &counted {
            for n in std::iter::once(ABSENT_PHONE).chain(counted.iter().copied()) {
                let name = format!(
                    "{}_{}",
                    alphabet.phone_symbol(p),
                    alphabet.next_phone_symbol(n)
                );
                diphones.push((name, stats::diphone_count(tree, p, n)));
            }
        }
        diphones.sort_by(|a, b| b.1.cmp(&a.1));
        diphones
    }
}

impl fmt::Display for CorpusReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let corpus = self.corpus;
        let possible = corpus.possible_coverage();
        writeln!(f, "Unit distribution")?;
        writeln!(f)?;
        writeln!(f, "Number of sentences : {}", corpus.num_sentences)?;
        writeln!(f, "Average sentence length : {:.5}", corpus.average_length)?;
        writeln!(f, "Maximum sentence length : {}", corpus.max_length)?;
        writeln!(f, "Minimum sentence length : {}", corpus.min_length)?;
        writeln!(f, "Number of tokens : {}", corpus.total_tokens)?;
        writeln!(f)?;
        writeln!(f, "Coverage possible in the pool:")?;
        writeln!(f, "phones: {:.5}", possible.phone)?;
        writeln!(f, "diphones: {:.5}", possible.diphone)?;
        writeln!(f, "overall: {:.5}", possible.overall)?;

        let missing = self.missing_phones();
        if !missing.is_empty() {
            writeln!(f, "The following phones are missing: {}", missing.join(" "))?;
        }

        writeln!(f)?;
        writeln!(f, "Diphones and their frequencies:")?;
        for (name, count) in self.diphone_frequencies() {
            let percent = if corpus.total_tokens == 0 {
                0.0
            } else {
                count as f64 * 100.0 / corpus.total_tokens as f64
            };
            writeln!(f, "{name} : {count}, {percent:.5}")?;
        }
        Ok(())
    }
}

/// Settings and achieved coverage of the selected cover.
pub struct SelectionReport<'a> {
    coverage: &'a CoverageDefinition,
}

impl<'a> SelectionReport<'a> {
    pub(crate) fn new(coverage: &'a CoverageDefinition) -> Self {
        Self { coverage }
    }
}

impl fmt::Display for SelectionReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let coverage = self.coverage;
        let selected = coverage.selected();
        let achieved = coverage.coverage();
        let possible = coverage.possible_coverage().unwrap_or_default();

        writeln!(f, "Settings of coverage definition:")?;
        write!(f, "{}", coverage.config().to_legacy_string())?;
        writeln!(f)?;
        writeln!(f, "Results:")?;
        writeln!(f, "Num sent in cover : {}", selected.sentences)?;
        writeln!(f, "Avg sent length : {:.5}", selected.average())?;
        writeln!(f, "Max sent length : {}", selected.max)?;
        match selected.min {
            Some(min) => writeln!(f, "Min sent length : {min}")?,
            None => writeln!(f, "Min sent length : -")?,
        }
        writeln!(f, "phones: {:.5} ({:.5})", achieved.phone, possible.phone)?;
        writeln!(f, "diphones: {:.5} ({:.5})", achieved.diphone, possible.diphone)?;
        writeln!(f, "overall: {:.5} ({:.5})", achieved.overall, possible.overall)
    }
}
