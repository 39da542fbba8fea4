use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use super::report::{CorpusReport, SelectionReport};
use super::snapshot::{self, SnapshotPolicy};
use super::stats::{self, CorpusStatistics, CoverageRatios, SelectedLengths};
use super::tree::CoverageTree;
use crate::config::CoverageConfig;
use crate::error::SelectionError;
use crate::features::{FeatureAlphabet, FeatureVector};
use crate::{CandidateId, CandidateProvider};

/// Score of a sentence whose length is outside the configured bounds.
pub const SENTINEL: f64 = -1.0;

/// The coverage tree plus everything learned about the pool and the cover.
///
/// Created once per run with [`new`](Self::new), then filled by
/// [`initialise`](Self::initialise) or from a snapshot. Scoring only reads;
/// all mutation goes through [`commit_candidate`](Self::commit_candidate).
#[derive(Debug, Clone)]
pub struct CoverageDefinition {
    alphabet: FeatureAlphabet,
    config: CoverageConfig,
    ignored: Vec<bool>,
    tree: CoverageTree,
    corpus: Option<CorpusStatistics>,
    selected: SelectedLengths,
    development: Vec<CoverageRatios>,
}

fn build_tree(alphabet: &FeatureAlphabet, config: &CoverageConfig, ignored: &[bool]) -> CoverageTree {
    CoverageTree::build(
        alphabet.num_phones(),
        alphabet.num_prosody(),
        ignored.to_vec(),
        config.weights,
        config.decrease_factor,
    )
}

impl CoverageDefinition {
    pub fn new(alphabet: FeatureAlphabet, config: CoverageConfig) -> Result<Self, SelectionError> {
        alphabet.validate()?;
        config.validate()?;
        let ignored = alphabet.ignore_mask(&config.ignored_phones)?;
        let tree = build_tree(&alphabet, &config, &ignored);
        Ok(Self {
            alphabet,
            config,
            ignored,
            tree,
            corpus: None,
            selected: SelectedLengths::default(),
            development: Vec::new(),
        })
    }

    pub fn alphabet(&self) -> &FeatureAlphabet {
        &self.alphabet
    }

    pub fn config(&self) -> &CoverageConfig {
        &self.config
    }

    pub fn tree(&self) -> &CoverageTree {
        &self.tree
    }

    /// Pool statistics, once initialised.
    pub fn corpus(&self) -> Option<&CorpusStatistics> {
        self.corpus.as_ref()
    }

    pub fn is_initialised(&self) -> bool {
        self.corpus.is_some()
    }

    pub fn selected(&self) -> &SelectedLengths {
        &self.selected
    }

    /// Coverage ratios after each commit, oldest first.
    pub fn development(&self) -> &[CoverageRatios] {
        &self.development
    }

    /// Whether every code of `vector` is inside the alphabet.
    pub fn fits(&self, vector: &FeatureVector) -> bool {
        self.first_bad_unit(vector).is_none()
    }

    fn first_bad_unit(&self, vector: &FeatureVector) -> Option<usize> {
        let num_phones = self.alphabet.num_phones();
        let num_prosody = self.alphabet.num_prosody();
        vector.units().position(|u| {
            usize::from(u.phone) >= num_phones
                || usize::from(u.next_phone) >= num_phones
                || usize::from(u.prosody) >= num_prosody
        })
    }

    /// Reject vectors with codes outside the alphabet.
    pub fn check_vector(&self, id: CandidateId, vector: &FeatureVector) -> Result<(), SelectionError> {
        match self.first_bad_unit(vector) {
            Some(i) => Err(SelectionError::MalformedVector {
                id,
                reason: format!("unit {i} has a code outside the alphabet"),
            }),
            None => Ok(()),
        }
    }

    /// Scan the whole pool and derive the frequency weights.
    ///
    /// Resets any cover built so far. Candidates without a usable vector
    /// are logged and left out of the statistics. A chunk the provider
    /// cannot read at all fails the scan, so no statistics are built from
    /// part of the pool.
    pub fn initialise<P: CandidateProvider + ?Sized>(
        &mut self,
        provider: &mut P,
    ) -> Result<(), SelectionError> {
        let mut tree = build_tree(&self.alphabet, &self.config, &self.ignored);
        let total = provider.count();
        let chunk_len = provider.chunk_len().max(1);
        log::info!("Analysing feature vectors of {total} candidates");
        provider.begin_scan();

        let mut tokens = 0u64;
        let mut scanned = 0usize;
        let mut min_length = usize::MAX;
        let mut max_length = 0usize;
        let mut decile = 0;
        let mut start = 0;
        while start < total {
            let chunk = provider.strict_chunk(start, chunk_len)?;
            if chunk.is_empty() {
                return Err(SelectionError::Store(format!(
                    "provider returned no candidates at index {start} of {total}"
                )));
            }
            for (&id, vector) in chunk.ids.iter().zip(chunk.vectors) {
                let Some(vector) = vector else {
                    log::warn!("No feature vector for candidate {id}, skipping");
                    continue;
                };
                if let Err(e) = self.check_vector(id, vector) {
                    log::warn!("{e}, skipping");
                    continue;
                }
                for unit in vector.units() {
                    tree.add_possible_instance(unit.phone, unit.next_phone, unit.prosody);
                }
                tokens += vector.len() as u64;
                scanned += 1;
                min_length = min_length.min(vector.len());
                max_length = max_length.max(vector.len());
            }
            start += chunk.len();

            let reached = start * 10 / total;
            if reached > decile {
                decile = reached;
                log::info!("Analysed {}0% of the pool", decile);
            }
        }

        let (possible_phones, possible_diphones, possible_leaves) = stats::possible_counts(&tree);
        let (distinct_phones, distinct_diphones, distinct_leaves) = stats::pool_distinct_counts(&tree);
        let corpus = CorpusStatistics {
            num_sentences: total as u64,
            total_tokens: tokens,
            distinct_phones,
            distinct_diphones,
            distinct_leaves,
            possible_phones,
            possible_diphones,
            possible_leaves,
            average_length: if scanned == 0 {
                0.0
            } else {
                tokens as f64 / scanned as f64
            },
            min_length: if scanned == 0 { 0 } else { min_length },
            max_length,
        };
        log::info!(
            "Pool holds {} tokens: {}/{} phones, {}/{} diphones, {}/{} combinations",
            corpus.total_tokens,
            corpus.distinct_phones,
            corpus.possible_phones,
            corpus.distinct_diphones,
            corpus.possible_diphones,
            corpus.distinct_leaves,
            corpus.possible_leaves
        );
        self.install(tree, corpus);
        Ok(())
    }

    fn install(&mut self, mut tree: CoverageTree, corpus: CorpusStatistics) {
        tree.fold_frequencies(corpus.total_tokens, self.config.frequency);
        self.tree = tree;
        self.corpus = Some(corpus);
        self.selected = SelectedLengths::default();
        self.development.clear();
    }

    /// Restore the pool statistics from a snapshot, or scan the pool and
    /// write a fresh snapshot.
    pub fn load_or_initialise<P: CandidateProvider + ?Sized>(
        &mut self,
        path: &Path,
        provider: &mut P,
        policy: SnapshotPolicy,
    ) -> Result<(), SelectionError> {
        if path.exists() {
            match self.load_snapshot(path, provider.count() as u64) {
                Ok(()) => {
                    log::info!("Restored pool statistics from {}", path.display());
                    return Ok(());
                }
                Err(e) => match policy {
                    SnapshotPolicy::Require => return Err(e),
                    SnapshotPolicy::Rescan => {
                        log::warn!("Cannot use snapshot {}: {e}. Rescanning the pool", path.display());
                    }
                },
            }
        }
        self.initialise(provider)?;
        self.save_snapshot(path)
    }

    /// Read a snapshot taken over a pool of `num_candidates` candidates.
    pub fn load_snapshot(&mut self, path: &Path, num_candidates: u64) -> Result<(), SelectionError> {
        let reader = BufReader::new(File::open(path)?);
        let mut tree = build_tree(&self.alphabet, &self.config, &self.ignored);
        let corpus = snapshot::read(reader, &mut tree, num_candidates)?;
        self.install(tree, corpus);
        Ok(())
    }

    /// Write the pool statistics atomically to `path`.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), SelectionError> {
        let corpus = self
            .corpus
            .as_ref()
            .ok_or_else(|| SelectionError::Snapshot("coverage is not initialised".to_string()))?;
        let parent_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent_dir)?;

        let temp_file = NamedTempFile::new_in(parent_dir)?;
        let mut writer = BufWriter::new(&temp_file);
        snapshot::write(&mut writer, corpus, &self.tree)?;
        drop(writer);
        temp_file.persist(path).map_err(|e| e.error)?;
        log::info!("Wrote coverage snapshot to {}", path.display());
        Ok(())
    }

    /// Mean path score over the units of a sentence, or [`SENTINEL`] when
    /// its length is outside the configured bounds.
    pub fn usefulness_of(&self, vector: &FeatureVector) -> f64 {
        if let Some(bounds) = self.config.sentence_length {
            if !bounds.contains(vector.len()) {
                return SENTINEL;
            }
        }
        let sum: f64 = vector
            .units()
            .map(|u| self.tree.score_path(u.phone, u.next_phone, u.prosody))
            .sum();
        sum / vector.len() as f64
    }

    /// Add a selected sentence to the cover.
    pub fn commit_candidate(&mut self, vector: &FeatureVector) {
        for unit in vector.units() {
            self.tree.commit(unit.phone, unit.next_phone, unit.prosody);
        }
        self.selected.record(vector.len());
        self.development.push(self.coverage());
    }

    /// Covered fraction of the theoretical maxima.
    pub fn coverage(&self) -> CoverageRatios {
        CoverageRatios::of(
            (
                self.tree.num_covered_phones(),
                self.tree.num_covered_diphones(),
                self.tree.num_covered_leaves(),
            ),
            stats::possible_counts(&self.tree),
        )
    }

    /// Best coverage reachable from this pool.
    pub fn possible_coverage(&self) -> Option<CoverageRatios> {
        self.corpus.as_ref().map(CorpusStatistics::possible_coverage)
    }

    /// Every diphone seen in the pool is in the cover.
    pub fn reached_diphone_saturation(&self) -> bool {
        self.corpus
            .as_ref()
            .is_some_and(|c| self.tree.num_covered_diphones() >= c.distinct_diphones)
    }

    /// Every `(diphone, prosody)` combination seen in the pool is in the cover.
    pub fn reached_prosody_saturation(&self) -> bool {
        self.corpus
            .as_ref()
            .is_some_and(|c| self.tree.num_covered_leaves() >= c.distinct_leaves)
    }

    /// Pool distribution report, once initialised.
    pub fn corpus_report(&self) -> Option<CorpusReport<'_>> {
        self.corpus
            .as_ref()
            .map(|corpus| CorpusReport::new(self, corpus))
    }

    pub fn selection_report(&self) -> SelectionReport<'_> {
        SelectionReport::new(self)
    }

    /// Tab separated coverage development, one row per committed sentence.
    pub fn write_development<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "\toverall coverage\tdiphone coverage\tphone coverage")?;
        for (i, ratios) in self.development.iter().enumerate() {
            writeln!(
                writer,
                "{i}\t{:.5}\t{:.5}\t{:.5}",
                ratios.overall, ratios.diphone, ratios.phone
            )?;
        }
        writer.flush()
    }
}
