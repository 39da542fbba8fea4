use std::collections::{HashMap, HashSet};

use crate::config::StopCriteria;
use crate::coverage::{CoverageDefinition, SENTINEL};
use crate::error::SelectionError;
use crate::features::FeatureVector;
use crate::{CandidateId, CandidateProvider};

use super::stop::{self, Progress};
use super::{
    Classification, SelectionOutcome, SelectionRecord, SelectionState, StopHandle, StopReason,
};

/// Per-candidate result of one scan.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Scan {
    /// Already selected or unwanted.
    Decided,
    Missing,
    Malformed,
    Score(f64),
}

fn scan_one(
    coverage: &CoverageDefinition,
    class: Classification,
    vector: &Option<FeatureVector>,
) -> Scan {
    if class != Classification::Undecided {
        return Scan::Decided;
    }
    match vector {
        Some(v) if coverage.fits(v) => Scan::Score(coverage.usefulness_of(v)),
        Some(_) => Scan::Malformed,
        None => Scan::Missing,
    }
}

#[cfg(feature = "parallel")]
fn score_chunk(
    coverage: &CoverageDefinition,
    vectors: &[Option<FeatureVector>],
    classes: &[Classification],
    out: &mut Vec<Scan>,
) {
    use rayon::prelude::*;

    vectors
        .par_iter()
        .zip(classes.par_iter())
        .map(|(vector, &class)| scan_one(coverage, class, vector))
        .collect_into_vec(out);
}

#[cfg(not(feature = "parallel"))]
fn score_chunk(
    coverage: &CoverageDefinition,
    vectors: &[Option<FeatureVector>],
    classes: &[Classification],
    out: &mut Vec<Scan>,
) {
    out.clear();
    out.extend(
        vectors
            .iter()
            .zip(classes)
            .map(|(vector, &class)| scan_one(coverage, class, vector)),
    );
}

struct Best {
    index: usize,
    id: CandidateId,
    score: f64,
    vector: FeatureVector,
}

/// Greedy selection over one provider and one coverage definition.
///
/// # Example
///
/// ```rust,no_run
/// use script_select::config::SelectionConfig;
/// use script_select::coverage::CoverageDefinition;
/// use script_select::providers::InMemoryProvider;
/// use script_select::selection::Selector;
///
/// let config = SelectionConfig::from_json_file("selection.json".as_ref())?;
/// let mut provider = InMemoryProvider::new();
/// let mut coverage = CoverageDefinition::new(config.alphabet, config.coverage)?;
/// coverage.initialise(&mut provider)?;
///
/// let mut selector = Selector::new(&mut provider, &mut coverage, config.stop)?;
/// let handle = selector.stop_handle();
/// // handle.request_stop() from another thread ends the run after the current round
/// let outcome = selector.run()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Selector<'a, P: CandidateProvider + ?Sized> {
    provider: &'a mut P,
    coverage: &'a mut CoverageDefinition,
    criteria: StopCriteria,
    classes: Vec<Classification>,
    records: Vec<SelectionRecord>,
    selected: Vec<CandidateId>,
    num_unwanted: usize,
    rounds: usize,
    state: SelectionState,
    stop: StopHandle,
    scans: Vec<Scan>,
}

impl<'a, P: CandidateProvider + ?Sized> Selector<'a, P> {
    /// The coverage must already be initialised over `provider`'s pool.
    pub fn new(
        provider: &'a mut P,
        coverage: &'a mut CoverageDefinition,
        criteria: StopCriteria,
    ) -> Result<Self, SelectionError> {
        criteria.validate()?;
        if !coverage.is_initialised() {
            return Err(SelectionError::Config(
                "coverage must be initialised before selection".to_string(),
            ));
        }
        let count = provider.count();
        Ok(Self {
            provider,
            coverage,
            criteria,
            classes: vec![Classification::Undecided; count],
            records: Vec::new(),
            selected: Vec::new(),
            num_unwanted: 0,
            rounds: 0,
            state: SelectionState::Running,
            stop: StopHandle::default(),
            scans: Vec::new(),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> SelectionState {
        self.state
    }

    pub fn classification(&self, index: usize) -> Option<Classification> {
        self.classes.get(index).copied()
    }

    pub fn records(&self) -> &[SelectionRecord] {
        &self.records
    }

    pub fn coverage(&self) -> &CoverageDefinition {
        &*self.coverage
    }

    fn indices_of(&self, ids: &[CandidateId]) -> HashMap<CandidateId, usize> {
        let wanted: HashSet<CandidateId> = ids.iter().copied().collect();
        (0..self.provider.count())
            .filter_map(|i| self.provider.id_at(i).map(|id| (id, i)))
            .filter(|(id, _)| wanted.contains(id))
            .collect()
    }

    /// Mark candidates unwanted before the loop starts. Returns how many
    /// were newly excluded.
    pub fn exclude(&mut self, ids: &[CandidateId]) -> usize {
        let indices = self.indices_of(ids);
        let mut excluded = 0;
        for id in ids {
            let Some(&index) = indices.get(id) else {
                log::warn!("Cannot exclude unknown candidate {id}");
                continue;
            };
            if self.classes[index] == Classification::Undecided {
                self.classes[index] = Classification::Unwanted;
                self.num_unwanted += 1;
                excluded += 1;
            }
        }
        log::info!("Excluded {excluded} candidates");
        excluded
    }

    /// Commit sentences selected by an earlier run into the cover.
    ///
    /// They count towards `max_selected` but get no round record. Vectors
    /// are read in provider order, one chunk per run of nearby ids, and
    /// committed in the order given.
    pub fn preselect(&mut self, ids: &[CandidateId]) -> Result<usize, SelectionError> {
        let indices = self.indices_of(ids);
        let mut pending: Vec<usize> = Vec::new();
        for id in ids {
            match indices.get(id) {
                Some(&index) if self.classes[index] == Classification::Undecided => {
                    pending.push(index)
                }
                Some(_) => {}
                None => log::warn!("Cannot preselect unknown candidate {id}"),
            }
        }
        pending.sort_unstable();
        pending.dedup();

        let chunk_len = self.provider.chunk_len().max(1);
        let mut vectors: HashMap<usize, FeatureVector> = HashMap::with_capacity(pending.len());
        let mut next = 0;
        while next < pending.len() {
            let chunk = self.provider.chunk(pending[next], chunk_len)?;
            let end = chunk.start + chunk.len();
            while next < pending.len() && pending[next] < end {
                let index = pending[next];
                match &chunk.vectors[index - chunk.start] {
                    Some(v) if self.coverage.fits(v) => {
                        vectors.insert(index, v.clone());
                    }
                    _ => log::warn!(
                        "No usable feature vector for preselected candidate {}",
                        chunk.ids[index - chunk.start]
                    ),
                }
                next += 1;
            }
            if chunk.is_empty() {
                break;
            }
        }

        let mut committed = 0;
        for id in ids {
            let Some(&index) = indices.get(id) else {
                continue;
            };
            let Some(vector) = vectors.remove(&index) else {
                continue;
            };
            self.coverage.commit_candidate(&vector);
            self.classes[index] = Classification::Selected;
            self.selected.push(*id);
            committed += 1;
        }
        log::info!("Preselected {committed} candidates");
        Ok(committed)
    }

    fn check_stop(&self) -> Option<StopReason> {
        if self.stop.is_requested() {
            return Some(StopReason::Interrupted);
        }
        stop::evaluate(
            &self.criteria,
            Progress::of(self.selected.len(), &*self.coverage),
        )
    }

    /// Run one round: scan, select the best candidate, commit it.
    pub fn step(&mut self) -> Result<SelectionState, SelectionError> {
        if let SelectionState::Stopped(_) = self.state {
            return Ok(self.state);
        }
        if let Some(reason) = self.check_stop() {
            self.state = SelectionState::Stopped(reason);
            return Ok(self.state);
        }

        self.rounds += 1;
        let round = self.rounds;
        self.provider.begin_scan();
        let total = self.provider.count();
        let chunk_len = self.provider.chunk_len().max(1);
        let mut best: Option<Best> = None;

        let mut start = 0;
        while start < total {
            let chunk = self.provider.chunk(start, chunk_len)?;
            if chunk.is_empty() {
                return Err(SelectionError::Store(format!(
                    "provider returned no candidates at index {start} of {total}"
                )));
            }
            let classes = &self.classes[chunk.start..chunk.start + chunk.len()];
            score_chunk(self.coverage, chunk.vectors, classes, &mut self.scans);

            for (offset, scan) in self.scans.iter().enumerate() {
                let index = chunk.start + offset;
                let id = chunk.ids[offset];
                match *scan {
                    Scan::Decided => {}
                    Scan::Missing => {
                        log::warn!("No feature vector for candidate {id}, skipping this round");
                    }
                    Scan::Malformed => {
                        log::warn!("Feature vector of candidate {id} has codes outside the alphabet, skipping this round");
                    }
                    Scan::Score(score) if score <= SENTINEL => {
                        self.classes[index] = Classification::Unwanted;
                        self.num_unwanted += 1;
                    }
                    Scan::Score(score) => {
                        if best.as_ref().map_or(true, |b| score > b.score) {
                            if let Some(vector) = &chunk.vectors[offset] {
                                best = Some(Best {
                                    index,
                                    id,
                                    score,
                                    vector: vector.clone(),
                                });
                            }
                        }
                    }
                }
            }
            start += chunk.len();
        }

        let Some(best) = best else {
            log::info!(
                "No candidate left to select after {} rounds",
                self.rounds
            );
            self.state = SelectionState::Stopped(StopReason::Exhausted);
            return Ok(self.state);
        };

        self.classes[best.index] = Classification::Selected;
        self.coverage.commit_candidate(&best.vector);
        self.selected.push(best.id);
        self.records.push(SelectionRecord {
            round,
            id: best.id,
            score: best.score,
        });
        let ratios = self.coverage.coverage();
        log::info!(
            "Round {round}: selected candidate {} (score {:.5}), coverage phones {:.5} diphones {:.5} overall {:.5}",
            best.id,
            best.score,
            ratios.phone,
            ratios.diphone,
            ratios.overall
        );

        if let Some(reason) = self.check_stop() {
            self.state = SelectionState::Stopped(reason);
        }
        Ok(self.state)
    }

    /// Step until a stop criterion fires or the pool is exhausted.
    pub fn run(&mut self) -> Result<SelectionOutcome, SelectionError> {
        while self.step()? == SelectionState::Running {}
        if let SelectionState::Stopped(reason) = self.state {
            log::info!(
                "Selection stopped ({reason:?}) after {} rounds with {} sentences",
                self.rounds,
                self.selected.len()
            );
        }
        Ok(self.outcome())
    }

    pub fn outcome(&self) -> SelectionOutcome {
        SelectionOutcome {
            records: self.records.clone(),
            selected: self.selected.clone(),
            num_unwanted: self.num_unwanted,
            rounds: self.rounds,
            stop_reason: match self.state {
                SelectionState::Stopped(reason) => Some(reason),
                SelectionState::Running => None,
            },
            coverage: self.coverage.coverage(),
            possible: self.coverage.possible_coverage(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoverageConfig, FrequencyPolicy, LengthBounds, LevelWeights};
    use crate::features::{FeatureAlphabet, Unit};
    use crate::providers::testing::FlakyStore;
    use crate::providers::{InMemoryProvider, PagedProvider};

    fn alphabet() -> FeatureAlphabet {
        FeatureAlphabet::new(
            vec!["_".into(), "a".into(), "b".into()],
            vec!["stressed".into(), "unstressed".into()],
        )
    }

    fn config() -> CoverageConfig {
        CoverageConfig {
            weights: LevelWeights::new(4.0, 2.0, 1.0),
            decrease_factor: 2.0,
            frequency: FrequencyPolicy::Identity,
            ..Default::default()
        }
    }

    fn sentence(units: &[(u8, u8, u8)]) -> FeatureVector {
        let units: Vec<Unit> = units.iter().map(|&(p, n, r)| Unit::new(p, n, r)).collect();
        FeatureVector::from_units(&units)
    }

    fn pool_vectors() -> Vec<(CandidateId, FeatureVector)> {
        vec![
            (10, sentence(&[(1, 2, 0)])),
            (11, sentence(&[(1, 2, 1)])),
            (12, sentence(&[(2, 1, 0), (1, 0, 1)])),
            (13, sentence(&[(2, 0, 0)])),
            (14, sentence(&[(1, 2, 0); 5])),
        ]
    }

    fn pool() -> InMemoryProvider {
        pool_vectors().into_iter().collect()
    }

    fn paged_pool(window_len: usize) -> PagedProvider<FlakyStore> {
        PagedProvider::new(FlakyStore::with_vectors(pool_vectors()))
            .unwrap()
            .with_window_len(window_len)
    }

    fn initialised<P: CandidateProvider>(config: CoverageConfig, provider: &mut P) -> CoverageDefinition {
        let mut coverage = CoverageDefinition::new(alphabet(), config).unwrap();
        coverage.initialise(provider).unwrap();
        coverage
    }

    #[test]
    fn selects_the_best_candidate_first() {
        let mut provider = InMemoryProvider::new();
        provider.push(1, sentence(&[(2, 0, 0)]));
        provider.push(2, sentence(&[(1, 2, 0)]));
        provider.push(3, sentence(&[(1, 2, 0)]));
        let mut coverage = initialised(config(), &mut provider);

        let expected = coverage.usefulness_of(&sentence(&[(1, 2, 0)]));
        let outcome = Selector::new(&mut provider, &mut coverage, StopCriteria::max_selected(1))
            .unwrap()
            .run()
            .unwrap();
        // ids 2 and 3 tie; the first in provider order wins
        assert_eq!(outcome.selected, vec![2]);
        assert_eq!(
            outcome.records,
            vec![SelectionRecord {
                round: 1,
                id: 2,
                score: expected
            }]
        );
        assert_eq!(outcome.stop_reason, Some(StopReason::MaxSelected));
    }

    #[test]
    fn selects_min_of_limit_and_scorable_candidates() {
        let mut config = config();
        config.sentence_length = Some(LengthBounds::new(1, 3));

        let mut provider = pool();
        let mut coverage = initialised(config.clone(), &mut provider);
        let outcome = Selector::new(&mut provider, &mut coverage, StopCriteria::max_selected(2))
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(outcome.selected.len(), 2);
        assert_eq!(outcome.stop_reason, Some(StopReason::MaxSelected));

        let mut provider = pool();
        let mut coverage = initialised(config, &mut provider);
        let outcome = Selector::new(&mut provider, &mut coverage, StopCriteria::max_selected(10))
            .unwrap()
            .run()
            .unwrap();
        // candidate 14 is too long and never scores above the sentinel
        assert_eq!(outcome.selected.len(), 4);
        assert!(!outcome.selected.contains(&14));
        assert_eq!(outcome.num_unwanted, 1);
        assert_eq!(outcome.stop_reason, Some(StopReason::Exhausted));
        assert_eq!(outcome.rounds, 5);
    }

    #[test]
    fn classifications_never_change_once_decided() {
        let mut config = config();
        config.sentence_length = Some(LengthBounds::new(1, 3));
        let mut provider = pool();
        let mut coverage = initialised(config, &mut provider);
        let mut selector =
            Selector::new(&mut provider, &mut coverage, StopCriteria::max_selected(10)).unwrap();

        let mut seen: Vec<Classification> = vec![Classification::Undecided; 5];
        while selector.step().unwrap() == SelectionState::Running {
            for (i, before) in seen.iter_mut().enumerate() {
                let now = selector.classification(i).unwrap();
                if *before != Classification::Undecided {
                    assert_eq!(now, *before, "candidate {i} changed class");
                }
                *before = now;
            }
        }
        assert_eq!(selector.classification(4), Some(Classification::Unwanted));
        // stopped selectors stay stopped
        let state = selector.state();
        assert_eq!(selector.step().unwrap(), state);
    }

    #[test]
    fn missing_vectors_stay_undecided() {
        let mut provider = InMemoryProvider::new();
        provider.push(1, sentence(&[(1, 2, 0)]));
        provider.push_missing(2);
        let mut coverage = initialised(config(), &mut provider);
        let mut selector =
            Selector::new(&mut provider, &mut coverage, StopCriteria::max_selected(5)).unwrap();
        let outcome = selector.run().unwrap();

        assert_eq!(outcome.selected, vec![1]);
        assert_eq!(outcome.num_unwanted, 0);
        assert_eq!(selector.classification(1), Some(Classification::Undecided));
        assert_eq!(outcome.stop_reason, Some(StopReason::Exhausted));
    }

    #[test]
    fn diphone_saturation_stops_before_prosody_saturation() {
        let mut provider = InMemoryProvider::new();
        provider.push(1, sentence(&[(1, 2, 0)]));
        provider.push(2, sentence(&[(1, 2, 1)]));

        let mut coverage = initialised(config(), &mut provider);
        let diphones = StopCriteria {
            diphone_saturation: true,
            ..Default::default()
        };
        let outcome = Selector::new(&mut provider, &mut coverage, diphones)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(outcome.selected.len(), 1);
        assert_eq!(outcome.stop_reason, Some(StopReason::Saturated));

        let mut coverage = initialised(config(), &mut provider);
        let both = StopCriteria {
            max_selected: None,
            diphone_saturation: true,
            prosody_saturation: true,
        };
        let outcome = Selector::new(&mut provider, &mut coverage, both)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(outcome.selected.len(), 2);
        assert_eq!(outcome.stop_reason, Some(StopReason::Saturated));
    }

    #[test]
    fn resumed_run_that_already_saturates_selects_nothing() {
        let mut provider = pool();
        let mut coverage = initialised(config(), &mut provider);
        let criteria: StopCriteria = "simpleDiphones".parse().unwrap();
        let mut selector = Selector::new(&mut provider, &mut coverage, criteria).unwrap();

        assert_eq!(selector.preselect(&[10, 12, 13, 99]).unwrap(), 3);
        let outcome = selector.run().unwrap();
        assert_eq!(outcome.selected, vec![10, 12, 13]);
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.rounds, 0);
        assert_eq!(outcome.stop_reason, Some(StopReason::Saturated));
    }

    #[test]
    fn excluded_candidates_are_never_selected() {
        let mut provider = pool();
        let mut coverage = initialised(config(), &mut provider);
        let mut selector =
            Selector::new(&mut provider, &mut coverage, StopCriteria::max_selected(10)).unwrap();
        assert_eq!(selector.exclude(&[11, 14, 14, 42]), 2);

        let outcome = selector.run().unwrap();
        assert_eq!(outcome.selected.len(), 3);
        assert!(!outcome.selected.contains(&11));
        assert_eq!(outcome.num_unwanted, 2);
    }

    #[test]
    fn stop_handle_interrupts_at_the_round_boundary() {
        let mut provider = pool();
        let mut coverage = initialised(config(), &mut provider);
        let mut selector =
            Selector::new(&mut provider, &mut coverage, StopCriteria::max_selected(10)).unwrap();
        let handle = selector.stop_handle();

        assert_eq!(selector.step().unwrap(), SelectionState::Running);
        handle.request_stop();
        assert_eq!(
            selector.step().unwrap(),
            SelectionState::Stopped(StopReason::Interrupted)
        );
        assert_eq!(selector.records().len(), 1);
    }

    #[test]
    fn rejects_uninitialised_coverage_and_empty_criteria() {
        let mut provider = pool();
        let mut fresh = CoverageDefinition::new(alphabet(), config()).unwrap();
        assert!(matches!(
            Selector::new(&mut provider, &mut fresh, StopCriteria::max_selected(1)),
            Err(SelectionError::Config(_))
        ));

        let mut coverage = initialised(config(), &mut provider);
        assert!(matches!(
            Selector::new(&mut provider, &mut coverage, StopCriteria::default()),
            Err(SelectionError::EmptyStopCriteria)
        ));
    }

    #[test]
    fn outcome_serialises_to_json() {
        let mut provider = pool();
        let mut coverage = initialised(config(), &mut provider);
        let outcome = Selector::new(&mut provider, &mut coverage, StopCriteria::max_selected(1))
            .unwrap()
            .run()
            .unwrap();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["stop_reason"], "max_selected");
        assert_eq!(json["records"][0]["round"], 1);
    }

    #[test]
    fn paged_and_in_memory_pools_select_the_same_script() {
        let mut config = config();
        config.sentence_length = Some(LengthBounds::new(1, 3));

        let mut memory = pool();
        let mut coverage = initialised(config.clone(), &mut memory);
        let expected = Selector::new(&mut memory, &mut coverage, StopCriteria::max_selected(10))
            .unwrap()
            .run()
            .unwrap();

        for window_len in [1, 2, 3, 5] {
            let mut paged = paged_pool(window_len);
            let mut coverage = initialised(config.clone(), &mut paged);
            let outcome = Selector::new(&mut paged, &mut coverage, StopCriteria::max_selected(10))
                .unwrap()
                .run()
                .unwrap();
            assert_eq!(outcome, expected, "window of {window_len}");
        }
    }

    #[test]
    fn ties_across_windows_go_to_the_earlier_candidate() {
        let store = FlakyStore::with_vectors([
            (1, sentence(&[(2, 0, 0)])),
            (2, sentence(&[(1, 2, 0)])),
            (3, sentence(&[(1, 2, 0)])),
        ]);
        let mut provider = PagedProvider::new(store).unwrap().with_window_len(2);
        let mut coverage = initialised(config(), &mut provider);

        let outcome = Selector::new(&mut provider, &mut coverage, StopCriteria::max_selected(1))
            .unwrap()
            .run()
            .unwrap();
        // 2 is in the first window, 3 in the second
        assert_eq!(outcome.selected, vec![2]);
    }

    #[test]
    fn failed_window_leaves_candidates_undecided_until_the_next_round() {
        let mut store = FlakyStore::with_vectors([
            (1, sentence(&[(1, 1, 0)])),
            (2, sentence(&[(1, 2, 0)])),
            (3, sentence(&[(2, 1, 0)])),
            (4, sentence(&[(2, 2, 0)])),
        ]);
        // fetches 0 and 1 initialise; fetch 2 is the first window of round 1
        store.fail_on = vec![2];
        let mut provider = PagedProvider::new(store).unwrap().with_window_len(2);
        let mut coverage = initialised(config(), &mut provider);
        let mut selector =
            Selector::new(&mut provider, &mut coverage, StopCriteria::max_selected(4)).unwrap();

        assert_eq!(selector.step().unwrap(), SelectionState::Running);
        assert!(matches!(selector.records()[0].id, 3 | 4));
        assert_eq!(selector.classification(0), Some(Classification::Undecided));
        assert_eq!(selector.classification(1), Some(Classification::Undecided));

        let outcome = selector.run().unwrap();
        let mut selected = outcome.selected.clone();
        selected.sort_unstable();
        assert_eq!(selected, vec![1, 2, 3, 4]);
        assert_eq!(outcome.num_unwanted, 0);
        assert_eq!(outcome.stop_reason, Some(StopReason::MaxSelected));
    }

    #[test]
    fn preselect_reads_each_window_once() {
        let mut provider = paged_pool(2);
        let mut coverage = initialised(config(), &mut provider);
        let before = provider.store().fetches.len();

        let mut selector =
            Selector::new(&mut provider, &mut coverage, StopCriteria::max_selected(10)).unwrap();
        assert_eq!(selector.preselect(&[10, 13, 11, 10]).unwrap(), 3);
        let outcome = selector.outcome();
        assert_eq!(outcome.selected, vec![10, 13, 11]);

        // windows [10, 11] and [12, 13]
        assert_eq!(provider.store().fetches.len() - before, 2);
    }
}
