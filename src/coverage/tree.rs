use crate::config::{FrequencyPolicy, LevelWeights};
use crate::features::{Unit, ABSENT_PHONE};

/// Weights carried by every node of the coverage tree.
///
/// `usefulness` caches `wanted * frequency` and is refreshed by every setter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeWeights {
    wanted: f64,
    frequency: f64,
    usefulness: f64,
}

impl NodeWeights {
    fn new(wanted: f64) -> Self {
        Self {
            wanted,
            frequency: 1.0,
            usefulness: wanted,
        }
    }

    pub fn wanted(&self) -> f64 {
        self.wanted
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn usefulness(&self) -> f64 {
        self.usefulness
    }

    fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
        self.usefulness = self.wanted * self.frequency;
    }

    fn decrease_wanted(&mut self, factor: f64) {
        self.wanted /= factor;
        self.usefulness = self.wanted * self.frequency;
    }
}

/// Terminal node reached by a `(phone, next_phone, prosody)` path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leaf {
    weights: NodeWeights,
    max_count: u32,
    selected_count: u32,
}

impl Leaf {
    pub fn weights(&self) -> &NodeWeights {
        &self.weights
    }

    /// Occurrences of this combination in the whole candidate pool.
    pub fn max_count(&self) -> u32 {
        self.max_count
    }

    /// Occurrences contributed by the sentences selected so far.
    pub fn selected_count(&self) -> u32 {
        self.selected_count
    }
}

/// Which covered sets grew when a unit was committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitEffect {
    pub new_phone: bool,
    pub new_diphone: bool,
    pub new_leaf: bool,
}

/// Three-level phone → diphone → prosody tree with a fixed branching factor.
///
/// Each level is a flat array indexed by code: `P` phone nodes, `P * P`
/// diphone nodes and `P * P * R` leaves. Nodes below an ignored phone
/// exist but never get wanted weight and never count as covered.
#[derive(Debug, Clone)]
pub struct CoverageTree {
    num_phones: usize,
    num_prosody: usize,
    decrease_factor: f64,
    ignored: Vec<bool>,
    phones: Vec<NodeWeights>,
    diphones: Vec<NodeWeights>,
    leaves: Vec<Leaf>,
    covered_phones: Vec<bool>,
    covered_diphones: Vec<bool>,
    num_covered_phones: usize,
    num_covered_diphones: usize,
    num_covered_leaves: usize,
}

impl CoverageTree {
    /// Build the tree once per run.
    ///
    /// `ignored` has one flag per phone code.
    pub fn build(
        num_phones: usize,
        num_prosody: usize,
        ignored: Vec<bool>,
        weights: LevelWeights,
        decrease_factor: f64,
    ) -> Self {
        assert_eq!(
            ignored.len(),
            num_phones,
            "ignore mask must have one flag per phone code"
        );

        let mut phones = Vec::with_capacity(num_phones);
        let mut diphones = Vec::with_capacity(num_phones * num_phones);
        let mut leaves = Vec::with_capacity(num_phones * num_phones * num_prosody);

        for &skip in &ignored {
            let level = |w: f64| if skip { 0.0 } else { w };
            phones.push(NodeWeights::new(level(weights.phone)));
            for _ in 0..num_phones {
                diphones.push(NodeWeights::new(level(weights.diphone)));
                for _ in 0..num_prosody {
                    leaves.push(Leaf {
                        weights: NodeWeights::new(level(weights.prosody)),
                        max_count: 0,
                        selected_count: 0,
                    });
                }
            }
        }

        Self {
            num_phones,
            num_prosody,
            decrease_factor,
            ignored,
            phones,
            diphones,
            leaves,
            covered_phones: vec![false; num_phones],
            covered_diphones: vec![false; num_phones * num_phones],
            num_covered_phones: 0,
            num_covered_diphones: 0,
            num_covered_leaves: 0,
        }
    }

    pub fn num_phones(&self) -> usize {
        self.num_phones
    }

    pub fn num_prosody(&self) -> usize {
        self.num_prosody
    }

    pub fn is_ignored(&self, phone: u8) -> bool {
        self.ignored[usize::from(phone)]
    }

    /// Phone codes taking part in coverage accounting.
    pub fn counted_phones(&self) -> impl Iterator<Item = u8> + '_ {
        self.ignored
            .iter()
            .enumerate()
            .filter(|(_, &skip)| !skip)
            .map(|(code, _)| code as u8)
    }

    /// Whether a unit takes part in coverage accounting: its phone is not
    /// ignored, and its next phone is either not ignored or the absent phone.
    pub fn counts(&self, unit: Unit) -> bool {
        !self.is_ignored(unit.phone)
            && (unit.next_phone == ABSENT_PHONE || !self.is_ignored(unit.next_phone))
    }

    fn check(&self, phone: u8, next_phone: u8, prosody: u8) {
        assert!(
            usize::from(phone) < self.num_phones
                && usize::from(next_phone) < self.num_phones
                && usize::from(prosody) < self.num_prosody,
            "feature code out of range: ({phone}, {next_phone}, {prosody}) for alphabet ({}, {}, {})",
            self.num_phones,
            self.num_phones,
            self.num_prosody
        );
    }

    fn diphone_index(&self, phone: u8, next_phone: u8) -> usize {
        usize::from(phone) * self.num_phones + usize::from(next_phone)
    }

    fn leaf_index(&self, phone: u8, next_phone: u8, prosody: u8) -> usize {
        self.diphone_index(phone, next_phone) * self.num_prosody + usize::from(prosody)
    }

    pub fn phone_node(&self, phone: u8) -> &NodeWeights {
        &self.phones[usize::from(phone)]
    }

    pub fn diphone_node(&self, phone: u8, next_phone: u8) -> &NodeWeights {
        self.check(phone, next_phone, 0);
        &self.diphones[self.diphone_index(phone, next_phone)]
    }

    pub fn leaf(&self, phone: u8, next_phone: u8, prosody: u8) -> &Leaf {
        self.check(phone, next_phone, prosody);
        &self.leaves[self.leaf_index(phone, next_phone, prosody)]
    }

    /// Record one occurrence of a path in the candidate pool.
    ///
    /// Paths below an ignored phone are not recorded.
    pub fn add_possible_instance(&mut self, phone: u8, next_phone: u8, prosody: u8) {
        self.check(phone, next_phone, prosody);
        if self.is_ignored(phone) {
            return;
        }
        let idx = self.leaf_index(phone, next_phone, prosody);
        self.leaves[idx].max_count += 1;
    }

    pub(crate) fn set_max_count(&mut self, phone: u8, next_phone: u8, prosody: u8, count: u32) {
        self.check(phone, next_phone, prosody);
        let idx = self.leaf_index(phone, next_phone, prosody);
        self.leaves[idx].max_count = count;
    }

    /// Turn pool counts into frequency weights.
    ///
    /// A leaf's relative frequency is `max_count / total_tokens`; an inner
    /// node's is the sum of its children's relative frequencies. The policy
    /// is applied to each node's own frequency.
    pub fn fold_frequencies(&mut self, total_tokens: u64, policy: FrequencyPolicy) {
        let relative = |count: u32| {
            if total_tokens == 0 {
                0.0
            } else {
                f64::from(count) / total_tokens as f64
            }
        };

        let p_len = self.num_phones;
        let r_len = self.num_prosody;
        for p in 0..p_len {
            let mut phone_freq = 0.0;
            for n in 0..p_len {
                let d = p * p_len + n;
                let mut diphone_freq = 0.0;
                for leaf in &mut self.leaves[d * r_len..(d + 1) * r_len] {
                    let f = relative(leaf.max_count);
                    leaf.weights.set_frequency(policy.weight(f));
                    diphone_freq += f;
                }
                self.diphones[d].set_frequency(policy.weight(diphone_freq));
                phone_freq += diphone_freq;
            }
            self.phones[p].set_frequency(policy.weight(phone_freq));
        }
    }

    /// Sum of the cached usefulness of the three nodes on a path.
    ///
    /// # Panics
    /// Panics if a code is outside its alphabet.
    #[inline]
    pub fn score_path(&self, phone: u8, next_phone: u8, prosody: u8) -> f64 {
        self.check(phone, next_phone, prosody);
        self.phones[usize::from(phone)].usefulness
            + self.diphones[self.diphone_index(phone, next_phone)].usefulness
            + self.leaves[self.leaf_index(phone, next_phone, prosody)]
                .weights
                .usefulness
    }

    /// Add one selected unit to the cover.
    ///
    /// The wanted weight of each node on the path is divided by the decrease
    /// factor.
    pub fn commit(&mut self, phone: u8, next_phone: u8, prosody: u8) -> CommitEffect {
        self.check(phone, next_phone, prosody);
        let factor = self.decrease_factor;
        let d = self.diphone_index(phone, next_phone);
        let l = self.leaf_index(phone, next_phone, prosody);

        self.phones[usize::from(phone)].decrease_wanted(factor);
        self.diphones[d].decrease_wanted(factor);
        let leaf = &mut self.leaves[l];
        leaf.weights.decrease_wanted(factor);
        leaf.selected_count += 1;
        let first_in_leaf = leaf.selected_count == 1;

        let mut effect = CommitEffect::default();
        if !self.counts(Unit::new(phone, next_phone, prosody)) {
            return effect;
        }
        if !self.covered_phones[usize::from(phone)] {
            self.covered_phones[usize::from(phone)] = true;
            self.num_covered_phones += 1;
            effect.new_phone = true;
        }
        if !self.covered_diphones[d] {
            self.covered_diphones[d] = true;
            self.num_covered_diphones += 1;
            effect.new_diphone = true;
        }
        if first_in_leaf {
            self.num_covered_leaves += 1;
            effect.new_leaf = true;
        }
        effect
    }

    pub fn num_covered_phones(&self) -> usize {
        self.num_covered_phones
    }

    pub fn num_covered_diphones(&self) -> usize {
        self.num_covered_diphones
    }

    /// Distinct `(diphone, prosody)` combinations in the cover.
    pub fn num_covered_leaves(&self) -> usize {
        self.num_covered_leaves
    }
}
