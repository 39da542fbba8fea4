//! Run configuration.
//!
//! A run is described by a [`SelectionConfig`], normally loaded from JSON:
//!
//! ```json
//! {
//!   "alphabet": { "phones": ["0", "a", "b"], "prosody": ["stressed", "unstressed"] },
//!   "coverage": {
//!     "weights": { "phone": 4.0, "diphone": 2.0, "prosody": 1.0 },
//!     "decrease_factor": 2.0,
//!     "frequency": "identity",
//!     "sentence_length": { "min": 5, "max": 30 },
//!     "ignored_phones": []
//!   },
//!   "stop": { "max_selected": 500, "diphone_saturation": true }
//! }
//! ```
//!
//! The coverage block can also be read from the older key/value format
//! (see [`CoverageConfig::from_legacy_str`]) and the stop criteria from
//! their one-line textual form (see [`StopCriteria`]'s `FromStr`).

use std::path::Path;
use std::str::FromStr;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::SelectionError;
use crate::features::FeatureAlphabet;

/// Initial wanted weight of the nodes at each tree level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelWeights {
    pub phone: f64,
    pub diphone: f64,
    pub prosody: f64,
}

impl Default for LevelWeights {
    fn default() -> Self {
        Self {
            phone: 1.0,
            diphone: 1.0,
            prosody: 1.0,
        }
    }
}

impl LevelWeights {
    pub const fn new(phone: f64, diphone: f64, prosody: f64) -> Self {
        Self {
            phone,
            diphone,
            prosody,
        }
    }
}

/// How a node's relative pool frequency `f` becomes its frequency weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyPolicy {
    /// Frequency is not considered; every weight stays 1.
    #[default]
    None,
    /// `f`: favour common units.
    Identity,
    /// `1 - f`: mildly favour rare units.
    Complement,
    /// `1 / f`: strongly favour rare units. Unseen nodes (`f = 0`) weigh 0.
    Reciprocal,
}

impl FrequencyPolicy {
    pub fn weight(self, f: f64) -> f64 {
        match self {
            FrequencyPolicy::None => 1.0,
            FrequencyPolicy::Identity => f,
            FrequencyPolicy::Complement => 1.0 - f,
            FrequencyPolicy::Reciprocal => {
                if f > 0.0 {
                    1.0 / f
                } else {
                    0.0
                }
            }
        }
    }

    fn legacy_name(self) -> &'static str {
        match self {
            FrequencyPolicy::None => "none",
            FrequencyPolicy::Identity => "normal",
            FrequencyPolicy::Complement => "1minus",
            FrequencyPolicy::Reciprocal => "inverse",
        }
    }
}

/// Inclusive bounds on sentence length, in units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthBounds {
    pub min: usize,
    pub max: usize,
}

impl LengthBounds {
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, len: usize) -> bool {
        (self.min..=self.max).contains(&len)
    }
}

/// Parameters of the coverage tree and of the usefulness function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(default)]
#[serde(default)]
pub struct CoverageConfig {
    pub weights: LevelWeights,
    /// Every committed unit divides the wanted weight of its three nodes by this.
    pub decrease_factor: f64,
    pub frequency: FrequencyPolicy,
    /// Sentences outside these bounds score the sentinel and become unwanted.
    #[builder(setter(strip_option))]
    pub sentence_length: Option<LengthBounds>,
    /// Phone symbols excluded from coverage accounting, besides the absent phone.
    pub ignored_phones: Vec<String>,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            weights: LevelWeights::default(),
            decrease_factor: 10.0,
            frequency: FrequencyPolicy::None,
            sentence_length: None,
            ignored_phones: Vec::new(),
        }
    }
}

impl CoverageConfig {
    pub fn validate(&self) -> Result<(), SelectionError> {
        if !self.decrease_factor.is_finite() || self.decrease_factor <= 1.0 {
            return Err(SelectionError::InvalidDecreaseFactor(self.decrease_factor));
        }
        let w = self.weights;
        for (level, value) in [("phone", w.phone), ("diphone", w.diphone), ("prosody", w.prosody)] {
            if !value.is_finite() || value < 0.0 {
                return Err(SelectionError::Config(format!(
                    "{level} level weight must be a finite non-negative number, got {value}"
                )));
            }
        }
        if let Some(bounds) = self.sentence_length {
            if bounds.min > bounds.max {
                return Err(SelectionError::Config(format!(
                    "sentence length bounds are inverted: min {} > max {}",
                    bounds.min, bounds.max
                )));
            }
        }
        Ok(())
    }

    /// Parse the key/value coverage configuration format.
    ///
    /// One setting per line, `#` starts a comment line:
    ///
    /// ```text
    /// simpleDiphones true
    /// frequency 1minus
    /// sentenceLength 30 5
    /// wantedWeight 4 2 1
    /// wantedWeightDecrease 2
    /// missingPhones 0 Q
    /// ```
    ///
    /// `sentenceLength` takes the maximum first, or `none`. `frequency` is
    /// `none`, `1minus`, `inverse`, or anything else for plain frequency.
    /// The absent phone listed under `missingPhones` is dropped since it is
    /// always ignored.
    pub fn from_legacy_str(text: &str) -> Result<Self, SelectionError> {
        let mut config = CoverageConfig::default();
        let mut seen = Vec::new();

        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let key = tokens.next().unwrap_or_default();
            let values: Vec<&str> = tokens.collect();
            let bad = |what: &str| {
                SelectionError::Config(format!("line {}: {what} in '{line}'", line_no + 1))
            };
            let number = |s: &str| s.parse::<f64>().map_err(|_| bad("expected a number"));

            match key {
                "simpleDiphones" => {
                    if values.first() != Some(&"true") {
                        return Err(bad("only the simple diphone cover is supported"));
                    }
                }
                "frequency" => {
                    config.frequency = match values.first().copied() {
                        Some("none") => FrequencyPolicy::None,
                        Some("1minus") => FrequencyPolicy::Complement,
                        Some("inverse") => FrequencyPolicy::Reciprocal,
                        Some(_) => FrequencyPolicy::Identity,
                        None => return Err(bad("missing frequency setting")),
                    };
                }
                "sentenceLength" => {
                    config.sentence_length = match values.as_slice() {
                        ["none", ..] => None,
                        [max, min, ..] => {
                            let max = max.parse().map_err(|_| bad("expected a length"))?;
                            let min = min.parse().map_err(|_| bad("expected a length"))?;
                            Some(LengthBounds::new(min, max))
                        }
                        _ => return Err(bad("expected 'none' or '<max> <min>'")),
                    };
                }
                "wantedWeight" => {
                    let [p, d, r] = values.as_slice() else {
                        return Err(bad("expected three level weights"));
                    };
                    config.weights = LevelWeights::new(number(*p)?, number(*d)?, number(*r)?);
                }
                "wantedWeightDecrease" => {
                    let value = values.first().ok_or_else(|| bad("missing value"))?;
                    config.decrease_factor = number(*value)?;
                }
                "missingPhones" => {
                    config.ignored_phones = values
                        .iter()
                        .filter(|s| **s != "0")
                        .map(|s| s.to_string())
                        .collect();
                }
                other => {
                    log::warn!("Ignoring unknown coverage setting '{other}'");
                    continue;
                }
            }
            seen.push(key.to_string());
        }

        const REQUIRED: [&str; 6] = [
            "simpleDiphones",
            "frequency",
            "sentenceLength",
            "wantedWeight",
            "wantedWeightDecrease",
            "missingPhones",
        ];
        let missing: Vec<&str> = REQUIRED
            .iter()
            .copied()
            .filter(|k| !seen.iter().any(|s| s == k))
            .collect();
        if !missing.is_empty() {
            return Err(SelectionError::Config(format!(
                "coverage config is missing settings: {}",
                missing.join(", ")
            )));
        }

        config.validate()?;
        Ok(config)
    }

    /// Render the settings in the key/value format, for logs and reports.
    pub fn to_legacy_string(&self) -> String {
        let length = match self.sentence_length {
            Some(b) => format!("{} {}", b.max, b.min),
            None => "none".to_string(),
        };
        let mut missing = vec!["0".to_string()];
        missing.extend(self.ignored_phones.iter().cloned());
        format!(
            "simpleDiphones true\nfrequency {}\nsentenceLength {}\nwantedWeight {} {} {}\n\
             wantedWeightDecrease {}\nmissingPhones {}\n",
            self.frequency.legacy_name(),
            length,
            self.weights.phone,
            self.weights.diphone,
            self.weights.prosody,
            self.decrease_factor,
            missing.join(" ")
        )
    }
}

/// When the greedy loop stops.
///
/// `max_selected` stops as soon as that many sentences are selected. The
/// enabled saturation criteria must all hold before they stop the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StopCriteria {
    pub max_selected: Option<usize>,
    pub diphone_saturation: bool,
    pub prosody_saturation: bool,
}

impl StopCriteria {
    pub fn max_selected(n: usize) -> Self {
        Self {
            max_selected: Some(n),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max_selected.is_none() && !self.diphone_saturation && !self.prosody_saturation
    }

    pub fn validate(&self) -> Result<(), SelectionError> {
        if self.is_empty() {
            return Err(SelectionError::EmptyStopCriteria);
        }
        Ok(())
    }
}

/// Parses `numSentences <n> simpleDiphones simpleProsody` (any subset, any order).
impl FromStr for StopCriteria {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut criteria = StopCriteria::default();
        let mut tokens = s.split_whitespace();
        while let Some(token) = tokens.next() {
            match token {
                "numSentences" => {
                    let n = tokens
                        .next()
                        .and_then(|n| n.parse().ok())
                        .ok_or_else(|| SelectionError::StopCriterion(s.to_string()))?;
                    criteria.max_selected = Some(n);
                }
                "simpleDiphones" => criteria.diphone_saturation = true,
                "simpleProsody" => criteria.prosody_saturation = true,
                "clusteredDiphones" | "clusteredProsody" => {
                    return Err(SelectionError::StopCriterion(format!(
                        "{token}: clustered cover sets are not supported"
                    )));
                }
                _ => return Err(SelectionError::StopCriterion(s.to_string())),
            }
        }
        criteria.validate()?;
        Ok(criteria)
    }
}

/// Everything a selection run needs besides the candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub alphabet: FeatureAlphabet,
    #[serde(default)]
    pub coverage: CoverageConfig,
    pub stop: StopCriteria,
}

impl SelectionConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, SelectionError> {
        let content = std::fs::read_to_string(path)?;
        let config: SelectionConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every setting; all configuration errors surface here, before any scan.
    pub fn validate(&self) -> Result<(), SelectionError> {
        self.alphabet.validate()?;
        self.alphabet.ignore_mask(&self.coverage.ignored_phones)?;
        self.coverage.validate()?;
        self.stop.validate()
    }
}
