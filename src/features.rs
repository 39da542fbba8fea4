//! Feature codes consumed from the external feature extractor.
//!
//! Every candidate sentence arrives as a flat byte sequence holding one
//! `(phone, next_phone, prosody)` triple per phonetic unit. The
//! [`FeatureAlphabet`] names the codes of each position.

use serde::{Deserialize, Serialize};

use crate::error::SelectionError;
use crate::CandidateId;

/// Phone code reserved for "no phone" (e.g. the next phone at sentence end).
pub const ABSENT_PHONE: u8 = 0;

/// Number of codes per unit in a flat feature vector.
pub const UNIT_ARITY: usize = 3;

/// One phonetic position of a sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Unit {
    pub phone: u8,
    pub next_phone: u8,
    pub prosody: u8,
}

impl Unit {
    pub const fn new(phone: u8, next_phone: u8, prosody: u8) -> Self {
        Self {
            phone,
            next_phone,
            prosody,
        }
    }
}

/// The units of one candidate sentence, stored as the flat code sequence.
///
/// A vector is never empty and always holds a whole number of units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureVector {
    codes: Vec<u8>,
}

impl FeatureVector {
    /// Wrap a raw code sequence as delivered by a feature store.
    pub fn from_bytes(id: CandidateId, codes: Vec<u8>) -> Result<Self, SelectionError> {
        if codes.is_empty() {
            return Err(SelectionError::MalformedVector {
                id,
                reason: "no units".to_string(),
            });
        }
        if codes.len() % UNIT_ARITY != 0 {
            return Err(SelectionError::MalformedVector {
                id,
                reason: format!(
                    "{} codes is not a multiple of {UNIT_ARITY}",
                    codes.len()
                ),
            });
        }
        Ok(Self { codes })
    }

    /// Build a vector from units.
    ///
    /// # Panics
    /// Panics if `units` is empty.
    pub fn from_units(units: &[Unit]) -> Self {
        assert!(!units.is_empty(), "a candidate sentence needs at least one unit");
        let mut codes = Vec::with_capacity(units.len() * UNIT_ARITY);
        for unit in units {
            codes.extend_from_slice(&[unit.phone, unit.next_phone, unit.prosody]);
        }
        Self { codes }
    }

    /// Number of units (the sentence length).
    pub fn len(&self) -> usize {
        self.codes.len() / UNIT_ARITY
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn units(&self) -> impl ExactSizeIterator<Item = Unit> + '_ {
        self.codes
            .chunks_exact(UNIT_ARITY)
            .map(|c| Unit::new(c[0], c[1], c[2]))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.codes
    }
}

/// Symbol tables for the three code positions.
///
/// Phone code 0 is the absent phone. The next-phone table, when given,
/// must match the phone table; the tree indexes both levels with the same
/// `P` codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureAlphabet {
    pub phones: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_phones: Option<Vec<String>>,
    pub prosody: Vec<String>,
}

impl FeatureAlphabet {
    pub fn new(phones: Vec<String>, prosody: Vec<String>) -> Self {
        Self {
            phones,
            next_phones: None,
            prosody,
        }
    }

    pub fn num_phones(&self) -> usize {
        self.phones.len()
    }

    pub fn num_prosody(&self) -> usize {
        self.prosody.len()
    }

    pub fn validate(&self) -> Result<(), SelectionError> {
        if self.phones.len() < 2 {
            return Err(SelectionError::AlphabetMismatch(format!(
                "need the absent phone plus at least one real phone, got {} phone codes",
                self.phones.len()
            )));
        }
        if self.prosody.is_empty() {
            return Err(SelectionError::AlphabetMismatch(
                "prosody alphabet is empty".to_string(),
            ));
        }
        for (name, len) in [("phone", self.phones.len()), ("prosody", self.prosody.len())] {
            if len > usize::from(u8::MAX) + 1 {
                return Err(SelectionError::AlphabetMismatch(format!(
                    "{name} alphabet has {len} codes, at most 256 fit a byte code"
                )));
            }
        }
        if let Some(next) = &self.next_phones {
            if next.len() != self.phones.len() {
                return Err(SelectionError::AlphabetMismatch(format!(
                    "next_phone alphabet has {} codes but phone alphabet has {}",
                    next.len(),
                    self.phones.len()
                )));
            }
        }
        Ok(())
    }

    pub fn phone_code(&self, symbol: &str) -> Option<u8> {
        self.phones
            .iter()
            .position(|p| p == symbol)
            .and_then(|i| u8::try_from(i).ok())
    }

    pub fn phone_symbol(&self, code: u8) -> &str {
        self.phones
            .get(usize::from(code))
            .map(String::as_str)
            .unwrap_or("?")
    }

    pub fn next_phone_symbol(&self, code: u8) -> &str {
        match &self.next_phones {
            Some(next) => next.get(usize::from(code)).map(String::as_str).unwrap_or("?"),
            None => self.phone_symbol(code),
        }
    }

    pub fn prosody_symbol(&self, code: u8) -> &str {
        self.prosody
            .get(usize::from(code))
            .map(String::as_str)
            .unwrap_or("?")
    }

    /// Resolve ignored phone symbols into a per-code mask.
    ///
    /// The absent phone is always ignored.
    pub fn ignore_mask(&self, ignored: &[String]) -> Result<Vec<bool>, SelectionError> {
        let mut mask = vec![false; self.phones.len()];
        mask[usize::from(ABSENT_PHONE)] = true;
        for symbol in ignored {
            let code = self
                .phone_code(symbol)
                .ok_or_else(|| SelectionError::UnknownSymbol {
                    kind: "phone",
                    symbol: symbol.clone(),
                })?;
            mask[usize::from(code)] = true;
        }
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_partial_units() {
        let err = FeatureVector::from_bytes(7, vec![1, 2, 0, 1]).unwrap_err();
        assert!(matches!(err, SelectionError::MalformedVector { id: 7, .. }));
    }

    #[test]
    fn rejects_empty_vector() {
        assert!(FeatureVector::from_bytes(1, Vec::new()).is_err());
    }

    #[test]
    fn iterates_units_in_order() {
        let v = FeatureVector::from_bytes(1, vec![1, 2, 0, 2, 0, 1]).unwrap();
        assert_eq!(v.len(), 2);
        let units: Vec<Unit> = v.units().collect();
        assert_eq!(units, vec![Unit::new(1, 2, 0), Unit::new(2, 0, 1)]);
        assert_eq!(FeatureVector::from_units(&units), v);
    }

    #[test]
    fn ignore_mask_always_contains_absent_phone() {
        let alphabet = FeatureAlphabet::new(
            vec!["0".into(), "a".into(), "b".into(), "c".into()],
            vec!["stressed".into(), "unstressed".into()],
        );
        let mask = alphabet.ignore_mask(&["c".to_string()]).unwrap();
        assert_eq!(mask, vec![true, false, false, true]);

        let err = alphabet.ignore_mask(&["x".to_string()]).unwrap_err();
        assert!(matches!(err, SelectionError::UnknownSymbol { .. }));
    }

    #[test]
    fn next_phone_table_must_match_phones() {
        let mut alphabet = FeatureAlphabet::new(
            vec!["0".into(), "a".into(), "b".into()],
            vec!["stressed".into(), "unstressed".into()],
        );
        assert!(alphabet.validate().is_ok());
        alphabet.next_phones = Some(vec!["0".into(), "a".into()]);
        assert!(matches!(
            alphabet.validate(),
            Err(SelectionError::AlphabetMismatch(_))
        ));
    }
}
