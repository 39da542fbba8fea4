use crate::error::SelectionError;
use crate::features::FeatureVector;
use crate::providers::store::FeatureStore;
use crate::{CandidateId, CandidateProvider, Chunk};

/// Provider holding every candidate's vector in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    ids: Vec<CandidateId>,
    vectors: Vec<Option<FeatureVector>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: CandidateId, vector: FeatureVector) {
        self.ids.push(id);
        self.vectors.push(Some(vector));
    }

    /// Register a candidate whose vector could not be read.
    pub fn push_missing(&mut self, id: CandidateId) {
        self.ids.push(id);
        self.vectors.push(None);
    }

    /// Load every vector of a store up front.
    ///
    /// Malformed vectors are logged and kept as missing.
    pub fn from_store<S: FeatureStore + ?Sized>(store: &mut S) -> Result<Self, SelectionError> {
        let ids = store.ids()?;
        let raw = store.fetch(&ids)?;
        if raw.len() != ids.len() {
            return Err(SelectionError::Store(format!(
                "store returned {} vectors for {} ids",
                raw.len(),
                ids.len()
            )));
        }

        let mut provider = Self {
            ids: Vec::with_capacity(ids.len()),
            vectors: Vec::with_capacity(ids.len()),
        };
        for (id, bytes) in ids.into_iter().zip(raw) {
            match bytes.map(|b| FeatureVector::from_bytes(id, b)) {
                Some(Ok(vector)) => provider.push(id, vector),
                Some(Err(e)) => {
                    log::warn!("{e}");
                    provider.push_missing(id);
                }
                None => provider.push_missing(id),
            }
        }
        log::info!("Loaded {} candidate vectors into memory", provider.ids.len());
        Ok(provider)
    }
}

impl FromIterator<(CandidateId, FeatureVector)> for InMemoryProvider {
    fn from_iter<I: IntoIterator<Item = (CandidateId, FeatureVector)>>(iter: I) -> Self {
        let mut provider = Self::new();
        for (id, vector) in iter {
            provider.push(id, vector);
        }
        provider
    }
}

impl CandidateProvider for InMemoryProvider {
    fn count(&self) -> usize {
        self.ids.len()
    }

    fn id_at(&self, index: usize) -> Option<CandidateId> {
        self.ids.get(index).copied()
    }

    fn chunk(&mut self, start: usize, len: usize) -> Result<Chunk<'_>, SelectionError> {
        if start > self.ids.len() {
            return Err(SelectionError::Store(format!(
                "index {start} is past the {} candidates",
                self.ids.len()
            )));
        }
        let end = start.saturating_add(len).min(self.ids.len());
        Ok(Chunk {
            start,
            ids: &self.ids[start..end],
            vectors: &self.vectors[start..end],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Unit;

    #[test]
    fn chunks_are_clamped_to_the_pool() {
        let mut provider: InMemoryProvider = (10..13)
            .map(|id| (id, FeatureVector::from_units(&[Unit::new(1, 0, 0)])))
            .collect();
        assert_eq!(provider.count(), 3);
        assert_eq!(provider.id_at(2), Some(12));
        assert_eq!(provider.id_at(3), None);

        let chunk = provider.chunk(1, 100).unwrap();
        assert_eq!(chunk.ids, &[11, 12]);
        assert!(provider.chunk(4, 1).is_err());
    }

    #[test]
    fn missing_vectors_read_as_none() {
        let mut provider = InMemoryProvider::new();
        provider.push_missing(5);
        assert!(provider.features_of(0).unwrap().is_none());
    }
}
