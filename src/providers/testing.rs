use crate::error::SelectionError;
use crate::features::FeatureVector;
use crate::providers::store::FeatureStore;
use crate::CandidateId;

/// In-memory store whose fetches can be made to fail or to drop ids.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub records: Vec<(CandidateId, Vec<u8>)>,
    /// Number of upcoming fetches that fail outright.
    pub fail_next: usize,
    /// Zero-based numbers of fetches that fail.
    pub fail_on: Vec<usize>,
    /// Ids that come back empty from the next fetch that asks for them.
    pub hide_once: Vec<CandidateId>,
    pub fetches: Vec<Vec<CandidateId>>,
}

impl FlakyStore {
    pub fn with_ids(ids: impl IntoIterator<Item = CandidateId>) -> Self {
        Self {
            records: ids.into_iter().map(|id| (id, vec![1, 0, 0])).collect(),
            ..Default::default()
        }
    }

    pub fn with_vectors(records: impl IntoIterator<Item = (CandidateId, FeatureVector)>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|(id, v)| (id, v.as_bytes().to_vec()))
                .collect(),
            ..Default::default()
        }
    }
}

impl FeatureStore for FlakyStore {
    fn ids(&mut self) -> Result<Vec<CandidateId>, SelectionError> {
        Ok(self.records.iter().map(|(id, _)| *id).collect())
    }

    fn fetch(&mut self, ids: &[CandidateId]) -> Result<Vec<Option<Vec<u8>>>, SelectionError> {
        let number = self.fetches.len();
        self.fetches.push(ids.to_vec());
        if self.fail_on.contains(&number) {
            return Err(SelectionError::Store("timed out".to_string()));
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(SelectionError::Store("connection reset".to_string()));
        }
        Ok(ids
            .iter()
            .map(|id| {
                if let Some(pos) = self.hide_once.iter().position(|h| h == id) {
                    self.hide_once.remove(pos);
                    return None;
                }
                self.records
                    .iter()
                    .find(|(r, _)| r == id)
                    .map(|(_, v)| v.clone())
            })
            .collect())
    }
}
