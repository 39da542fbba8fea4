use crate::error::SelectionError;
use crate::features::FeatureVector;
use crate::providers::store::FeatureStore;
use crate::{CandidateId, CandidateProvider, Chunk};

/// Ids fetched per window unless configured otherwise.
pub const DEFAULT_WINDOW_LEN: usize = 500_000;

/// Bulk fetch attempts per window during a strict scan.
pub const STRICT_FETCH_ATTEMPTS: usize = 3;

#[derive(Debug)]
struct Window {
    start: usize,
    vectors: Vec<Option<FeatureVector>>,
    missing: usize,
    /// The bulk fetch failed; the window is fetched again on next access.
    failed: bool,
    /// Scan during which missing entries were last requested.
    scan: u64,
}

impl Window {
    fn fetch<S: FeatureStore>(
        store: &mut S,
        start: usize,
        ids: &[CandidateId],
        scan: u64,
    ) -> Result<Self, SelectionError> {
        log::debug!(
            "Fetching window of {} vectors at index {start}",
            ids.len()
        );
        let raw = store.fetch(ids)?;
        if raw.len() != ids.len() {
            return Err(SelectionError::Store(format!(
                "store returned {} vectors for {} ids",
                raw.len(),
                ids.len()
            )));
        }
        let vectors: Vec<Option<FeatureVector>> = ids
            .iter()
            .zip(raw)
            .map(|(&id, bytes)| decode(id, bytes))
            .collect();
        let missing = vectors.iter().filter(|v| v.is_none()).count();
        Ok(Window {
            start,
            vectors,
            missing,
            failed: false,
            scan,
        })
    }

    fn failed(start: usize, len: usize, scan: u64) -> Self {
        Window {
            start,
            vectors: vec![None; len],
            missing: len,
            failed: true,
            scan,
        }
    }

    /// Ask the store again for the entries that came back empty.
    fn refetch_missing<S: FeatureStore>(&mut self, store: &mut S, ids: &[CandidateId], scan: u64) {
        self.scan = scan;
        let slots: Vec<usize> = self
            .vectors
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.is_none().then_some(i))
            .collect();
        let wanted: Vec<CandidateId> = slots.iter().map(|&i| ids[i]).collect();
        log::debug!(
            "Refetching {} missing vectors in window at index {}",
            wanted.len(),
            self.start
        );

        match store.fetch(&wanted) {
            Ok(raw) if raw.len() == wanted.len() => {
                for ((slot, id), bytes) in slots.into_iter().zip(wanted).zip(raw) {
                    if let Some(vector) = decode(id, bytes) {
                        self.vectors[slot] = Some(vector);
                        self.missing -= 1;
                    }
                }
            }
            Ok(raw) => log::warn!(
                "Refetch of {} vectors returned {} entries",
                wanted.len(),
                raw.len()
            ),
            Err(e) => log::warn!("Refetch of {} vectors failed: {e}", wanted.len()),
        }
    }
}

fn decode(id: CandidateId, bytes: Option<Vec<u8>>) -> Option<FeatureVector> {
    match FeatureVector::from_bytes(id, bytes?) {
        Ok(vector) => Some(vector),
        Err(e) => {
            log::warn!("{e}");
            None
        }
    }
}

/// Provider that keeps only the ids resident and pages vectors in from a
/// [`FeatureStore`], one window at a time.
///
/// A window stays cached until an index outside it is requested. A failed
/// bulk fetch yields missing vectors for the whole window and is retried on
/// the next access; ids missing from a successful fetch are requested again
/// once per scan. [`strict_chunk`](CandidateProvider::strict_chunk) retries
/// a failing fetch up to [`STRICT_FETCH_ATTEMPTS`] times and then returns
/// the store error.
#[derive(Debug)]
pub struct PagedProvider<S: FeatureStore> {
    store: S,
    ids: Vec<CandidateId>,
    window_len: usize,
    window: Option<Window>,
    scan: u64,
}

impl<S: FeatureStore> PagedProvider<S> {
    pub fn new(mut store: S) -> Result<Self, SelectionError> {
        let ids = store.ids()?;
        log::info!("Paged provider over {} candidates", ids.len());
        Ok(Self {
            store,
            ids,
            window_len: DEFAULT_WINDOW_LEN,
            window: None,
            scan: 0,
        })
    }

    pub fn with_window_len(mut self, window_len: usize) -> Self {
        self.window_len = window_len.max(1);
        self.window = None;
        self
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Make the window starting at `window_start` resident.
    fn load_window(
        &mut self,
        window_start: usize,
        window_end: usize,
        strict: bool,
    ) -> Result<(), SelectionError> {
        let scan = self.scan;
        let ids = &self.ids[window_start..window_end];

        if let Some(window) = self
            .window
            .as_mut()
            .filter(|w| w.start == window_start && !w.failed)
        {
            if window.missing > 0 && window.scan != scan {
                window.refetch_missing(&mut self.store, ids, scan);
            }
            return Ok(());
        }

        let attempts = if strict { STRICT_FETCH_ATTEMPTS } else { 1 };
        let mut attempt = 1;
        let window = loop {
            match Window::fetch(&mut self.store, window_start, ids, scan) {
                Ok(window) => break window,
                Err(e) if attempt < attempts => {
                    log::warn!(
                        "Bulk fetch of {} vectors at index {window_start} failed \
                         (attempt {attempt} of {attempts}): {e}",
                        ids.len()
                    );
                    attempt += 1;
                }
                Err(e) if strict => {
                    self.window = None;
                    return Err(e);
                }
                Err(e) => {
                    log::warn!(
                        "Bulk fetch of {} vectors at index {window_start} failed: {e}",
                        ids.len()
                    );
                    break Window::failed(window_start, ids.len(), scan);
                }
            }
        };
        self.window = Some(window);
        Ok(())
    }

    fn window_chunk(
        &mut self,
        start: usize,
        len: usize,
        strict: bool,
    ) -> Result<Chunk<'_>, SelectionError> {
        let total = self.ids.len();
        if start >= total {
            if start > total {
                return Err(SelectionError::Store(format!(
                    "index {start} is past the {total} candidates"
                )));
            }
            return Ok(Chunk {
                start,
                ids: &[],
                vectors: &[],
            });
        }

        let window_start = start - start % self.window_len;
        let window_end = (window_start + self.window_len).min(total);
        self.load_window(window_start, window_end, strict)?;
        let Some(window) = &self.window else {
            return Err(SelectionError::Store(format!(
                "no window resident at index {start}"
            )));
        };

        let end = start.saturating_add(len).min(window_end);
        let offset = start - window_start;
        Ok(Chunk {
            start,
            ids: &self.ids[start..end],
            vectors: &window.vectors[offset..end - window_start],
        })
    }
}

impl<S: FeatureStore> CandidateProvider for PagedProvider<S> {
    fn count(&self) -> usize {
        self.ids.len()
    }

    fn id_at(&self, index: usize) -> Option<CandidateId> {
        self.ids.get(index).copied()
    }

    fn chunk(&mut self, start: usize, len: usize) -> Result<Chunk<'_>, SelectionError> {
        self.window_chunk(start, len, false)
    }

    fn strict_chunk(&mut self, start: usize, len: usize) -> Result<Chunk<'_>, SelectionError> {
        self.window_chunk(start, len, true)
    }

    fn chunk_len(&self) -> usize {
        self.window_len
    }

    fn begin_scan(&mut self) {
        self.scan += 1;
    }
}
