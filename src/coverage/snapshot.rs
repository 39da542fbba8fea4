// Binary snapshot of the pool statistics.
//
// Everything the initialisation scan learns about the pool fits in the
// corpus statistics plus one `max_count` per leaf. Storing those lets a
// later run skip the scan: frequency weights are rebuilt from the counts.
//
// Layout (all integers big endian):
//
//   magic "COVS", version u16
//   total tokens u64, distinct diphones u32, distinct combinations u32
//   average length f64, max length u32, min length u32
//   possible combinations u32
//   possible phone / diphone / overall coverage f64 x3
//   candidate count u64
//   phone count u16, then one byte per phone: 1 if ignored, else 0
//   per counted phone: child count u16, then per diphone:
//     child count u16, then per leaf: max count u32
//
// Reading checks the shape against a freshly built tree and the stored
// distinct counts against the ones recomputed from the leaves, which
// catches most corruption past the header.

use std::io::{self, Read, Write};

use super::stats::{self, CorpusStatistics};
use super::tree::CoverageTree;
use crate::error::SelectionError;

pub const MAGIC: [u8; 4] = *b"COVS";
pub const VERSION: u16 = 2;

const RATIO_TOLERANCE: f64 = 1e-9;

/// What to do when a snapshot cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotPolicy {
    /// Fail the run.
    Require,
    /// Warn, rescan the pool and overwrite the snapshot.
    #[default]
    Rescan,
}

fn narrow<T: TryFrom<usize>>(value: usize, what: &str) -> Result<T, SelectionError> {
    T::try_from(value)
        .map_err(|_| SelectionError::Snapshot(format!("{what} {value} does not fit the format")))
}

pub fn write<W: Write>(
    writer: &mut W,
    corpus: &CorpusStatistics,
    tree: &CoverageTree,
) -> Result<(), SelectionError> {
    let possible = corpus.possible_coverage();

    writer.write_all(&MAGIC)?;
    writer.write_all(&VERSION.to_be_bytes())?;
    writer.write_all(&corpus.total_tokens.to_be_bytes())?;
    writer.write_all(&narrow::<u32>(corpus.distinct_diphones, "distinct diphones")?.to_be_bytes())?;
    writer.write_all(&narrow::<u32>(corpus.distinct_leaves, "distinct combinations")?.to_be_bytes())?;
    writer.write_all(&corpus.average_length.to_be_bytes())?;
    writer.write_all(&narrow::<u32>(corpus.max_length, "max length")?.to_be_bytes())?;
    writer.write_all(&narrow::<u32>(corpus.min_length, "min length")?.to_be_bytes())?;
    writer.write_all(&narrow::<u32>(corpus.possible_leaves, "possible combinations")?.to_be_bytes())?;
    for ratio in [possible.phone, possible.diphone, possible.overall] {
        writer.write_all(&ratio.to_be_bytes())?;
    }
    writer.write_all(&corpus.num_sentences.to_be_bytes())?;

    let num_phones = narrow::<u16>(tree.num_phones(), "phone count")?;
    let num_prosody = narrow::<u16>(tree.num_prosody(), "prosody count")?;
    writer.write_all(&num_phones.to_be_bytes())?;
    for p in 0..tree.num_phones() {
        writer.write_all(&[u8::from(tree.is_ignored(p as u8))])?;
    }
    for p in tree.counted_phones() {
        writer.write_all(&num_phones.to_be_bytes())?;
        for n in 0..tree.num_phones() {
            writer.write_all(&num_prosody.to_be_bytes())?;
            for r in 0..tree.num_prosody() {
                let count = tree.leaf(p, n as u8, r as u8).max_count();
                writer.write_all(&count.to_be_bytes())?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

struct Fields<R> {
    inner: R,
}

impl<R: Read> Fields<R> {
    fn bytes<const N: usize>(&mut self, what: &str) -> Result<[u8; N], SelectionError> {
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => SelectionError::Snapshot(format!("truncated at {what}")),
            _ => SelectionError::Io(e),
        })?;
        Ok(buf)
    }

    fn u16(&mut self, what: &str) -> Result<u16, SelectionError> {
        self.bytes(what).map(u16::from_be_bytes)
    }

    fn u32(&mut self, what: &str) -> Result<u32, SelectionError> {
        self.bytes(what).map(u32::from_be_bytes)
    }

    fn u64(&mut self, what: &str) -> Result<u64, SelectionError> {
        self.bytes(what).map(u64::from_be_bytes)
    }

    fn f64(&mut self, what: &str) -> Result<f64, SelectionError> {
        self.bytes(what).map(f64::from_be_bytes)
    }

    fn expect_u16(&mut self, what: &str, expected: usize) -> Result<(), SelectionError> {
        let found = self.u16(what)?;
        if usize::from(found) != expected {
            return Err(SelectionError::Snapshot(format!(
                "{what} is {found}, the alphabet needs {expected}"
            )));
        }
        Ok(())
    }
}

/// Read a snapshot into `tree`, which must be freshly built for the
/// current alphabet.
///
/// `expected_candidates` is the provider's count; a snapshot of a
/// different pool is rejected.
pub fn read<R: Read>(
    reader: R,
    tree: &mut CoverageTree,
    expected_candidates: u64,
) -> Result<CorpusStatistics, SelectionError> {
    let mut f = Fields { inner: reader };

    let magic: [u8; 4] = f.bytes("magic")?;
    if magic != MAGIC {
        return Err(SelectionError::Snapshot("bad magic".to_string()));
    }
    let version = f.u16("version")?;
    if version != VERSION {
        return Err(SelectionError::Snapshot(format!(
            "unsupported version {version}"
        )));
    }

    let total_tokens = f.u64("total tokens")?;
    let distinct_diphones = f.u32("distinct diphones")? as usize;
    let distinct_leaves = f.u32("distinct combinations")? as usize;
    let average_length = f.f64("average length")?;
    let max_length = f.u32("max length")? as usize;
    let min_length = f.u32("min length")? as usize;
    let possible_leaves = f.u32("possible combinations")? as usize;
    let stored_ratios = [
        f.f64("phone coverage")?,
        f.f64("diphone coverage")?,
        f.f64("overall coverage")?,
    ];
    let num_sentences = f.u64("candidate count")?;
    if num_sentences != expected_candidates {
        return Err(SelectionError::Snapshot(format!(
            "snapshot covers {num_sentences} candidates, the provider has {expected_candidates}"
        )));
    }

    f.expect_u16("phone count", tree.num_phones())?;
    for p in 0..tree.num_phones() {
        let [flag] = f.bytes::<1>("ignored phones")?;
        let ignored = match flag {
            0 => false,
            1 => true,
            other => {
                return Err(SelectionError::Snapshot(format!(
                    "bad ignore flag {other} for phone {p}"
                )))
            }
        };
        if ignored != tree.is_ignored(p as u8) {
            return Err(SelectionError::Snapshot(format!(
                "phone {p} is {} in the snapshot but {} in the configuration",
                if ignored { "ignored" } else { "counted" },
                if ignored { "counted" } else { "ignored" }
            )));
        }
    }
    let counted: Vec<u8> = tree.counted_phones().collect();
    for p in counted {
        f.expect_u16("diphone count", tree.num_phones())?;
        for n in 0..tree.num_phones() {
            f.expect_u16("prosody count", tree.num_prosody())?;
            for r in 0..tree.num_prosody() {
                let count = f.u32("leaf count")?;
                tree.set_max_count(p, n as u8, r as u8, count);
            }
        }
    }

    let mut trailing = [0u8; 1];
    if f.inner.read(&mut trailing)? != 0 {
        return Err(SelectionError::Snapshot("trailing data".to_string()));
    }

    let (possible_phones, possible_diphones, computed_leaves) = stats::possible_counts(tree);
    if computed_leaves != possible_leaves {
        return Err(SelectionError::Snapshot(format!(
            "snapshot allows {possible_leaves} combinations, the alphabet allows {computed_leaves}"
        )));
    }
    let (distinct_phones, seen_diphones, seen_leaves) = stats::pool_distinct_counts(tree);
    if (seen_diphones, seen_leaves) != (distinct_diphones, distinct_leaves) {
        return Err(SelectionError::Snapshot(format!(
            "leaf counts give {seen_diphones} diphones and {seen_leaves} combinations, \
             header says {distinct_diphones} and {distinct_leaves}"
        )));
    }

    let corpus = CorpusStatistics {
        num_sentences,
        total_tokens,
        distinct_phones,
        distinct_diphones,
        distinct_leaves,
        possible_phones,
        possible_diphones,
        possible_leaves,
        average_length,
        min_length,
        max_length,
    };
    let possible = corpus.possible_coverage();
    let recomputed = [possible.phone, possible.diphone, possible.overall];
    if stored_ratios
        .iter()
        .zip(recomputed)
        .any(|(stored, ours)| !((stored - ours).abs() <= RATIO_TOLERANCE))
    {
        return Err(SelectionError::Snapshot(
            "stored coverage ratios disagree with the leaf counts".to_string(),
        ));
    }
    Ok(corpus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LevelWeights;
    use std::io::Cursor;

    fn tree() -> CoverageTree {
        CoverageTree::build(
            3,
            2,
            vec![true, false, false],
            LevelWeights::new(4.0, 2.0, 1.0),
            2.0,
        )
    }

    fn sample() -> (CorpusStatistics, CoverageTree) {
        let mut t = tree();
        t.add_possible_instance(1, 2, 0);
        t.add_possible_instance(1, 2, 1);
        t.add_possible_instance(1, 2, 1);
        t.add_possible_instance(2, 0, 0);
        let (possible_phones, possible_diphones, possible_leaves) = stats::possible_counts(&t);
        let (distinct_phones, distinct_diphones, distinct_leaves) = stats::pool_distinct_counts(&t);
        let corpus = CorpusStatistics {
            num_sentences: 3,
            total_tokens: 4,
            distinct_phones,
            distinct_diphones,
            distinct_leaves,
            possible_phones,
            possible_diphones,
            possible_leaves,
            average_length: 4.0 / 3.0,
            min_length: 1,
            max_length: 2,
        };
        (corpus, t)
    }

    fn encode() -> Vec<u8> {
        let (corpus, t) = sample();
        let mut buf = Vec::new();
        write(&mut buf, &corpus, &t).unwrap();
        buf
    }

    #[test]
    fn snapshot_restores_statistics_and_counts() {
        let (corpus, original) = sample();
        let mut restored = tree();
        let read_back = read(Cursor::new(encode()), &mut restored, 3).unwrap();
        assert_eq!(read_back, corpus);
        for n in 0..3 {
            for r in 0..2 {
                assert_eq!(
                    restored.leaf(1, n, r).max_count(),
                    original.leaf(1, n, r).max_count()
                );
            }
        }
        assert_eq!(restored.leaf(1, 2, 1).max_count(), 2);
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut bytes = encode();
        bytes[0] = b'X';
        assert!(matches!(
            read(Cursor::new(&bytes), &mut tree(), 3),
            Err(SelectionError::Snapshot(_))
        ));

        let mut bytes = encode();
        bytes[5] = 9;
        assert!(read(Cursor::new(&bytes), &mut tree(), 3).is_err());
    }

    #[test]
    fn rejects_truncation_and_trailing_bytes() {
        let bytes = encode();
        for cut in [3, 20, bytes.len() - 1] {
            let err = read(Cursor::new(&bytes[..cut]), &mut tree(), 3).unwrap_err();
            assert!(matches!(err, SelectionError::Snapshot(_)), "cut at {cut}");
        }
        let mut longer = bytes.clone();
        longer.push(0);
        assert!(read(Cursor::new(&longer), &mut tree(), 3).is_err());
    }

    #[test]
    fn rejects_other_pools_and_alphabets() {
        assert!(read(Cursor::new(encode()), &mut tree(), 4).is_err());

        let mut wider = CoverageTree::build(
            3,
            3,
            vec![true, false, false],
            LevelWeights::default(),
            2.0,
        );
        assert!(read(Cursor::new(encode()), &mut wider, 3).is_err());
    }

    #[test]
    fn rejects_a_different_ignore_set_of_the_same_size() {
        let mut shifted = CoverageTree::build(
            3,
            2,
            vec![false, true, false],
            LevelWeights::new(4.0, 2.0, 1.0),
            2.0,
        );
        assert_eq!(shifted.counted_phones().count(), tree().counted_phones().count());
        let err = read(Cursor::new(encode()), &mut shifted, 3).unwrap_err();
        assert!(matches!(err, SelectionError::Snapshot(_)));
    }

    #[test]
    fn detects_corrupted_leaf_counts() {
        let mut bytes = encode();
        // last leaf is (2, 2, 1), unseen in the pool
        let last = bytes.len() - 1;
        bytes[last] = 5;
        let err = read(Cursor::new(&bytes), &mut tree(), 3).unwrap_err();
        assert!(matches!(err, SelectionError::Snapshot(_)));
    }
}
