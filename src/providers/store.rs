// Backing stores for paged candidate access.
//
// A record file is a flat sequence of records, each a 4-byte big-endian
// candidate id, a 4-byte big-endian payload length and the payload (the
// feature codes). Opening a file scans the headers once and keeps an
// offset index; fetching seeks straight to the payloads.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::SelectionError;
use crate::CandidateId;

/// Largest accepted payload (1 MB). Protects against unbounded allocation
/// from a corrupt length field.
pub const MAX_RECORD_LEN: u32 = 1024 * 1024;

/// External store of raw feature vectors.
pub trait FeatureStore {
    /// Every candidate id, in scan order.
    fn ids(&mut self) -> Result<Vec<CandidateId>, SelectionError>;

    /// Bulk fetch. The result has one entry per requested id; `None` marks
    /// an id the store has no vector for.
    fn fetch(&mut self, ids: &[CandidateId]) -> Result<Vec<Option<Vec<u8>>>, SelectionError>;
}

/// Write `(id, codes)` records in the record file format.
pub fn write_records<'a, W, I>(writer: &mut W, records: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = (CandidateId, &'a [u8])>,
{
    for (id, codes) in records {
        let len = u32::try_from(codes.len())
            .ok()
            .filter(|&len| len <= MAX_RECORD_LEN)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("record {id} too large: {} bytes", codes.len()),
                )
            })?;
        writer.write_all(&id.to_be_bytes())?;
        writer.write_all(&len.to_be_bytes())?;
        writer.write_all(codes)?;
    }
    writer.flush()
}

#[derive(Debug, Clone, Copy)]
struct RecordPos {
    offset: u64,
    len: u32,
}

/// [`FeatureStore`] over a record file.
#[derive(Debug)]
pub struct RecordFileStore {
    path: PathBuf,
    reader: BufReader<File>,
    order: Vec<CandidateId>,
    index: HashMap<CandidateId, RecordPos>,
}

impl RecordFileStore {
    pub fn open(path: &Path) -> Result<Self, SelectionError> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut order = Vec::new();
        let mut index = HashMap::new();

        let mut offset = 0u64;
        let mut header = [0u8; 8];
        while offset < file_len {
            reader.read_exact(&mut header).map_err(|e| {
                SelectionError::Store(format!(
                    "{}: truncated record header at byte {offset}: {e}",
                    path.display()
                ))
            })?;
            let id = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
            if len > MAX_RECORD_LEN {
                return Err(SelectionError::Store(format!(
                    "{}: record {id} claims {len} bytes (max {MAX_RECORD_LEN})",
                    path.display()
                )));
            }
            let payload = offset + 8;
            if payload + u64::from(len) > file_len {
                return Err(SelectionError::Store(format!(
                    "{}: record {id} runs past the end of the file",
                    path.display()
                )));
            }
            if index.insert(id, RecordPos { offset: payload, len }).is_some() {
                return Err(SelectionError::Store(format!(
                    "{}: duplicate record for candidate {id}",
                    path.display()
                )));
            }
            order.push(id);
            reader.seek_relative(i64::from(len))?;
            offset = payload + u64::from(len);
        }

        log::info!("Indexed {} records in {}", order.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            order,
            index,
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl FeatureStore for RecordFileStore {
    fn ids(&mut self) -> Result<Vec<CandidateId>, SelectionError> {
        Ok(self.order.clone())
    }

    /// Payloads are read in file order, so a window of neighbouring
    /// records is one forward pass through the read buffer.
    fn fetch(&mut self, ids: &[CandidateId]) -> Result<Vec<Option<Vec<u8>>>, SelectionError> {
        let mut wanted: Vec<(usize, RecordPos)> = ids
            .iter()
            .enumerate()
            .filter_map(|(slot, id)| self.index.get(id).map(|&pos| (slot, pos)))
            .collect();
        wanted.sort_unstable_by_key(|&(_, pos)| pos.offset);

        let mut out = vec![None; ids.len()];
        let mut cursor: Option<u64> = None;
        for (slot, pos) in wanted {
            match cursor {
                Some(at) if at == pos.offset => {}
                Some(at) if at < pos.offset => {
                    let gap = i64::try_from(pos.offset - at).map_err(|_| {
                        SelectionError::Store(format!("{}: seek out of range", self.path.display()))
                    })?;
                    self.reader.seek_relative(gap)?;
                }
                _ => {
                    self.reader.seek(SeekFrom::Start(pos.offset))?;
                }
            }
            let mut buf = vec![0u8; pos.len as usize];
            self.reader.read_exact(&mut buf).map_err(|e| {
                SelectionError::Store(format!(
                    "{}: failed to read record {}: {e}",
                    self.path.display(),
                    ids[slot]
                ))
            })?;
            cursor = Some(pos.offset + u64::from(pos.len));
            out[slot] = Some(buf);
        }
        Ok(out)
    }
}
