//! Record file — load a whole store file into memory, write back only what changed.
//!
//! A file is `[header][record; count]`. [`RecordFile::materialize`] locks the
//! file, maps it read-only, decodes every record into a `Vec` with room for
//! `extra_capacity` more, and unmaps. Mutations lower the dirty offset to
//! the smallest index they touch; [`RecordFile::persist`] then rewrites the
//! header plus every record from the dirty offset to the end (indices at or
//! after an insert/remove may have shifted) and truncates the file to its
//! new length.
//!
//! There is no journal. A process killed inside `persist` can leave fewer
//! bytes on disk than the header declares; the next `materialize` reports
//! that as `CorruptHeader`.

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use super::codec::{Header, Record};
use super::error::{StoreError, StoreResult};
use super::lock::FileLock;

/// A materialized, exclusively locked store file.
///
/// Only [`RecordFile::materialize`] constructs one, so a persist can never
/// run against a file that was not loaded first.
#[derive(Debug)]
pub struct RecordFile<H, R> {
    lock: FileLock,
    path: PathBuf,
    header: H,
    records: Vec<R>,
    /// Lowest record index changed since the last persist. `None` = nothing
    /// to write. `Some(len)` = header only.
    dirty: Option<usize>,
}

impl<H: Header, R: Record> RecordFile<H, R> {
    /// Lock and load `path`, creating an empty file if it doesn't exist.
    pub fn materialize(path: &Path, extra_capacity: usize) -> StoreResult<Self> {
        let lock = FileLock::acquire(path)?;
        let len = lock.file().metadata()?.len();

        let (header, records) = if len == 0 {
            (H::default(), Vec::with_capacity(extra_capacity))
        } else {
            // SAFETY: the file is exclusively locked by this process for the
            // lifetime of `lock`, and the map is dropped before this function
            // returns, so nothing writes to it while mapped.
            let map = unsafe { Mmap::map(lock.file())? };
            decode_file(path, &map, extra_capacity)?
        };

        debug!(
            "materialized {} ({} records, {} spare)",
            path.display(),
            records.len(),
            extra_capacity
        );

        Ok(Self {
            lock,
            path: path.to_path_buf(),
            header,
            records,
            dirty: None,
        })
    }

    /// Write the header and every record from the dirty offset onward, then
    /// truncate. Returns `false` (and touches nothing) if nothing changed.
    pub fn persist(&mut self) -> StoreResult<bool> {
        let Some(from) = self.dirty else {
            return Ok(false);
        };
        let from = from.min(self.records.len());

        let mut head = vec![0u8; H::SIZE];
        self.header.encode(&mut head);

        let tail = &self.records[from..];
        let mut body = vec![0u8; tail.len() * R::SIZE];
        for (record, chunk) in tail.iter().zip(body.chunks_exact_mut(R::SIZE)) {
            record.encode(chunk);
        }

        let mut file = self.lock.file();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&head)?;
        file.seek(SeekFrom::Start(Self::offset_of(from)))?;
        file.write_all(&body)?;
        file.set_len(Self::offset_of(self.records.len()))?;
        file.sync_data()?;

        debug!(
            "persisted {} from record {from} ({} bytes)",
            self.path.display(),
            head.len() + body.len()
        );

        self.dirty = None;
        Ok(true)
    }

    fn offset_of(index: usize) -> u64 {
        (H::SIZE + index * R::SIZE) as u64
    }

    fn touch(&mut self, index: usize) {
        self.dirty = Some(self.dirty.map_or(index, |d| d.min(index)));
    }

    pub fn header(&self) -> &H {
        &self.header
    }

    /// Mutable header access. Marks the header for rewrite.
    pub fn header_mut(&mut self) -> &mut H {
        self.touch(self.records.len());
        &mut self.header
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    /// Mutable access to one record. Marks it dirty.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut R> {
        if index >= self.records.len() {
            return None;
        }
        self.touch(index);
        self.records.get_mut(index)
    }

    /// Insert at `index`, shifting later records up. Panics if `index > len`.
    pub fn insert(&mut self, index: usize, record: R) {
        self.records.insert(index, record);
        self.touch(index);
    }

    pub fn push(&mut self, record: R) {
        self.touch(self.records.len());
        self.records.push(record);
    }

    /// Remove at `index`, shifting later records down. Panics if out of range.
    pub fn remove(&mut self, index: usize) -> R {
        let record = self.records.remove(index);
        self.touch(index);
        record
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dirty_offset(&self) -> Option<usize> {
        self.dirty
    }
}

fn decode_file<H: Header, R: Record>(
    path: &Path,
    bytes: &[u8],
    extra_capacity: usize,
) -> StoreResult<(H, Vec<R>)> {
    let corrupt = |declared: usize, payload_len: usize| StoreError::CorruptHeader {
        path: path.to_path_buf(),
        declared,
        payload_len,
    };

    if bytes.len() < H::SIZE {
        return Err(corrupt(0, bytes.len()));
    }
    let (head, payload) = bytes.split_at(H::SIZE);
    let header = H::decode(head).map_err(|_| corrupt(0, payload.len()))?;

    let declared = header.count();
    if payload.len() % R::SIZE != 0 || payload.len() / R::SIZE != declared {
        return Err(corrupt(declared, payload.len()));
    }

    let mut records = Vec::with_capacity(declared + extra_capacity);
    for (index, chunk) in payload.chunks_exact(R::SIZE).enumerate() {
        let record = R::decode(chunk).map_err(|source| StoreError::CorruptRecord {
            path: path.to_path_buf(),
            index,
            source,
        })?;
        records.push(record);
    }

    Ok((header, records))
}
