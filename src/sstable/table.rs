use super::data::{SsTableDataReader, SsTableDataWriter};
use super::format::IndexEntry;
use super::index::{SsTableIndexReader, SsTableIndexWriter};
use crate::blockstore::Position;
use crate::{Error, Result};
use bytes::Bytes;
use tracing::info;

/// What a key resolves to inside a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Value(Bytes),
    Deleted,
}

/// Single write session of a table. Values go to the data storage first, then the
/// index entry pointing at them is added.
pub struct SsTableWriter {
    data: SsTableDataWriter,
    index: SsTableIndexWriter,
}

impl SsTableWriter {
    pub(crate) fn new(data: SsTableDataWriter, index: SsTableIndexWriter) -> Self {
        Self { data, index }
    }

    pub fn max_key_size(&self) -> usize {
        self.index.max_key_size()
    }

    pub fn max_value_size(&self) -> usize {
        self.data.max_value_size()
    }

    /// Keys have to be written in strictly ascending order, otherwise lookups silently
    /// return wrong results. Sizes are checked before anything is written.
    pub fn write(&mut self, key: &[u8], value: &[u8], deleted: bool) -> Result<()> {
        if key.len() > self.max_key_size() {
            return Err(Error::KeyTooLarge {
                size: key.len(),
                max: self.max_key_size(),
            });
        }

        if value.len() > self.max_value_size() {
            return Err(Error::ValueTooLarge {
                size: value.len(),
                max: self.max_value_size(),
            });
        }

        let position = if deleted {
            Position::UNINITIALIZED
        } else {
            self.data.write_value(value)?
        };

        self.index.write_index(key, deleted, position)
    }

    /// Commits the index and then the data file. These are two separate syncs: a crash
    /// in between leaves an index referencing records that may not be durable yet.
    pub fn commit(mut self) -> Result<()> {
        self.index.commit()?;
        self.data.commit()?;

        info!(
            keys = self.index.key_count(),
            values = self.data.record_count(),
            "committed sstable"
        );

        Ok(())
    }
}

struct Scan {
    next_block: u32,
    entries: std::vec::IntoIter<IndexEntry>,
}

/// Read side of a committed table. Every reader owns its buffers and first key cache,
/// so independent readers can be used from different threads.
pub struct SsTableReader {
    index: SsTableIndexReader,
    data: SsTableDataReader,
    scan: Option<Scan>,
}

impl SsTableReader {
    pub(crate) fn new(index: SsTableIndexReader, data: SsTableDataReader) -> Self {
        Self {
            index,
            data,
            scan: None,
        }
    }

    pub(crate) fn read_headers(&mut self) -> Result<()> {
        self.index.read_header()?;
        self.data.read_header()
    }

    pub fn key_count(&self) -> u32 {
        self.index.header().key_count
    }

    /// Number of records in the data storage, tombstones have none.
    pub fn value_count(&self) -> u32 {
        self.data.header().value_count
    }

    /// Returns `None` for a key that is not in the table. Tombstones are resolved
    /// without touching the data storage.
    pub fn find_record(&mut self, key: &[u8]) -> Result<Option<Record>> {
        match self.index.find_index_for_key(key)? {
            Some(entry) => Ok(Some(Self::resolve(&mut self.data, &entry)?)),
            None => Ok(None),
        }
    }

    /// Walks all records in key order. Returns `None` once the table is exhausted.
    pub fn read_next(&mut self) -> Result<Option<(Bytes, Record)>> {
        loop {
            let scan = self.scan.get_or_insert_with(|| Scan {
                next_block: 1,
                entries: Vec::new().into_iter(),
            });

            if let Some(entry) = scan.entries.next() {
                let record = Self::resolve(&mut self.data, &entry)?;
                return Ok(Some((entry.key, record)));
            }

            if scan.next_block >= self.index.block_count() {
                return Ok(None);
            }

            scan.entries = self.index.read_block_entries(scan.next_block)?.into_iter();
            scan.next_block += 1;
        }
    }

    /// Restarts `read_next` from the first key.
    pub fn rewind(&mut self) {
        self.scan = None;
    }

    fn resolve(data: &mut SsTableDataReader, entry: &IndexEntry) -> Result<Record> {
        if entry.is_deleted() {
            return Ok(Record::Deleted);
        }

        Ok(Record::Value(data.read_value_at(entry.position)?))
    }
}
