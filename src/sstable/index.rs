use super::format::{
    decode_block_key_count, max_key_size_fit_in_block, IndexEntry, IndexFileHeader,
    BLOCK_KEY_COUNT_SIZE, INDEX_ENTRY_HEADER_SIZE, INDEX_FILE_MAGIC,
};
use crate::blockstore::{BlockStorage, Position, SharedStorage};
use crate::{Error, Result};
use ahash::AHashMap;
use bytes::{Bytes, BytesMut};
use std::cmp::Ordering;
use tracing::debug;

/// Packs sorted index entries into blocks of the index storage. Keys have to come in
/// strictly ascending order, the writer neither sorts nor deduplicates them.
pub struct SsTableIndexWriter {
    storage: SharedStorage,
    block_size: usize,
    max_key_size: usize,
    key_count: u32,
    current_block_index: u32,
    block_key_count: u32,
    entry_buf: BytesMut,
    block_buf: BytesMut,
    header: IndexFileHeader,
}

impl SsTableIndexWriter {
    pub fn new(storage: SharedStorage, max_key_size: usize) -> Self {
        let block_size = storage.lock().block_size();

        Self {
            storage,
            block_size,
            max_key_size: max_key_size.min(max_key_size_fit_in_block(block_size)),
            key_count: 0,
            current_block_index: 1, // Block 0 is reserved for the header.
            block_key_count: 0,
            entry_buf: BytesMut::new(),
            block_buf: BytesMut::with_capacity(block_size),
            header: IndexFileHeader::uninitialized(),
        }
    }

    pub fn max_key_size(&self) -> usize {
        self.max_key_size
    }

    pub fn key_count(&self) -> u32 {
        self.key_count
    }

    /// Writes the current header to block 0, allocating it if needed.
    pub fn write_header(&mut self) -> Result<()> {
        let mut storage = self.storage.lock();
        storage.allocate(1)?;

        self.entry_buf.clear();
        self.header.encode(&mut self.entry_buf);
        storage.write_block(0, &self.entry_buf)?;

        Ok(())
    }

    pub fn write_index(&mut self, key: &[u8], deleted: bool, position: Position) -> Result<()> {
        if key.len() > self.max_key_size {
            return Err(Error::KeyTooLarge {
                size: key.len(),
                max: self.max_key_size,
            });
        }

        let entry = IndexEntry::new(Bytes::copy_from_slice(key), deleted, position);
        self.entry_buf.clear();
        entry.encode(&mut self.entry_buf);

        if self.block_key_count > 0 && self.block_buf.len() + self.entry_buf.len() > self.block_size
        {
            self.flush_current_block()?;
        }

        if self.block_buf.is_empty() {
            // Entries count placeholder, patched on flush.
            self.block_buf.extend_from_slice(&[0; BLOCK_KEY_COUNT_SIZE]);
        }

        self.block_buf.extend_from_slice(&self.entry_buf);
        self.block_key_count += 1;
        self.key_count += 1;

        Ok(())
    }

    pub fn flush_current_block(&mut self) -> Result<()> {
        if self.block_key_count == 0 {
            return Ok(());
        }

        self.block_buf[..BLOCK_KEY_COUNT_SIZE].copy_from_slice(&self.block_key_count.to_be_bytes());

        let mut storage = self.storage.lock();
        storage.allocate(self.current_block_index + 1)?;
        storage.write_block(self.current_block_index, &self.block_buf)?;

        debug!(
            block = self.current_block_index,
            keys = self.block_key_count,
            bytes = self.block_buf.len(),
            "flushed index block"
        );

        self.block_key_count = 0;
        self.block_buf.clear();
        self.current_block_index += 1;

        Ok(())
    }

    /// Flushes pending entries, rewrites the header with final values and syncs.
    pub fn commit(&mut self) -> Result<()> {
        self.flush_current_block()?;

        self.header = IndexFileHeader {
            magic: INDEX_FILE_MAGIC,
            block_size: self.block_size as u32,
            block_count: self.current_block_index,
            key_count: self.key_count,
            max_key_size: self.max_key_size as u32,
            flags: 0,
        };
        self.write_header()?;

        let mut storage = self.storage.lock();
        storage.flush()?;
        storage.sync()
    }
}

/// Finds keys in a committed index with a binary search over the first keys of the
/// blocks and a linear scan inside the block found. First keys are cached per reader.
pub struct SsTableIndexReader {
    storage: SharedStorage,
    header: IndexFileHeader,
    buf: BytesMut,
    first_entry_cache: AHashMap<u32, IndexEntry>,
}

impl SsTableIndexReader {
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            storage,
            header: IndexFileHeader::uninitialized(),
            buf: BytesMut::new(),
            first_entry_cache: AHashMap::new(),
        }
    }

    pub fn read_header(&mut self) -> Result<()> {
        self.load_block(0)?;
        let header = IndexFileHeader::decode(&mut &self.buf[..])?;
        header.validate()?;
        self.header = header;

        Ok(())
    }

    pub fn header(&self) -> &IndexFileHeader {
        &self.header
    }

    /// Every block of the index file including the header.
    pub fn block_count(&self) -> u32 {
        self.header.block_count
    }

    pub fn find_index_for_key(&mut self, key: &[u8]) -> Result<Option<IndexEntry>> {
        self.header.validate()?;

        // Entry blocks are [1, block_count).
        let mut low = 1;
        let mut high = self.header.block_count;
        if low >= high {
            return Ok(None);
        }

        // Keep the first key of `low` not greater than the key, and every block from
        // `high` on starting with a greater key.
        while high - low > 1 {
            let mid = low + (high - low) / 2;
            let first = self.first_entry_of_block(mid)?;

            match key.cmp(&first.key[..]) {
                Ordering::Equal => return Ok(Some(first)),
                Ordering::Less => high = mid,
                Ordering::Greater => low = mid,
            }
        }

        let first = self.first_entry_of_block(low)?;
        match first.key[..].cmp(key) {
            Ordering::Greater => Ok(None),
            Ordering::Equal => Ok(Some(first)),
            Ordering::Less => self.search_for_key_in_block(key, low),
        }
    }

    /// Decodes all entries of an index block in the order they are stored.
    pub fn read_block_entries(&mut self, block: u32) -> Result<Vec<IndexEntry>> {
        self.load_block(block)?;
        let mut raw = &self.buf[..];

        let key_count = decode_block_key_count(&mut raw)?;
        if key_count as usize > raw.len() / INDEX_ENTRY_HEADER_SIZE {
            return Err(Error::decode(format!(
                "index block {block} claims {key_count} keys in {} bytes",
                raw.len()
            )));
        }

        let mut entries = Vec::with_capacity(key_count as usize);
        for _ in 0..key_count {
            entries.push(IndexEntry::decode(&mut raw)?);
        }

        Ok(entries)
    }

    fn first_entry_of_block(&mut self, block: u32) -> Result<IndexEntry> {
        if let Some(entry) = self.first_entry_cache.get(&block) {
            return Ok(entry.clone());
        }

        let entry = self.read_first_entry_of_block(block)?;
        self.first_entry_cache.insert(block, entry.clone());

        Ok(entry)
    }

    fn read_first_entry_of_block(&mut self, block: u32) -> Result<IndexEntry> {
        self.load_block(block)?;
        let mut raw = &self.buf[..];

        if decode_block_key_count(&mut raw)? < 1 {
            return Err(Error::decode(format!("index block {block} is empty")));
        }

        IndexEntry::decode(&mut raw)
    }

    fn search_for_key_in_block(&mut self, key: &[u8], block: u32) -> Result<Option<IndexEntry>> {
        self.load_block(block)?;
        let mut raw = &self.buf[..];

        let key_count = decode_block_key_count(&mut raw)?;
        for _ in 0..key_count {
            let entry = match IndexEntry::decode(&mut raw) {
                Ok(entry) => entry,
                Err(Error::EndOfData) => return Ok(None),
                Err(e) => return Err(e),
            };

            match entry.key[..].cmp(key) {
                Ordering::Equal => return Ok(Some(entry)),
                Ordering::Greater => return Ok(None),
                Ordering::Less => continue,
            }
        }

        Ok(None)
    }

    fn load_block(&mut self, block: u32) -> Result<()> {
        self.buf.clear();
        self.storage.lock().read_block(block, &mut self.buf)?;

        Ok(())
    }

    #[cfg(test)]
    fn cached_blocks(&self) -> usize {
        self.first_entry_cache.len()
    }
}
