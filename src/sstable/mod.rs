pub mod data;
pub mod format;
pub mod index;
pub mod table;

use crate::blockstore::{shared, BlockStorage, FileBlockStorage, MemBlockStorage, SharedStorage};
use crate::{Error, Result};
use data::{SsTableDataReader, SsTableDataWriter};
use index::{SsTableIndexReader, SsTableIndexWriter};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub use table::{Record, SsTableReader, SsTableWriter};

const INDEX_FILE_NAME: &str = "index";
const DATA_FILE_NAME: &str = "data";

/// Everything the table needs from the configuration layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsTableOpenOptions {
    pub prefix: String,
    pub max_key_size: usize,
    pub max_value_size: usize,
    pub index_block_size: usize,
    pub data_block_size: usize,
    /// Keep both storages in memory, nothing touches the disk.
    pub in_memory: bool,
    /// Open files of an already written table instead of creating new ones.
    pub load_existing: bool,
    pub timestamp: i64,
}

impl Default for SsTableOpenOptions {
    fn default() -> Self {
        Self {
            prefix: "level_0_".to_string(),
            max_key_size: 4 * 1024,
            max_value_size: 16 * 1024,
            index_block_size: 4 * 1024,
            data_block_size: 16 * 1024,
            in_memory: false,
            load_existing: false,
            timestamp: 0,
        }
    }
}

impl SsTableOpenOptions {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_max_key_size(mut self, size: usize) -> Self {
        self.max_key_size = size;
        self
    }

    pub fn with_max_value_size(mut self, size: usize) -> Self {
        self.max_value_size = size;
        self
    }

    pub fn with_index_block_size(mut self, size: usize) -> Self {
        self.index_block_size = size;
        self
    }

    pub fn with_data_block_size(mut self, size: usize) -> Self {
        self.data_block_size = size;
        self
    }

    pub fn with_in_memory(mut self, in_memory: bool) -> Self {
        self.in_memory = in_memory;
        self
    }

    pub fn with_load_existing(mut self, load_existing: bool) -> Self {
        self.load_existing = load_existing;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A table is a pair of block storages: the index and the data. Storages are opened
/// lazily by the first `new_reader` or `new_writer` call and kept until `close`.
///
/// A table is written by exactly one writer and only read after the writer committed.
pub struct SsTable {
    index_file_path: PathBuf,
    data_file_path: PathBuf,
    options: SsTableOpenOptions,
    index_storage: Option<SharedStorage>,
    data_storage: Option<SharedStorage>,
}

impl SsTable {
    pub fn new(dir: impl AsRef<Path>, options: SsTableOpenOptions) -> Self {
        let dir = dir.as_ref();
        let file_path = |name: &str| {
            dir.join(format!("{}{}_{}", options.prefix, options.timestamp, name))
        };

        Self {
            index_file_path: file_path(INDEX_FILE_NAME),
            data_file_path: file_path(DATA_FILE_NAME),
            options,
            index_storage: None,
            data_storage: None,
        }
    }

    /// Same as `new` for files written before.
    pub fn load_from(dir: impl AsRef<Path>, options: SsTableOpenOptions) -> Self {
        Self::new(dir, options.with_load_existing(true))
    }

    pub fn index_file_path(&self) -> &Path {
        &self.index_file_path
    }

    pub fn data_file_path(&self) -> &Path {
        &self.data_file_path
    }

    pub fn options(&self) -> &SsTableOpenOptions {
        &self.options
    }

    pub fn created_timestamp(&self) -> i64 {
        self.options.timestamp
    }

    /// Opens both storages and checks headers of a committed table. Files are only
    /// opened here, never created.
    pub fn new_reader(&mut self) -> Result<SsTableReader> {
        let data_storage = self.data_storage(false)?;
        let index_storage = self.index_storage(false)?;

        let mut reader = SsTableReader::new(
            SsTableIndexReader::new(index_storage),
            SsTableDataReader::new(data_storage),
        );
        reader.read_headers()?;

        Ok(reader)
    }

    /// Opens both storages and writes placeholder headers.
    pub fn new_writer(&mut self) -> Result<SsTableWriter> {
        let create = !self.options.load_existing;
        let data_storage = self.data_storage(create)?;
        let index_storage = self.index_storage(create)?;

        let mut data = SsTableDataWriter::new(data_storage, self.options.max_value_size);
        let mut index = SsTableIndexWriter::new(index_storage, self.options.max_key_size);

        data.write_header()?;
        index.write_header()?;

        Ok(SsTableWriter::new(data, index))
    }

    /// Releases both storages. A storage that failed to close is kept so the call can be
    /// retried, calling it on a closed table is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let index = close_storage(&mut self.index_storage).err();
        let data = close_storage(&mut self.data_storage).err();

        if index.is_some() || data.is_some() {
            return Err(Error::Close {
                index: index.map(Box::new),
                data: data.map(Box::new),
            });
        }

        info!(index = %self.index_file_path.display(), "closed sstable");

        Ok(())
    }

    /// Closes the table and deletes both files. Nothing is deleted if closing fails.
    pub fn permanently_remove(&mut self) -> Result<()> {
        self.close()?;

        if !self.options.in_memory {
            fs::remove_file(&self.data_file_path)?;
            fs::remove_file(&self.index_file_path)?;
        }

        info!(index = %self.index_file_path.display(), "removed sstable");

        Ok(())
    }

    fn index_storage(&mut self, create: bool) -> Result<SharedStorage> {
        if let Some(storage) = &self.index_storage {
            return Ok(storage.clone());
        }

        let storage =
            self.open_storage(self.options.index_block_size, &self.index_file_path, create)?;
        self.index_storage = Some(storage.clone());

        Ok(storage)
    }

    fn data_storage(&mut self, create: bool) -> Result<SharedStorage> {
        if let Some(storage) = &self.data_storage {
            return Ok(storage.clone());
        }

        let storage =
            self.open_storage(self.options.data_block_size, &self.data_file_path, create)?;
        self.data_storage = Some(storage.clone());

        Ok(storage)
    }

    /// `create` truncates the file, otherwise it has to exist.
    fn open_storage(&self, block_size: usize, path: &Path, create: bool) -> Result<SharedStorage> {
        if self.options.in_memory {
            return Ok(shared(MemBlockStorage::new(block_size)));
        }

        let storage = if create {
            FileBlockStorage::create(path, block_size)?
        } else {
            FileBlockStorage::open(path, block_size)?
        };
        info!(path = %path.display(), block_size, "opened sstable storage");

        Ok(shared(storage))
    }
}

fn close_storage(storage: &mut Option<SharedStorage>) -> Result<()> {
    if let Some(stor) = storage {
        stor.lock().close()?;
        *storage = None;
    }

    Ok(())
}
