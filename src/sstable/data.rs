use super::format::{
    decode_data_record, encode_data_record, max_value_size_fit_in_block, DataFileHeader,
    DATA_FILE_MAGIC,
};
use crate::blockstore::{landed_at, BlockStorage, Position, SharedStorage};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use tracing::warn;

/// Appends length prefixed values to the data storage through its sequential writer.
pub struct SsTableDataWriter {
    storage: SharedStorage,
    block_size: usize,
    max_value_size: usize,
    record_count: u32,
    record_buf: BytesMut,
    header: DataFileHeader,
}

impl SsTableDataWriter {
    pub fn new(storage: SharedStorage, max_value_size: usize) -> Self {
        let block_size = storage.lock().block_size();

        let writer = Self {
            storage,
            block_size,
            max_value_size: max_value_size.min(max_value_size_fit_in_block(block_size)),
            record_count: 0,
            record_buf: BytesMut::new(),
            header: DataFileHeader::uninitialized(),
        };

        // Reserve block 0 for the header so that records start at block 1. A storage
        // that was written to before is left as is.
        {
            let mut storage = writer.storage.lock();
            if storage.write_position() == Position::new(0, 0) {
                let padding = vec![0; block_size];
                if let Err(e) = storage.write(&padding) {
                    warn!("could not pad data header block: {}", e);
                }
            }
        }

        writer
    }

    pub fn max_value_size(&self) -> usize {
        self.max_value_size
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Returns the position the record starts at.
    pub fn write_value(&mut self, value: &[u8]) -> Result<Position> {
        if value.len() > self.max_value_size {
            return Err(Error::ValueTooLarge {
                size: value.len(),
                max: self.max_value_size,
            });
        }

        self.record_buf.clear();
        encode_data_record(value, &mut self.record_buf);

        let mut storage = self.storage.lock();
        let before = storage.write_position();
        storage.write(&self.record_buf)?;
        let after = storage.write_position();
        self.record_count += 1;

        Ok(landed_at(before, after))
    }

    pub fn write_header(&mut self) -> Result<()> {
        self.record_buf.clear();
        self.header.encode(&mut self.record_buf);
        self.storage.lock().write_block(0, &self.record_buf)?;

        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        let block_count = self.storage.lock().num_blocks();
        self.header = DataFileHeader {
            magic: DATA_FILE_MAGIC,
            block_size: self.block_size as u32,
            block_count,
            value_count: self.record_count,
            flags: 0,
        };
        self.write_header()?;

        let mut storage = self.storage.lock();
        storage.flush()?;
        storage.sync()
    }
}

/// Random access to the records of the data storage.
pub struct SsTableDataReader {
    storage: SharedStorage,
    buf: BytesMut,
    header: DataFileHeader,
}

impl SsTableDataReader {
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            storage,
            buf: BytesMut::new(),
            header: DataFileHeader::uninitialized(),
        }
    }

    pub fn read_header(&mut self) -> Result<()> {
        self.buf.clear();
        self.storage.lock().read_block(0, &mut self.buf)?;

        let header = DataFileHeader::decode(&mut &self.buf[..])?;
        header.validate()?;
        self.header = header;

        Ok(())
    }

    pub fn header(&self) -> &DataFileHeader {
        &self.header
    }

    /// Decodes exactly one record starting at the given byte of the block.
    pub fn read_value_at(&mut self, position: Position) -> Result<Bytes> {
        let (block, offset) = match (
            u32::try_from(position.block),
            usize::try_from(position.offset),
        ) {
            (Ok(block), Ok(offset)) => (block, offset),
            _ => return Err(Error::decode(format!("invalid data position {position}"))),
        };

        self.buf.clear();
        let n = self.storage.lock().read_block(block, &mut self.buf)?;
        if offset >= n {
            return Err(Error::EndOfData);
        }

        decode_data_record(&mut &self.buf[offset..n])
    }
}
