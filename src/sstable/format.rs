use crate::blockstore::Position;
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes};
use strum::{Display, FromRepr};

/*
Index file layout. Block 0 is the header, every other block holds sorted entries.
-----------------------------------------------------------------------------------------------
|                 Block 0                 |                Block 1                |    ...    |
-----------------------------------------------------------------------------------------------
| Index header (24B) | zero padding       | Key count (4B) | Entry #1 | ... | Entry #N | pad |
-----------------------------------------------------------------------------------------------

Index header layout.
--------------------------------------------------------------------------------------------
| Magic (4B) | Block size (4B) | Block count (4B) | Key count (4B) | Max key (4B) | Flags (4B) |
--------------------------------------------------------------------------------------------

Index entry layout.
--------------------------------------------------------------
| Flags (4B) | Key len (4B) | Data position (8B) | Key bytes |
--------------------------------------------------------------

Data file layout. Block 0 is the header padded to a whole block, records follow and are
never split between blocks.
-------------------------------------------------------------------------------------------
| Magic (4B) | Block size (4B) | Block count (4B) | Value count (4B) | Flags (4B) | ... |
-------------------------------------------------------------------------------------------

Data record layout.
----------------------------------
| Value len (4B) | Value bytes |
----------------------------------

All integers are big endian.
*/

pub const HEADER_UNINITIALIZED: u32 = 0x7777_7777;
pub const INDEX_FILE_MAGIC: u32 = 0x5353_5449; // "SSTI".
pub const DATA_FILE_MAGIC: u32 = 0x5353_5444; // "SSTD".

const U32_SIZE: usize = std::mem::size_of::<u32>(); // 4.

pub const INDEX_HEADER_SIZE: usize = U32_SIZE * 6;
pub const DATA_HEADER_SIZE: usize = U32_SIZE * 5;

/// Leading entries count of every index block.
pub const BLOCK_KEY_COUNT_SIZE: usize = U32_SIZE;

/// Flags, key length and the encoded data position.
pub const INDEX_ENTRY_HEADER_SIZE: usize = U32_SIZE * 2 + std::mem::size_of::<u64>();

pub const RECORD_HEADER_SIZE: usize = U32_SIZE;

/// Largest key a single index entry in an otherwise empty block can hold.
pub fn max_key_size_fit_in_block(block_size: usize) -> usize {
    block_size.saturating_sub(BLOCK_KEY_COUNT_SIZE + INDEX_ENTRY_HEADER_SIZE)
}

/// Largest value a data record in an otherwise empty block can hold.
pub fn max_value_size_fit_in_block(block_size: usize) -> usize {
    block_size.saturating_sub(RECORD_HEADER_SIZE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(u32)]
pub enum EntryFlags {
    Present = 1,
    Deleted = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFileHeader {
    pub magic: u32,
    pub block_size: u32,
    /// Every block of the file including this header.
    pub block_count: u32,
    pub key_count: u32,
    pub max_key_size: u32,
    pub flags: u32,
}

impl IndexFileHeader {
    /// Placeholder written before any entry, rewritten on commit.
    pub fn uninitialized() -> Self {
        Self {
            magic: HEADER_UNINITIALIZED,
            block_size: 0,
            block_count: 0,
            key_count: 0,
            max_key_size: 0,
            flags: 0,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.magic);
        buf.put_u32(self.block_size);
        buf.put_u32(self.block_count);
        buf.put_u32(self.key_count);
        buf.put_u32(self.max_key_size);
        buf.put_u32(self.flags);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < INDEX_HEADER_SIZE {
            return Err(Error::decode("index header is truncated"));
        }

        Ok(Self {
            magic: buf.get_u32(),
            block_size: buf.get_u32(),
            block_count: buf.get_u32(),
            key_count: buf.get_u32(),
            max_key_size: buf.get_u32(),
            flags: buf.get_u32(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        match self.magic {
            INDEX_FILE_MAGIC => Ok(()),
            HEADER_UNINITIALIZED => Err(Error::decode("index file was never committed")),
            magic => Err(Error::decode(format!("invalid index file magic: {magic:#x}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFileHeader {
    pub magic: u32,
    pub block_size: u32,
    pub block_count: u32,
    pub value_count: u32,
    pub flags: u32,
}

impl DataFileHeader {
    pub fn uninitialized() -> Self {
        Self {
            magic: HEADER_UNINITIALIZED,
            block_size: 0,
            block_count: 0,
            value_count: 0,
            flags: 0,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.magic);
        buf.put_u32(self.block_size);
        buf.put_u32(self.block_count);
        buf.put_u32(self.value_count);
        buf.put_u32(self.flags);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < DATA_HEADER_SIZE {
            return Err(Error::decode("data header is truncated"));
        }

        Ok(Self {
            magic: buf.get_u32(),
            block_size: buf.get_u32(),
            block_count: buf.get_u32(),
            value_count: buf.get_u32(),
            flags: buf.get_u32(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        match self.magic {
            DATA_FILE_MAGIC => Ok(()),
            HEADER_UNINITIALIZED => Err(Error::decode("data file was never committed")),
            magic => Err(Error::decode(format!("invalid data file magic: {magic:#x}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub flags: EntryFlags,
    pub position: Position,
    pub key: Bytes,
}

impl IndexEntry {
    pub fn new(key: Bytes, deleted: bool, position: Position) -> Self {
        if deleted {
            Self {
                flags: EntryFlags::Deleted,
                position: Position::UNINITIALIZED,
                key,
            }
        } else {
            Self {
                flags: EntryFlags::Present,
                position,
                key,
            }
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.flags == EntryFlags::Deleted
    }

    pub fn encoded_len(&self) -> usize {
        INDEX_ENTRY_HEADER_SIZE + self.key.len()
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.flags as u32);
        buf.put_u32(self.key.len() as u32);
        buf.put_u64(self.position.encode_u64());
        buf.put_slice(&self.key);
    }

    /// Fails with `EndOfData` when there are not enough bytes left for an entry header.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < INDEX_ENTRY_HEADER_SIZE {
            return Err(Error::EndOfData);
        }

        let raw_flags = buf.get_u32();
        let flags = EntryFlags::from_repr(raw_flags)
            .ok_or_else(|| Error::decode(format!("invalid index entry flags: {raw_flags:#x}")))?;
        let key_len = buf.get_u32() as usize;
        let position = Position::decode_u64(buf.get_u64());

        if buf.remaining() < key_len {
            return Err(Error::decode(format!(
                "index entry key is truncated: {} of {} bytes",
                buf.remaining(),
                key_len
            )));
        }

        Ok(Self {
            flags,
            position,
            key: buf.copy_to_bytes(key_len),
        })
    }
}

/// Reads the leading entries count of an index block.
pub fn decode_block_key_count(buf: &mut impl Buf) -> Result<u32> {
    if buf.remaining() < BLOCK_KEY_COUNT_SIZE {
        return Err(Error::decode("index block is truncated"));
    }

    Ok(buf.get_u32())
}

pub fn data_record_len(value: &[u8]) -> usize {
    RECORD_HEADER_SIZE + value.len()
}

pub fn encode_data_record(value: &[u8], buf: &mut impl BufMut) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

pub fn decode_data_record(buf: &mut impl Buf) -> Result<Bytes> {
    if buf.remaining() < RECORD_HEADER_SIZE {
        return Err(Error::EndOfData);
    }

    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(Error::decode(format!(
            "data record is truncated: {} of {} bytes",
            buf.remaining(),
            len
        )));
    }

    Ok(buf.copy_to_bytes(len))
}
