pub mod file;
pub mod mem;

use crate::{Error, Result};
use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::Arc;

pub use file::FileBlockStorage;
pub use mem::MemBlockStorage;

pub const BASE_BLOCK_SIZE: usize = 4 * 1024; // 4KB.

/// Storage handle shared by a table and the writers and readers it hands out.
pub type SharedStorage = Arc<Mutex<Box<dyn BlockStorage>>>;

pub fn shared(storage: impl BlockStorage + 'static) -> SharedStorage {
    Arc::new(Mutex::new(Box::new(storage)))
}

/// Address of a record inside a block storage. On disk it is packed into a single u64,
/// block in the high 32 bits and offset in the low 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub block: i32,
    pub offset: i32,
}

impl Position {
    /// Means "no data". Tombstones point here.
    pub const UNINITIALIZED: Position = Position {
        block: -1,
        offset: -1,
    };

    pub fn new(block: u32, offset: usize) -> Self {
        Self {
            block: block as i32,
            offset: offset as i32,
        }
    }

    pub fn encode_u64(&self) -> u64 {
        ((self.block as u32 as u64) << 32) | (self.offset as u32 as u64)
    }

    pub fn decode_u64(x: u64) -> Self {
        Self {
            block: (x >> 32) as u32 as i32,
            offset: (x & 0xffff_ffff) as u32 as i32,
        }
    }

    pub fn is_uninitialized(&self) -> bool {
        *self == Self::UNINITIALIZED
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.block, self.offset)
    }
}

/// Where a sequential write actually landed given the writer positions around it.
/// A write that does not fit the current block is moved to the start of the next one.
pub fn landed_at(before: Position, after: Position) -> Position {
    if before.block == after.block {
        before
    } else {
        Position {
            block: after.block,
            offset: 0,
        }
    }
}

/// Aligned block device. Blocks are addressed 0..num_blocks() and all of them are
/// exactly block_size() bytes long.
///
/// There are two independent ways to address data: random access to whole blocks and
/// a sequential cursor for reads and writes. Sequential calls never split one request
/// between two blocks: if it does not fit into what is left of the current block the
/// cursor jumps to the start of the next one.
pub trait BlockStorage: Send {
    fn block_size(&self) -> usize;

    /// Never decreases, bounds valid block indices for both addressing modes.
    fn num_blocks(&self) -> u32;

    /// Grows the storage to at least `nblocks` blocks and returns how many blocks
    /// were added. It is the only way the storage grows.
    fn allocate(&mut self, nblocks: u32) -> Result<u32>;

    /// Appends the content of the block to `buf`. Returns the number of bytes read.
    fn read_block(&self, index: u32, buf: &mut BytesMut) -> Result<usize>;

    /// Writes up to a block of bytes from `buf` to the start of the block. Returns the
    /// number of bytes written which is the minimum of buffer length and block size.
    fn write_block(&mut self, index: u32, buf: &[u8]) -> Result<usize>;

    /// Sequential write at the write cursor. Allocates the block it lands in.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Sequential read at the read cursor, fills the whole `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write_position(&self) -> Position;

    fn read_position(&self) -> Position;

    fn flush(&mut self) -> Result<()>;

    fn sync(&mut self) -> Result<()>;

    /// Releases underlying resources. Second call is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Same as `write` but reports the position the data landed at to `callback`.
    fn write_with_callback(
        &mut self,
        data: &[u8],
        callback: &mut dyn FnMut(Result<Position, &Error>),
    ) -> Result<usize> {
        let before = self.write_position();
        match self.write(data) {
            Ok(n) => {
                callback(Ok(landed_at(before, self.write_position())));
                Ok(n)
            }
            Err(e) => {
                callback(Err(&e));
                Err(e)
            }
        }
    }
}

/// Sequential cursor shared by the storage implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Cursor {
    pub block: u32,
    pub offset: usize,
}

impl Cursor {
    pub fn at(block: u32, offset: usize) -> Self {
        Self { block, offset }
    }

    /// Returns the cursor the request of `len` bytes starts at. Moves to the next block
    /// if the request does not fit into the remaining space of the current one.
    pub fn fit(&self, len: usize, block_size: usize) -> Result<Cursor> {
        if len > block_size {
            return Err(Error::SizeExceeded {
                size: len,
                block_size,
            });
        }

        if block_size - self.offset < len {
            return Ok(Cursor::at(self.block + 1, 0));
        }

        Ok(*self)
    }

    pub fn advance(self, n: usize) -> Cursor {
        Cursor::at(self.block, self.offset + n)
    }

    pub fn position(&self) -> Position {
        Position::new(self.block, self.offset)
    }
}

pub(crate) fn check_index(index: u32, num_blocks: u32) -> Result<()> {
    if index >= num_blocks {
        return Err(Error::OutOfRange { index, num_blocks });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_encode() {
        let pos = Position::new(3, 17);
        assert_eq!(pos.encode_u64(), (3u64 << 32) | 17);
        assert_eq!(Position::decode_u64(pos.encode_u64()), pos);
    }

    #[test]
    fn test_uninitialized_position() {
        let encoded = Position::UNINITIALIZED.encode_u64();
        assert_eq!(encoded, u64::MAX);
        assert!(Position::decode_u64(encoded).is_uninitialized());
        assert!(!Position::new(0, 0).is_uninitialized());
    }

    #[test]
    fn test_landed_at() {
        let before = Position::new(1, 10);
        assert_eq!(landed_at(before, Position::new(1, 20)), before);
        assert_eq!(landed_at(before, Position::new(2, 8)), Position::new(2, 0));
    }

    #[test]
    fn test_cursor_fit() {
        let cur = Cursor::at(0, 60);
        assert_eq!(cur.fit(4, 64).unwrap(), cur);
        assert_eq!(cur.fit(5, 64).unwrap(), Cursor::at(1, 0));
        assert!(matches!(
            cur.fit(65, 64),
            Err(Error::SizeExceeded {
                size: 65,
                block_size: 64
            })
        ));
    }

    #[test]
    fn test_write_with_callback() {
        let mut stor = MemBlockStorage::new(16);
        let mut landed = Vec::new();

        stor.write_with_callback(&[1; 10], &mut |res| landed.push(res.ok()))
            .unwrap();
        stor.write_with_callback(&[2; 10], &mut |res| landed.push(res.ok()))
            .unwrap();
        assert!(stor
            .write_with_callback(&[3; 17], &mut |res| landed.push(res.ok()))
            .is_err());

        assert_eq!(
            landed,
            vec![Some(Position::new(0, 0)), Some(Position::new(1, 0)), None]
        );
    }
}
