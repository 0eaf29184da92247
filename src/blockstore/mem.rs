use super::{check_index, BlockStorage, Cursor, Position};
use crate::{Error, Result};
use bytes::BytesMut;

/// Block storage in a single growing arena. Exists for tests, nothing is persisted.
#[derive(Debug)]
pub struct MemBlockStorage {
    arena: Vec<u8>,
    block_size: usize,
    num_blocks: u32,
    write_cursor: Cursor,
    read_cursor: Cursor,
    closed: bool,
}

impl MemBlockStorage {
    pub fn new(block_size: usize) -> Self {
        Self {
            arena: Vec::new(),
            block_size,
            num_blocks: 0,
            write_cursor: Cursor::default(),
            read_cursor: Cursor::default(),
            closed: false,
        }
    }

    fn block_range(&self, index: u32) -> std::ops::Range<usize> {
        let start = index as usize * self.block_size;
        start..start + self.block_size
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }

        Ok(())
    }
}

impl BlockStorage for MemBlockStorage {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    fn allocate(&mut self, nblocks: u32) -> Result<u32> {
        self.ensure_open()?;
        if nblocks <= self.num_blocks {
            return Ok(0);
        }

        let added = nblocks - self.num_blocks;
        self.arena.resize(nblocks as usize * self.block_size, 0);
        self.num_blocks = nblocks;

        Ok(added)
    }

    fn read_block(&self, index: u32, buf: &mut BytesMut) -> Result<usize> {
        self.ensure_open()?;
        check_index(index, self.num_blocks)?;

        buf.extend_from_slice(&self.arena[self.block_range(index)]);

        Ok(self.block_size)
    }

    fn write_block(&mut self, index: u32, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        check_index(index, self.num_blocks)?;

        let len = buf.len().min(self.block_size);
        let start = self.block_range(index).start;
        self.arena[start..start + len].copy_from_slice(&buf[..len]);

        Ok(len)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if data.is_empty() {
            return Ok(0);
        }

        let cur = self.write_cursor.fit(data.len(), self.block_size)?;
        self.allocate(cur.block + 1)?;

        let start = self.block_range(cur.block).start + cur.offset;
        self.arena[start..start + data.len()].copy_from_slice(data);
        self.write_cursor = cur.advance(data.len());

        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let cur = self.read_cursor.fit(buf.len(), self.block_size)?;
        if cur.block >= self.num_blocks {
            return Err(Error::EndOfData);
        }

        let start = self.block_range(cur.block).start + cur.offset;
        buf.copy_from_slice(&self.arena[start..start + buf.len()]);
        self.read_cursor = cur.advance(buf.len());

        Ok(buf.len())
    }

    fn write_position(&self) -> Position {
        self.write_cursor.position()
    }

    fn read_position(&self) -> Position {
        self.read_cursor.position()
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()
    }

    fn sync(&mut self) -> Result<()> {
        self.ensure_open()
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate() {
        let mut stor = MemBlockStorage::new(64);
        assert_eq!(stor.num_blocks(), 0);
        assert_eq!(stor.allocate(3).unwrap(), 3);
        assert_eq!(stor.num_blocks(), 3);
        assert_eq!(stor.allocate(2).unwrap(), 0, "allocation is idempotent");
        assert_eq!(stor.num_blocks(), 3);
    }

    #[test]
    fn test_block_io() {
        let mut stor = MemBlockStorage::new(8);
        let mut buf = BytesMut::new();

        assert!(matches!(
            stor.write_block(0, b"abc"),
            Err(Error::OutOfRange {
                index: 0,
                num_blocks: 0
            })
        ));
        assert!(stor.read_block(0, &mut buf).is_err());

        stor.allocate(2).unwrap();
        assert_eq!(stor.write_block(1, b"abc").unwrap(), 3);
        assert_eq!(
            stor.write_block(0, b"0123456789").unwrap(),
            8,
            "writes are cut to the block size"
        );

        assert_eq!(stor.read_block(1, &mut buf).unwrap(), 8);
        assert_eq!(&buf[..], b"abc\0\0\0\0\0");

        buf.clear();
        stor.read_block(0, &mut buf).unwrap();
        assert_eq!(&buf[..], b"01234567");
    }

    #[test]
    fn test_sequential_write() {
        let mut stor = MemBlockStorage::new(8);
        assert_eq!(stor.write(b"").unwrap(), 0);
        assert_eq!(stor.num_blocks(), 0);

        stor.write(b"abcde").unwrap();
        assert_eq!(stor.write_position(), Position::new(0, 5));
        assert_eq!(stor.num_blocks(), 1);

        stor.write(b"fgh").unwrap();
        assert_eq!(stor.write_position(), Position::new(0, 8));

        // Does not fit into the remaining space, moves to the next block.
        stor.write(b"i").unwrap();
        assert_eq!(stor.write_position(), Position::new(1, 1));
        assert_eq!(stor.num_blocks(), 2);

        assert!(matches!(
            stor.write(b"123456789"),
            Err(Error::SizeExceeded { .. })
        ));
        assert_eq!(stor.write_position(), Position::new(1, 1));
    }

    #[test]
    fn test_sequential_read() {
        let mut stor = MemBlockStorage::new(8);
        stor.write(b"abcdef").unwrap();
        stor.write(b"ghij").unwrap();

        let mut buf = [0u8; 6];
        stor.read(&mut buf).unwrap();
        assert_eq!(&buf, b"abcdef");

        // Only 2 bytes left in block 0, the read moves to block 1.
        let mut buf = [0u8; 4];
        stor.read(&mut buf).unwrap();
        assert_eq!(&buf, b"ghij");
        assert_eq!(stor.read_position(), Position::new(1, 4));

        let mut buf = [0u8; 5];
        assert!(matches!(stor.read(&mut buf), Err(Error::EndOfData)));
        assert_eq!(stor.read_position(), Position::new(1, 4));
    }

    #[test]
    fn test_close() {
        let mut stor = MemBlockStorage::new(8);
        stor.allocate(1).unwrap();
        assert!(stor.flush().is_ok());
        assert!(stor.close().is_ok());
        assert!(stor.close().is_ok());
        assert!(matches!(stor.flush(), Err(Error::Closed)));
        assert!(matches!(stor.write(b"a"), Err(Error::Closed)));
        assert!(matches!(
            stor.read_block(0, &mut BytesMut::new()),
            Err(Error::Closed)
        ));
    }
}
