use super::{check_index, BlockStorage, Cursor, Position};
use crate::{Error, Result};
use bytes::BytesMut;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Block storage over a regular file. Block `i` lives at byte offset `i * block_size`,
/// allocation grows the file with zeroes.
#[derive(Debug)]
pub struct FileBlockStorage {
    path: PathBuf,
    file: Option<File>,
    block_size: usize,
    num_blocks: u32,
    write_cursor: Cursor,
    read_cursor: Cursor,
}

impl FileBlockStorage {
    /// Creates a new file or truncates an existing one.
    pub fn create(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        debug!(path = %path.display(), block_size, "created block file");

        Ok(Self {
            path,
            file: Some(file),
            block_size,
            num_blocks: 0,
            write_cursor: Cursor::default(),
            read_cursor: Cursor::default(),
        })
    }

    /// Opens an existing file. The number of blocks is derived from the file length.
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let len = file.metadata()?.len();
        if len % block_size as u64 != 0 {
            return Err(Error::decode(format!(
                "file {} of {} bytes is not aligned to blocks of {}",
                path.display(),
                len,
                block_size
            )));
        }

        let num_blocks = u32::try_from(len / block_size as u64)
            .map_err(|_| Error::decode(format!("file {} is too large", path.display())))?;

        debug!(path = %path.display(), block_size, num_blocks, "opened block file");

        Ok(Self {
            path,
            file: Some(file),
            block_size,
            num_blocks,
            write_cursor: Cursor::at(num_blocks, 0),
            read_cursor: Cursor::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(Error::Closed)
    }

    fn offset_of(&self, cur: Cursor) -> u64 {
        cur.block as u64 * self.block_size as u64 + cur.offset as u64
    }
}

impl BlockStorage for FileBlockStorage {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    fn allocate(&mut self, nblocks: u32) -> Result<u32> {
        let file = self.file()?;
        if nblocks <= self.num_blocks {
            return Ok(0);
        }

        file.set_len(nblocks as u64 * self.block_size as u64)?;
        let added = nblocks - self.num_blocks;
        self.num_blocks = nblocks;

        Ok(added)
    }

    fn read_block(&self, index: u32, buf: &mut BytesMut) -> Result<usize> {
        let file = self.file()?;
        check_index(index, self.num_blocks)?;

        let start = buf.len();
        buf.resize(start + self.block_size, 0);
        file.read_exact_at(&mut buf[start..], self.offset_of(Cursor::at(index, 0)))?;

        Ok(self.block_size)
    }

    fn write_block(&mut self, index: u32, buf: &[u8]) -> Result<usize> {
        let file = self.file()?;
        check_index(index, self.num_blocks)?;

        let len = buf.len().min(self.block_size);
        file.write_all_at(&buf[..len], self.offset_of(Cursor::at(index, 0)))?;

        Ok(len)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.file()?;
        if data.is_empty() {
            return Ok(0);
        }

        let cur = self.write_cursor.fit(data.len(), self.block_size)?;
        self.allocate(cur.block + 1)?;

        self.file()?.write_all_at(data, self.offset_of(cur))?;
        self.write_cursor = cur.advance(data.len());

        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = self.file()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let cur = self.read_cursor.fit(buf.len(), self.block_size)?;
        if cur.block >= self.num_blocks {
            return Err(Error::EndOfData);
        }

        file.read_exact_at(buf, self.offset_of(cur))?;
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
        match self.file.as_mut() {
            Some(file) => Ok(file.flush()?),
            None => Err(Error::Closed),
        }
    }

    fn sync(&mut self) -> Result<()> {
        self.file()?.sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // The file is kept open until synced so a failed close can be retried.
        if let Some(file) = &self.file {
            file.sync_all()?;
            self.file = None;
            debug!(path = %self.path.display(), "closed block file");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bureau-blockstore-{}", uuid::Uuid::now_v7()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_create_allocate_write() {
        let dir = temp_dir();
        let path = dir.join("blocks");
        let mut stor = FileBlockStorage::create(&path, 16).unwrap();

        assert!(stor.write_block(0, b"abc").is_err());
        assert_eq!(stor.allocate(2).unwrap(), 2);
        assert_eq!(stor.allocate(1).unwrap(), 0);
        assert_eq!(fs::metadata(&path).unwrap().len(), 32);

        stor.write_block(1, b"hello").unwrap();
        let mut buf = BytesMut::new();
        stor.read_block(1, &mut buf).unwrap();
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(buf.len(), 16);
        assert!(buf[5..].iter().all(|b| *b == 0));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_sequential_io() {
        let dir = temp_dir();
        let path = dir.join("blocks");
        let mut stor = FileBlockStorage::create(&path, 16).unwrap();

        stor.write(&[1; 10]).unwrap();
        stor.write(&[2; 10]).unwrap();
        assert_eq!(stor.write_position(), Position::new(1, 10));
        assert_eq!(stor.num_blocks(), 2);
        stor.flush().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 32);

        let mut buf = [0u8; 10];
        stor.read(&mut buf).unwrap();
        assert_eq!(buf, [1; 10]);
        stor.read(&mut buf).unwrap();
        assert_eq!(buf, [2; 10]);
        assert!(matches!(stor.read(&mut buf), Err(Error::EndOfData)));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_reopen() {
        let dir = temp_dir();
        let path = dir.join("blocks");
        let mut stor = FileBlockStorage::create(&path, 16).unwrap();
        stor.allocate(3).unwrap();
        stor.write_block(2, b"persisted").unwrap();
        stor.close().unwrap();
        assert!(stor.close().is_ok());
        assert!(matches!(stor.sync(), Err(Error::Closed)));
        assert!(matches!(stor.flush(), Err(Error::Closed)));

        let stor = FileBlockStorage::open(&path, 16).unwrap();
        assert_eq!(stor.num_blocks(), 3);
        let mut buf = BytesMut::new();
        stor.read_block(2, &mut buf).unwrap();
        assert_eq!(&buf[..9], b"persisted");

        assert!(matches!(
            FileBlockStorage::open(&path, 7),
            Err(Error::Decode(_))
        ));
        assert!(matches!(
            FileBlockStorage::open(dir.join("missing"), 16),
            Err(Error::Io(_))
        ));

        fs::remove_dir_all(dir).unwrap();
    }
}
