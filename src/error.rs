use std::io;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("key too large to be stored: {size} bytes, max {max}")]
    KeyTooLarge { size: usize, max: usize },

    #[error("value too large to be stored: {size} bytes, max {max}")]
    ValueTooLarge { size: usize, max: usize },

    /// Sequential request that can not fit into a single block.
    #[error("size exceeded: {size} bytes do not fit into a block of {block_size}")]
    SizeExceeded { size: usize, block_size: usize },

    /// Block is not allocated yet, caller has to allocate it first.
    #[error("block {index} is out of range, storage has {num_blocks} blocks")]
    OutOfRange { index: u32, num_blocks: u32 },

    #[error("end of data")]
    EndOfData,

    #[error("decode failure: {0}")]
    Decode(String),

    #[error("storage is closed")]
    Closed,

    #[error("error closing storages: index: {index:?}, data: {data:?}")]
    Close {
        index: Option<Box<Error>>,
        data: Option<Box<Error>>,
    },

    #[error("{0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }
}
