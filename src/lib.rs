pub mod blockstore;
pub mod error;
pub mod sstable;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
