//! Storage backend abstraction

mod filesystem;
mod traits;

pub use filesystem::FilesystemBackend;
pub use traits::{ByteStream, ObjectEntry, ObjectReader, PutOutcome, StorageBackend, StorageError};
