mod staged;
mod store;

pub use staged::{Stage, StagedCache};
pub use store::{CacheStore, FileStore, MemoryStore};
