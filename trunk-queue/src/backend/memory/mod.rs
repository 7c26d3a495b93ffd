pub mod storage;

pub use storage::MemoryJobStore;
