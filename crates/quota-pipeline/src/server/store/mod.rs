//! Store implementations the binary can run the pipeline against.

mod memory;

pub use memory::{BucketType, MemoryStore};
