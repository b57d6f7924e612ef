//! Key-value storage for durable state

pub mod kv;

// Re-exports for convenience
pub use kv::{KeyValueStore, MemoryStore, RedisStore};
