//! Memory layer and backend implementations.

pub mod in_memory;
pub mod memory;
pub mod metrics;
pub mod redis;

pub use self::in_memory::InMemoryBackend;
pub use self::memory::MemoryLayer;
pub use self::metrics::MeteredBackend;
pub use self::redis::RedisBackend;
