//! # gov_store
//!
//! Client for the shared coordination store used by every collector worker.
//!
//! The store keeps one sorted set of claim timestamps per rate-limit counter.
//! All read-modify-write steps on a counter run server side as one atomic
//! operation, so workers without shared memory can race on the same key.

pub mod error;
pub mod memory;
pub mod redis_store;
mod script;
pub mod store;

pub use error::Result;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::CoordinationStore;
pub use store::Slot;
pub use store::window_micros;
