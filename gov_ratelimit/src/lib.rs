pub mod arenas;
pub mod config;
pub mod error;
pub mod health;
pub mod limiter;
pub mod time;

pub use arenas::RateLimitTable;
pub use config::DEFAULT_KEY_SUFFIX;
pub use config::RateLimitConfig;
pub use config::Window;
pub use config::counter_key;
pub use error::RateLimitError;
pub use error::Result;
pub use health::StoreHealth;
pub use limiter::RateLimiter;
pub use time::Clock;
pub use time::ManualClock;
pub use time::SystemClock;
