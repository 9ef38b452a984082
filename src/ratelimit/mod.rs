//! Rate limiting logic and state management.

mod backend;
mod clock;
mod file_store;
mod limiter;
mod record;
mod settings;
mod store;

pub use backend::RateLimiterBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use file_store::FileStore;
pub use limiter::{AccessStrategy, Decision, RateLimiter};
pub use record::RateLimitRecord;
pub use settings::{LimitSettings, SettingsSource, SharedSettings};
pub use store::{CounterStore, MemoryStore};
