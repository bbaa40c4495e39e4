//! Rate limiting logic and state management.

mod clock;
mod key;
mod limiter;
mod log;
mod policy;
mod store;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::LimitKey;
pub use limiter::{Decision, RateLimiter, Status, DEFAULT_DENIAL_MESSAGE, REMAINING_UNKNOWN};
pub use log::RequestLog;
pub use policy::{Policy, PolicyRule, PolicySet};
pub use store::{MemoryStore, RequestStore};
