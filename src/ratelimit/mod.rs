//! Rate limiting logic and state management.

mod backend;
mod cell;
mod clock;
mod interrupt;
mod limiter;
mod store;
mod window;

pub use backend::Admitter;
pub use cell::LimiterCell;
pub use clock::{Clock, MockClock, SystemClock};
pub use interrupt::Interrupt;
pub use limiter::{Admission, RateLimiter};
pub use store::WindowStore;
pub use window::{time_block, Window};
