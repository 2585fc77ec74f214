pub mod clock;
pub mod test_utils;
pub mod time;

pub use clock::{Clock, FixedClock, SystemClock};
