pub mod clock;

pub use clock::{elapsed_ms, Clock, ManualClock, SystemClock};
