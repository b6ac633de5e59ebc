pub mod queue;
pub mod timer;

pub use queue::{Scheduled, TimerQueue};
pub use timer::{HighPrecisionTimer, ManualTimer, Timer};
