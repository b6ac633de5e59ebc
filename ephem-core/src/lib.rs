pub mod phase;
pub mod stimulus;
pub mod trial;

pub use phase::{ExperimentalGroup, TrainingPhase, limits_repeats};
pub use stimulus::{
    CANVAS_SIZE, DisplaySurface, KEY_HALO, KeyColor, KeyLayout, KeyRegion, KeyRole, Side,
};
pub use trial::{EventKind, TrialType};
