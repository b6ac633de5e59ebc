use ephem_core::{KeyRole, Side, TrialType};

use crate::resolver::{KeyAssignment, resolve};

/// Per-trial state, recreated at the start of every inter-trial interval.
#[derive(Debug, Clone)]
pub struct TrialState<T> {
    /// 1-based trial number.
    pub index: usize,
    pub trial_type: TrialType,
    pub optimal_claimed: bool,
    pub keys: KeyAssignment,
    /// When the trial's ITI began; trial time is measured net of the ITI.
    pub start: T,
}

impl<T> TrialState<T> {
    pub fn new(index: usize, trial_type: TrialType, start: T) -> Self {
        Self {
            index,
            trial_type,
            optimal_claimed: false,
            keys: KeyAssignment::default(),
            start,
        }
    }

    /// Resolves the keys for the next presentation of this trial.
    pub fn present(&mut self) -> KeyAssignment {
        self.keys = resolve(self.trial_type, self.optimal_claimed);
        self.keys
    }

    pub fn role(&self, side: Side) -> KeyRole {
        self.keys.role(side)
    }

    /// Whether `side` is the optimal side named by the trial type.
    pub fn is_optimal_side(&self, side: Side) -> bool {
        self.trial_type.optimal_side() == Some(side)
    }
}

/// Monotonic session totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    /// Trials started so far (the current trial number).
    pub trials: usize,
    pub reinforcers: usize,
}
