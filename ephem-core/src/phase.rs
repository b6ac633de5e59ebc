use serde::{Deserialize, Serialize};

/// Training phase selected by the operator before a session.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrainingPhase {
    PreTraining,
    Training,
}

impl Default for TrainingPhase {
    fn default() -> Self {
        TrainingPhase::PreTraining
    }
}

impl TrainingPhase {
    /// Numeric phase as written to the data file and the file name.
    pub fn index(&self) -> u8 {
        match self {
            Self::PreTraining => 0,
            Self::Training => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PreTraining => "Pre-Training",
            Self::Training => "Training",
        }
    }

    pub fn trials_per_session(&self) -> usize {
        match self {
            Self::PreTraining => 60,
            Self::Training => 80,
        }
    }

    pub fn trials_per_subsession(&self) -> usize {
        match self {
            Self::PreTraining => 60,
            Self::Training => 40,
        }
    }

    pub fn subsession_count(&self) -> usize {
        self.trials_per_session() / self.trials_per_subsession()
    }

    /// Trial number (1-based) whose ITI is replaced by the long pause.
    pub fn pause_before_trial(&self) -> Option<usize> {
        match self {
            Self::PreTraining => None,
            Self::Training => Some(self.trials_per_subsession() + 1),
        }
    }

    /// Whether key pecks are scored as optimal/suboptimal choices.
    pub fn scores_choices(&self) -> bool {
        matches!(self, Self::Training)
    }
}

/// Between-subject condition of the Training phase.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExperimentalGroup {
    Choice,
    Forced,
}

impl ExperimentalGroup {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Choice => "Choice",
            Self::Forced => "Forced",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "Choice" => Some(Self::Choice),
            "Forced" => Some(Self::Forced),
            _ => None,
        }
    }
}

/// Choice-group training sessions are structurally identical every trial,
/// so only the other combinations limit runs of the same trial type.
pub fn limits_repeats(phase: TrainingPhase, group: ExperimentalGroup) -> bool {
    match phase {
        TrainingPhase::PreTraining => true,
        TrainingPhase::Training => group == ExperimentalGroup::Forced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_has_two_subsessions_and_one_pause() {
        let phase = TrainingPhase::Training;
        assert_eq!(phase.subsession_count(), 2);
        assert_eq!(phase.pause_before_trial(), Some(41));
        assert_eq!(TrainingPhase::PreTraining.subsession_count(), 1);
        assert_eq!(TrainingPhase::PreTraining.pause_before_trial(), None);
    }

    #[test]
    fn choice_training_is_exempt_from_repeat_limit() {
        assert!(limits_repeats(TrainingPhase::PreTraining, ExperimentalGroup::Choice));
        assert!(limits_repeats(TrainingPhase::Training, ExperimentalGroup::Forced));
        assert!(!limits_repeats(TrainingPhase::Training, ExperimentalGroup::Choice));
    }

    #[test]
    fn group_names_round_trip() {
        assert_eq!(ExperimentalGroup::from_name(" Forced "), Some(ExperimentalGroup::Forced));
        assert_eq!(ExperimentalGroup::from_name("choice"), None);
    }
}
