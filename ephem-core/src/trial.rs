use serde::{Deserialize, Serialize};

use crate::stimulus::Side;

/// Closed vocabulary of trial types.
///
/// Non-choice types present a single key on the named side. Choice types
/// present the named optimal key together with its suboptimal counterpart
/// on the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrialType {
    LeftOptimal,
    RightOptimal,
    LeftSuboptimal,
    RightSuboptimal,
    LeftOptimalChoice,
    RightOptimalChoice,
}

impl TrialType {
    pub const FORCED: [TrialType; 4] = [
        TrialType::LeftOptimal,
        TrialType::RightOptimal,
        TrialType::LeftSuboptimal,
        TrialType::RightSuboptimal,
    ];

    pub const CHOICE: [TrialType; 2] = [TrialType::LeftOptimalChoice, TrialType::RightOptimalChoice];

    pub fn label(&self) -> &'static str {
        match self {
            TrialType::LeftOptimal => "LO_trial",
            TrialType::RightOptimal => "RO_trial",
            TrialType::LeftSuboptimal => "LS_trial",
            TrialType::RightSuboptimal => "RS_trial",
            TrialType::LeftOptimalChoice => "LO_choice_trial",
            TrialType::RightOptimalChoice => "RO_choice_trial",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [Self::FORCED.as_slice(), Self::CHOICE.as_slice()]
            .concat()
            .into_iter()
            .find(|t| t.label() == label)
    }

    pub fn is_choice(&self) -> bool {
        matches!(self, TrialType::LeftOptimalChoice | TrialType::RightOptimalChoice)
    }

    /// Side named by the label.
    pub fn side(&self) -> Side {
        match self {
            TrialType::LeftOptimal | TrialType::LeftSuboptimal | TrialType::LeftOptimalChoice => {
                Side::Left
            }
            TrialType::RightOptimal | TrialType::RightSuboptimal | TrialType::RightOptimalChoice => {
                Side::Right
            }
        }
    }

    /// Side of the optimal key, if this trial has one.
    pub fn optimal_side(&self) -> Option<Side> {
        match self {
            TrialType::LeftSuboptimal | TrialType::RightSuboptimal => None,
            other => Some(other.side()),
        }
    }
}

/// Kind of every row in the session data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    SettlingPeck,
    ItiPeck,
    BetweenSessionItiPeck,
    BackgroundPeck,
    KeyPeck(Side),
    OptimalPeck,
    SuboptimalPeck,
    ReinforcerProvided,
    HopperUpPeck,
    SessionEnds,
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::SettlingPeck => "settling_peck",
            EventKind::ItiPeck => "ITI_peck",
            EventKind::BetweenSessionItiPeck => "between-session_ITI_peck",
            EventKind::BackgroundPeck => "background_peck",
            EventKind::KeyPeck(Side::Left) => "left_choice_key_peck",
            EventKind::KeyPeck(Side::Right) => "right_choice_key_peck",
            EventKind::OptimalPeck => "optimal_peck",
            EventKind::SuboptimalPeck => "suboptimal_peck",
            EventKind::ReinforcerProvided => "reinforcer_provided",
            EventKind::HopperUpPeck => "hopper_up_peck",
            EventKind::SessionEnds => "SessionEnds",
        }
    }

    /// Whether the event was produced by a click rather than by the session.
    pub fn is_peck(&self) -> bool {
        !matches!(self, EventKind::ReinforcerProvided | EventKind::SessionEnds)
    }
}
