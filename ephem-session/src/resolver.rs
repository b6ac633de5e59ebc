use ephem_core::{KeyColor, KeyRole, Side, TrialType};

use crate::config::ColorScheme;

/// Role of each response key for one presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyAssignment {
    pub left: KeyRole,
    pub right: KeyRole,
}

impl KeyAssignment {
    pub fn role(&self, side: Side) -> KeyRole {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub fn active_sides(&self) -> Vec<Side> {
        Side::BOTH
            .into_iter()
            .filter(|s| self.role(*s).is_active())
            .collect()
    }

    /// Active keys paired with the color they are drawn in.
    pub fn colored<'a>(&self, colors: &'a ColorScheme) -> Vec<(Side, &'a KeyColor)> {
        Side::BOTH
            .into_iter()
            .filter_map(|s| colors.color_for(self.role(s)).map(|c| (s, c)))
            .collect()
    }

    fn set(&mut self, side: Side, role: KeyRole) {
        match side {
            Side::Left => self.left = role,
            Side::Right => self.right = role,
        }
    }
}

/// Which keys a trial type presents and what each one means.
///
/// Once the optimal reward of a trial has been claimed, only the suboptimal
/// counterpart of that trial's optimal side stays on screen.
pub fn resolve(trial_type: TrialType, optimal_claimed: bool) -> KeyAssignment {
    let mut keys = KeyAssignment::default();
    let side = trial_type.side();
    match trial_type.optimal_side() {
        Some(optimal) if optimal_claimed => {
            keys.set(optimal.opposite(), KeyRole::Suboptimal);
        }
        Some(optimal) => {
            keys.set(optimal, KeyRole::Optimal);
            if trial_type.is_choice() {
                keys.set(optimal.opposite(), KeyRole::Suboptimal);
            }
        }
        None => keys.set(side, KeyRole::Suboptimal),
    }
    keys
}
