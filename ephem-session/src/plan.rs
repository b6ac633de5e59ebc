use std::collections::BTreeMap;

use ephem_core::{ExperimentalGroup, TrainingPhase, TrialType, limits_repeats};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::error::PlanError;

/// Longest permitted run of one trial type.
pub const MAX_REPEATS: usize = 3;

const SHUFFLE_ATTEMPTS: usize = 1_000;

/// Ordered, fully materialized trial types for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialPlan {
    pub phase: TrainingPhase,
    pub group: ExperimentalGroup,
    pub subsession_len: usize,
    trials: Vec<TrialType>,
}

impl TrialPlan {
    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// Trial type of the 1-based `trial` number.
    pub fn get(&self, trial: usize) -> Option<TrialType> {
        trial.checked_sub(1).and_then(|i| self.trials.get(i)).copied()
    }

    pub fn trials(&self) -> &[TrialType] {
        &self.trials
    }

    pub fn blocks(&self) -> impl Iterator<Item = &[TrialType]> {
        self.trials.chunks(self.subsession_len.max(1))
    }
}

/// Multiset of trial types making up one sub-session block.
pub fn block_composition(phase: TrainingPhase, group: ExperimentalGroup) -> Vec<(TrialType, usize)> {
    match (phase, group) {
        (TrainingPhase::PreTraining, _) => TrialType::FORCED.iter().map(|t| (*t, 15)).collect(),
        (TrainingPhase::Training, ExperimentalGroup::Choice) => {
            TrialType::CHOICE.iter().map(|t| (*t, 20)).collect()
        }
        (TrainingPhase::Training, ExperimentalGroup::Forced) => TrialType::CHOICE
            .iter()
            .map(|t| (*t, 6))
            .chain(TrialType::FORCED.iter().map(|t| (*t, 7)))
            .collect(),
    }
}

/// Length of the longest run of identical consecutive trial types.
pub fn longest_run(trials: &[TrialType]) -> usize {
    let mut longest = 0;
    let mut run = 0;
    let mut prev = None;
    for t in trials {
        run = if prev == Some(t) { run + 1 } else { 1 };
        longest = longest.max(run);
        prev = Some(t);
    }
    longest
}

/// Builds constrained-random trial orders.
///
/// Each block is shuffled until it contains no run longer than
/// [`MAX_REPEATS`] (including across the boundary with the previous block).
/// After a bounded number of failed shuffles the block is dealt out
/// round-robin instead, which always terminates.
pub struct TrialOrderGenerator<R: Rng> {
    rng: R,
    max_attempts: usize,
}

impl<R: Rng> TrialOrderGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            max_attempts: SHUFFLE_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn generate(
        &mut self,
        phase: TrainingPhase,
        group: ExperimentalGroup,
        subsession_len: usize,
    ) -> Result<TrialPlan, PlanError> {
        let composition = block_composition(phase, group);
        let block_len: usize = composition.iter().map(|(_, n)| n).sum();
        let expected = phase.trials_per_session();
        if subsession_len == 0 || block_len != subsession_len || expected % subsession_len != 0 {
            return Err(PlanError::LengthMismatch {
                phase,
                expected,
                actual: block_len * phase.subsession_count(),
            });
        }

        let limit = limits_repeats(phase, group);
        let mut trials = Vec::with_capacity(expected);
        for block in 0..expected / subsession_len {
            let next = self.build_block(block, &composition, &trials, limit)?;
            trials.extend(next);
        }

        let plan = TrialPlan {
            phase,
            group,
            subsession_len,
            trials,
        };
        verify(&plan, &composition)?;
        tracing::debug!(
            phase = phase.name(),
            group = group.name(),
            trials = plan.len(),
            "trial plan generated"
        );
        Ok(plan)
    }

    fn build_block(
        &mut self,
        block: usize,
        composition: &[(TrialType, usize)],
        previous: &[TrialType],
        limit: bool,
    ) -> Result<Vec<TrialType>, PlanError> {
        let mut pool: Vec<TrialType> = composition
            .iter()
            .flat_map(|(t, n)| std::iter::repeat_n(*t, *n))
            .collect();

        if !limit {
            pool.shuffle(&mut self.rng);
            return Ok(pool);
        }
        if !satisfiable(composition) {
            return Err(PlanError::Unsatisfiable {
                block,
                limit: MAX_REPEATS + 1,
            });
        }

        let tail = &previous[previous.len().saturating_sub(MAX_REPEATS)..];
        for _ in 0..self.max_attempts {
            pool.shuffle(&mut self.rng);
            if fits_after(tail, &pool) {
                return Ok(pool);
            }
        }

        tracing::warn!(
            block,
            attempts = self.max_attempts,
            "shuffle kept producing long runs, interleaving block"
        );
        let dealt = self.interleave(composition, tail.last().copied());
        if fits_after(tail, &dealt) {
            Ok(dealt)
        } else {
            Err(PlanError::Unsatisfiable {
                block,
                limit: MAX_REPEATS + 1,
            })
        }
    }

    /// Deals one of every remaining type per round, in random order, never
    /// starting a round with the type that ended the previous one.
    fn interleave(&mut self, composition: &[(TrialType, usize)], mut last: Option<TrialType>) -> Vec<TrialType> {
        let mut remaining: Vec<(TrialType, usize)> = composition.to_vec();
        let mut out = Vec::with_capacity(remaining.iter().map(|(_, n)| n).sum());
        loop {
            let mut round: Vec<TrialType> = remaining
                .iter()
                .filter(|(_, n)| *n > 0)
                .map(|(t, _)| *t)
                .collect();
            if round.is_empty() {
                break;
            }
            round.shuffle(&mut self.rng);
            if round.len() > 1 && Some(round[0]) == last {
                let j = self.rng.random_range(1..round.len());
                round.swap(0, j);
            }
            for t in &round {
                if let Some(entry) = remaining.iter_mut().find(|(r, _)| r == t) {
                    entry.1 -= 1;
                }
            }
            last = round.last().copied();
            out.extend(round);
        }
        out
    }
}

fn fits_after(tail: &[TrialType], block: &[TrialType]) -> bool {
    let window: Vec<TrialType> = tail.iter().chain(block.iter()).copied().collect();
    longest_run(&window) <= MAX_REPEATS
}

/// A multiset can avoid long runs only if its most common type can be
/// separated by the rest.
fn satisfiable(composition: &[(TrialType, usize)]) -> bool {
    let total: usize = composition.iter().map(|(_, n)| n).sum();
    let most = composition.iter().map(|(_, n)| *n).max().unwrap_or(0);
    most <= MAX_REPEATS * (total - most + 1)
}

fn verify(plan: &TrialPlan, composition: &[(TrialType, usize)]) -> Result<(), PlanError> {
    let expected = plan.phase.trials_per_session();
    if plan.len() != expected {
        return Err(PlanError::LengthMismatch {
            phase: plan.phase,
            expected,
            actual: plan.len(),
        });
    }
    for (block, trials) in plan.blocks().enumerate() {
        let mut counts: BTreeMap<TrialType, usize> = BTreeMap::new();
        for t in trials {
            *counts.entry(*t).or_default() += 1;
        }
        for (trial_type, want) in composition {
            let actual = counts.remove(trial_type).unwrap_or(0);
            if actual != *want {
                return Err(PlanError::CompositionMismatch {
                    block,
                    trial_type: *trial_type,
                    expected: *want,
                    actual,
                });
            }
        }
        if let Some((trial_type, actual)) = counts.into_iter().next() {
            return Err(PlanError::CompositionMismatch {
                block,
                trial_type,
                expected: 0,
                actual,
            });
        }
    }
    Ok(())
}
