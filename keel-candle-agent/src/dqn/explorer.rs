//! Exploration strategy of DQN.
use crate::util::argmax_first;
use keel_core::{
    error::KeelError,
    schedule::{EpsilonSchedule, EpsilonScheduleConfig},
};
use rand::Rng;

/// Epsilon-greedy explorer for DQN.
///
/// Epsilon follows an [`EpsilonSchedule`] advanced once per training step.
#[derive(Debug, Clone, PartialEq)]
pub struct EpsilonGreedy {
    schedule: EpsilonSchedule,
}

impl EpsilonGreedy {
    /// Constructs epsilon-greedy explorer.
    pub fn new(config: &EpsilonScheduleConfig) -> Result<Self, KeelError> {
        Ok(Self {
            schedule: EpsilonSchedule::new(config)?,
        })
    }

    /// Current epsilon.
    pub fn eps(&self) -> f32 {
        self.schedule.value()
    }

    /// Decays epsilon and returns the new value.
    pub fn step(&mut self) -> f32 {
        self.schedule.step()
    }

    /// Restores the initial epsilon.
    pub fn reset(&mut self) {
        self.schedule.reset();
    }

    /// Overrides epsilon, for example when restoring a checkpoint.
    pub fn set_eps(&mut self, eps: f32) {
        self.schedule.set_value(eps);
    }

    /// Returns `true` with probability epsilon.
    pub fn explore(&self, rng: &mut impl Rng) -> bool {
        rng.gen::<f32>() < self.schedule.value()
    }

    /// Takes an action based on action values.
    ///
    /// `q` is only evaluated when the greedy branch is taken.
    pub fn action<R, F>(&self, n_actions: usize, rng: &mut R, q: F) -> anyhow::Result<usize>
    where
        R: Rng,
        F: FnOnce() -> anyhow::Result<Vec<f32>>,
    {
        if self.explore(rng) {
            Ok(rng.gen_range(0..n_actions))
        } else {
            Ok(argmax_first(&q()?))
        }
    }
}
