//! Exploration schedule.
use crate::error::{ensure_config, KeelError};
use serde::{Deserialize, Serialize};

/// Configuration of [`EpsilonSchedule`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct EpsilonScheduleConfig {
    /// Initial value of epsilon.
    pub start: f32,

    /// Floor of epsilon.
    pub min: f32,

    /// Multiplicative decay applied per step.
    pub decay: f32,
}

impl Default for EpsilonScheduleConfig {
    fn default() -> Self {
        Self {
            start: 1.0,
            min: 0.01,
            decay: 0.995,
        }
    }
}

impl EpsilonScheduleConfig {
    /// Sets the initial value.
    pub fn start(mut self, v: f32) -> Self {
        self.start = v;
        self
    }

    /// Sets the floor.
    pub fn min(mut self, v: f32) -> Self {
        self.min = v;
        self
    }

    /// Sets the decay factor.
    pub fn decay(mut self, v: f32) -> Self {
        self.decay = v;
        self
    }

    /// Checks `0 <= min <= start <= 1` and `0 < decay <= 1`.
    pub fn validate(&self) -> Result<(), KeelError> {
        ensure_config((0.0..=1.0).contains(&self.start), || {
            format!("epsilon start must be in [0, 1], got {}", self.start)
        })?;
        ensure_config((0.0..=self.start).contains(&self.min), || {
            format!(
                "epsilon min must be in [0, start = {}], got {}",
                self.start, self.min
            )
        })?;
        ensure_config(self.decay > 0.0 && self.decay <= 1.0, || {
            format!("epsilon decay must be in (0, 1], got {}", self.decay)
        })
    }
}

/// Exponentially decaying epsilon with a floor.
///
/// Non-increasing between calls of [`EpsilonSchedule::reset`].
#[derive(Debug, Clone, PartialEq)]
pub struct EpsilonSchedule {
    config: EpsilonScheduleConfig,
    eps: f32,
}

impl EpsilonSchedule {
    /// Creates a schedule starting at `config.start`.
    pub fn new(config: &EpsilonScheduleConfig) -> Result<Self, KeelError> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
            eps: config.start,
        })
    }

    /// Current epsilon.
    pub fn value(&self) -> f32 {
        self.eps
    }

    /// Applies `eps = max(min, eps * decay)` and returns the new value.
    pub fn step(&mut self) -> f32 {
        self.eps = (self.eps * self.config.decay).max(self.config.min);
        self.eps
    }

    /// Restores the initial value.
    pub fn reset(&mut self) {
        self.eps = self.config.start;
    }

    /// Overwrites the current value, e.g. when restoring a checkpoint.
    pub fn set_value(&mut self, eps: f32) {
        self.eps = eps.clamp(self.config.min, self.config.start);
    }
}
