//! Scheduling the exponent of importance weight for PER.
use serde::{Deserialize, Serialize};

/// Scheduler of the exponent of importance weight for PER.
///
/// $\beta$ grows by `beta_increment` after every prioritized sampling and
/// saturates at 1.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct IwScheduler {
    /// Initial value of $\beta$.
    pub beta_0: f32,

    /// Increment of $\beta$ per sampling.
    pub beta_increment: f32,

    /// Current value of $\beta$.
    beta: f32,
}

impl IwScheduler {
    /// Creates a scheduler.
    pub fn new(beta_0: f32, beta_increment: f32) -> Self {
        Self {
            beta_0,
            beta_increment,
            beta: beta_0.min(1.0),
        }
    }

    /// Gets the exponent of importance sampling weight.
    pub fn beta(&self) -> f32 {
        self.beta
    }

    /// Advances $\beta$ by one sampling.
    pub fn step(&mut self) {
        self.beta = (self.beta + self.beta_increment).min(1.0);
    }

    /// Overwrites the current value, capped at 1.
    pub fn set_beta(&mut self, beta: f32) {
        self.beta = beta.min(1.0);
    }

    /// Restores the initial value.
    pub fn reset(&mut self) {
        self.beta = self.beta_0.min(1.0);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_beta_saturates() {
        let mut s = IwScheduler::new(0.4, 0.25);
        s.step();
        assert!((s.beta() - 0.65).abs() < 1e-6);
        s.step();
        s.step();
        assert_eq!(s.beta(), 1.0);
        s.reset();
        assert_eq!(s.beta(), 0.4);
    }

    #[test]
    fn test_set_beta() {
        let mut s = IwScheduler::new(0.4, 0.25);
        s.step();
        s.set_beta(0.4);
        assert_eq!(s.beta(), 0.4);
        s.set_beta(1.5);
        assert_eq!(s.beta(), 1.0);
    }
}
