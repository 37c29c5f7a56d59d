//! Cadence of target network synchronization.
use crate::error::{ensure_config, KeelError};
use serde::{Deserialize, Serialize};

/// How a target parameter set follows the online one.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum TargetSync {
    /// Copy the online parameters every `interval` optimization steps.
    Hard {
        /// Number of optimization steps between copies.
        interval: usize,
    },

    /// Blend `target = tau * online + (1 - tau) * target` after every optimization step.
    Soft {
        /// Blending factor in `(0, 1]`.
        tau: f32,
    },
}

/// Synchronization to perform after an optimization step.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum SyncAction {
    /// Copy parameters verbatim.
    Copy,

    /// Blend parameters with the given factor.
    Blend(f32),
}

impl Default for TargetSync {
    fn default() -> Self {
        Self::Hard { interval: 1000 }
    }
}

impl TargetSync {
    /// Checks `interval > 0` and `0 < tau <= 1`.
    pub fn validate(&self) -> Result<(), KeelError> {
        match self {
            Self::Hard { interval } => ensure_config(*interval > 0, || {
                "hard sync interval must be positive".to_string()
            }),
            Self::Soft { tau } => ensure_config(*tau > 0.0 && *tau <= 1.0, || {
                format!("tau must be in (0, 1], got {}", tau)
            }),
        }
    }

    /// The synchronization due after the `n_opts`-th optimization step, if any.
    pub fn action(&self, n_opts: usize) -> Option<SyncAction> {
        match self {
            Self::Hard { interval } => (n_opts % interval == 0).then_some(SyncAction::Copy),
            Self::Soft { tau } => Some(SyncAction::Blend(*tau)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cadence() {
        let hard = TargetSync::Hard { interval: 3 };
        let actions = (1..=6).map(|n| hard.action(n)).collect::<Vec<_>>();
        assert_eq!(
            actions,
            vec![
                None,
                None,
                Some(SyncAction::Copy),
                None,
                None,
                Some(SyncAction::Copy)
            ]
        );

        let soft = TargetSync::Soft { tau: 0.01 };
        assert!((1..=3).all(|n| soft.action(n) == Some(SyncAction::Blend(0.01))));
    }

    #[test]
    fn test_validate() {
        assert!(TargetSync::Hard { interval: 0 }.validate().is_err());
        assert!(TargetSync::Soft { tau: 0.0 }.validate().is_err());
        assert!(TargetSync::Soft { tau: 1.5 }.validate().is_err());
        assert!(TargetSync::Soft { tau: 1.0 }.validate().is_ok());
    }
}
