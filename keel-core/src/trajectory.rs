//! Transient on-policy rollout storage.
use crate::{error::KeelError, gae::compute_gae};

/// A step of a [`Trajectory`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryStep<O, A> {
    /// State on which the action was taken.
    pub state: O,

    /// Sampled action.
    pub action: A,

    /// Log probability of `action` under the policy at sampling time.
    pub log_prob: f32,

    /// Value estimate of `state` at sampling time.
    pub value: f32,

    /// Reward, set by [`Trajectory::store_reward`].
    pub reward: f32,

    /// Episode end flag, set by [`Trajectory::store_reward`].
    pub done: bool,
}

/// Ordered steps collected since the last policy update.
#[derive(Debug, Clone)]
pub struct Trajectory<O, A> {
    steps: Vec<TrajectoryStep<O, A>>,
}

impl<O, A> Default for Trajectory<O, A> {
    fn default() -> Self {
        Self { steps: vec![] }
    }
}

impl<O, A> Trajectory<O, A> {
    /// Creates an empty trajectory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step whose reward is not known yet.
    pub fn record(&mut self, state: O, action: A, log_prob: f32, value: f32) {
        self.steps.push(TrajectoryStep {
            state,
            action,
            log_prob,
            value,
            reward: 0.0,
            done: false,
        });
    }

    /// Sets reward and episode end flag of the most recent step.
    pub fn store_reward(&mut self, reward: f32, done: bool) -> Result<(), KeelError> {
        let step = self.steps.last_mut().ok_or(KeelError::EmptyTrajectory)?;
        step.reward = reward;
        step.done = done;
        Ok(())
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if no step is recorded.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Removes every step.
    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// Recorded steps in order.
    pub fn steps(&self) -> &[TrajectoryStep<O, A>] {
        &self.steps
    }

    /// Value estimates of the steps.
    pub fn values(&self) -> Vec<f32> {
        self.steps.iter().map(|s| s.value).collect()
    }

    /// Log probabilities of the sampled actions.
    pub fn log_probs(&self) -> Vec<f32> {
        self.steps.iter().map(|s| s.log_prob).collect()
    }

    /// Advantages and returns of every step.
    ///
    /// The value after the last step is bootstrapped with the last recorded value
    /// unless that step ended the episode.
    pub fn advantages(&self, gamma: f32, lambda: f32) -> (Vec<f32>, Vec<f32>) {
        let rewards = self.steps.iter().map(|s| s.reward).collect::<Vec<_>>();
        let dones = self.steps.iter().map(|s| s.done).collect::<Vec<_>>();
        let values = self.values();
        let last_value = values.last().copied().unwrap_or(0.0);
        compute_gae(&rewards, &values, &dones, last_value, gamma, lambda)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_store_reward() {
        let mut traj = Trajectory::<Vec<f32>, usize>::new();
        assert_eq!(traj.store_reward(1.0, false), Err(KeelError::EmptyTrajectory));

        traj.record(vec![0.0], 1, -0.5, 0.3);
        traj.store_reward(2.0, true).unwrap();
        let step = &traj.steps()[0];
        assert_eq!((step.reward, step.done), (2.0, true));

        traj.clear();
        assert!(traj.is_empty());
    }

    #[test]
    fn test_advantages_bootstrap_last_value() {
        let mut traj = Trajectory::<f32, usize>::new();
        traj.record(0.0, 0, 0.0, 1.0);
        traj.store_reward(0.5, false).unwrap();

        // delta = 0.5 + 0.9 * 1.0 - 1.0
        let (adv, ret) = traj.advantages(0.9, 0.95);
        assert!((adv[0] - 0.4).abs() < 1e-6);
        assert!((ret[0] - 1.4).abs() < 1e-6);
    }
}
