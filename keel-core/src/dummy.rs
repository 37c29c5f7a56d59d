//! A deterministic toy MDP, used for tests.
//!
//! Two states alternate at every step whatever the action is. In state 0 action 0
//! yields reward 1, in state 1 action 1 does; every other choice yields 0.
//! Observations are one-hot vectors of length 2 and an episode terminates after
//! `episode_length` steps.
use crate::{error::KeelError, record::Record, Env, Step};
use anyhow::Result;

/// Configuration of [`TwoStateMdp`].
#[derive(Clone, Debug)]
pub struct TwoStateMdpConfig {
    /// Number of steps of an episode.
    pub episode_length: usize,
}

impl Default for TwoStateMdpConfig {
    fn default() -> Self {
        Self { episode_length: 10 }
    }
}

/// See the [module documentation](self).
pub struct TwoStateMdp {
    episode_length: usize,
    state: usize,
    t: usize,
}

impl TwoStateMdp {
    /// Number of actions.
    pub const N_ACTIONS: usize = 2;

    /// Dimension of observations.
    pub const OBS_DIM: usize = 2;

    /// One-hot observation of `state`.
    pub fn obs(state: usize) -> Vec<f32> {
        let mut obs = vec![0f32; Self::OBS_DIM];
        obs[state] = 1.0;
        obs
    }

    /// The action yielding reward in `state`.
    pub fn optimal_action(state: usize) -> usize {
        state
    }
}

impl Env for TwoStateMdp {
    type Config = TwoStateMdpConfig;
    type Obs = Vec<f32>;
    type Act = usize;
    type Info = ();

    fn build(config: &Self::Config, _seed: i64) -> Result<Self> {
        crate::error::ensure_config(config.episode_length > 0, || {
            "episode_length must be positive".to_string()
        })?;
        Ok(Self {
            episode_length: config.episode_length,
            state: 0,
            t: 0,
        })
    }

    fn step(&mut self, a: &usize) -> Result<(Step<Self>, Record)> {
        if *a >= Self::N_ACTIONS {
            return Err(KeelError::ActionSpaceMismatch(format!(
                "action {} for {} actions",
                a,
                Self::N_ACTIONS
            ))
            .into());
        }

        let reward = if *a == Self::optimal_action(self.state) {
            1.0
        } else {
            0.0
        };
        self.state = 1 - self.state;
        self.t += 1;
        let is_terminated = self.t >= self.episode_length;

        let step = Step::new(Self::obs(self.state), *a, reward, is_terminated, false, ());
        Ok((step, Record::empty()))
    }

    fn reset(&mut self) -> Result<Vec<f32>> {
        self.reset_with_index(0)
    }

    fn reset_with_index(&mut self, ix: usize) -> Result<Vec<f32>> {
        self.state = ix % 2;
        self.t = 0;
        Ok(Self::obs(self.state))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_two_state_mdp() -> Result<()> {
        let config = TwoStateMdpConfig { episode_length: 3 };
        let mut env = TwoStateMdp::build(&config, 0)?;
        assert_eq!(env.reset()?, vec![1.0, 0.0]);

        let (step, _) = env.step(&0)?;
        assert_eq!((step.reward, step.obs.clone()), (1.0, vec![0.0, 1.0]));
        let (step, _) = env.step(&0)?;
        assert_eq!(step.reward, 0.0);
        assert!(!step.is_done());
        let (step, _) = env.step(&0)?;
        assert!(step.is_done());

        assert!(env.step(&2).is_err());
        Ok(())
    }
}
