//! Evaluator computing the average return over a number of episodes.
use super::Evaluator;
use crate::{record::Record, Agent, Env};
use anyhow::Result;

/// Runs `n_episodes` episodes and records their average return as `"Episode return"`.
///
/// Episodes are started with [`Env::reset_with_index`] so that every evaluation
/// sees the same sequence of initial states.
pub struct DefaultEvaluator<E: Env> {
    n_episodes: usize,
    env: E,
}

impl<E: Env> Evaluator<E> for DefaultEvaluator<E> {
    fn evaluate<A: Agent<E>>(&mut self, policy: &mut A) -> Result<Record> {
        let mut r_total = 0f32;

        for ix in 0..self.n_episodes {
            let mut prev_obs = self.env.reset_with_index(ix)?;

            loop {
                let act = policy.sample(&prev_obs)?;
                let (step, _) = self.env.step(&act)?;
                r_total += step.reward;
                if step.is_done() {
                    break;
                }
                prev_obs = step.obs;
            }
        }

        Ok(Record::from_scalar(
            "Episode return",
            r_total / self.n_episodes as f32,
        ))
    }
}

impl<E: Env> DefaultEvaluator<E> {
    /// Constructs a new [`DefaultEvaluator`].
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration for the environment
    /// * `seed` - Random seed for environment initialization
    /// * `n_episodes` - Number of episodes to run during evaluation
    pub fn new(config: &E::Config, seed: i64, n_episodes: usize) -> Result<Self> {
        crate::error::ensure_config(n_episodes > 0, || {
            "n_episodes must be positive".to_string()
        })?;
        Ok(Self {
            n_episodes,
            env: E::build(config, seed)?,
        })
    }
}
