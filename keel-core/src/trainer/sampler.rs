//! Interaction of an agent with the training environment.
use crate::{
    record::{Record, RecordValue::Scalar},
    Agent, Env,
};
use anyhow::Result;
use log::trace;

/// Runs environment steps with an agent and feeds them back to it.
///
/// The environment is reset lazily, before the first step and after every
/// step that ends an episode.
pub struct Sampler<E: Env> {
    env: E,
    prev_obs: Option<E::Obs>,
    episode_return: f32,
    n_env_steps_in_episode: usize,
}

impl<E: Env> Sampler<E> {
    /// Creates a sampler on `env`.
    pub fn new(env: E) -> Self {
        Self {
            env,
            prev_obs: None,
            episode_return: 0.0,
            n_env_steps_in_episode: 0,
        }
    }

    /// Performs an environment step and lets `agent` observe it.
    ///
    /// When an episode ends, the returned record holds `"episode_return"` and
    /// `"episode_length"` merged with the record of the environment.
    pub fn sample_and_observe<A: Agent<E>>(&mut self, agent: &mut A) -> Result<Record> {
        let obs = match self.prev_obs.take() {
            Some(obs) => obs,
            None => self.env.reset()?,
        };

        let act = agent.sample(&obs)?;
        let (step, mut record) = self.env.step(&act)?;
        agent.observe(&obs, &step)?;

        self.episode_return += step.reward;
        self.n_env_steps_in_episode += 1;
        trace!("reward = {}, done = {}", step.reward, step.is_done());

        if step.is_done() {
            record.insert("episode_return", Scalar(self.episode_return));
            record.insert("episode_length", Scalar(self.n_env_steps_in_episode as f32));
            self.episode_return = 0.0;
            self.n_env_steps_in_episode = 0;
        } else {
            self.prev_obs = Some(step.obs);
        }

        Ok(record)
    }
}
