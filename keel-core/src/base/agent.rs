//! Agent.
use super::{Env, Policy, Step};
use crate::record::Record;
use anyhow::Result;
use std::path::Path;

/// Represents a trainable policy on an environment.
///
/// An agent owns whatever it learns from: DQN keeps a replay buffer,
/// PPO keeps the trajectory collected since its last update.
pub trait Agent<E: Env>: Policy<E> {
    /// Set the policy to training mode.
    fn train(&mut self);

    /// Set the policy to evaluation mode.
    fn eval(&mut self);

    /// Return if it is in training mode.
    fn is_train(&self) -> bool;

    /// Feeds the outcome of an environment step to the agent.
    ///
    /// `obs` is the observation on which the action `step.act` was taken.
    fn observe(&mut self, obs: &E::Obs, step: &Step<E>) -> Result<()>;

    /// Performs an optimization step.
    fn opt(&mut self) -> Result<()> {
        let _ = self.opt_with_record()?;
        Ok(())
    }

    /// Performs an optimization step and returns some information.
    ///
    /// Returns `None` when the agent decided not to optimize, for example
    /// when it has not collected enough data yet.
    fn opt_with_record(&mut self) -> Result<Option<Record>>;

    /// Save the parameters of the agent in the given directory.
    /// This method commonly creates a number of files consisting the agent
    /// in the directory. For example, the DQN agent in `keel_candle_agent` crate saves
    /// two Q-networks corresponding to the online and target networks.
    fn save_params(&self, path: &Path) -> Result<()>;

    /// Load the parameters of the agent from the given directory.
    fn load_params(&mut self, path: &Path) -> Result<()>;
}
