//! Configuration of DQN agent.
use super::DqnModelConfig;
use crate::{util::CriticLoss, util::OutDim, Device};
use anyhow::Result;
use keel_core::{
    error::{ensure_config, KeelError},
    replay_buffer::ReplayBufferConfig,
    schedule::EpsilonScheduleConfig,
    target_sync::TargetSync,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Dqn`](super::Dqn).
///
/// `Q` is the configuration type of the action-value network.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct DqnConfig<Q>
where
    Q: OutDim,
{
    /// Configuration of the action-value network and its optimizer.
    pub model_config: DqnModelConfig<Q>,

    /// Configuration of the replay buffer. Prioritized if `per_config` is set.
    pub replay_buffer_config: ReplayBufferConfig,

    /// Schedule of epsilon in epsilon-greedy exploration.
    pub explorer_config: EpsilonScheduleConfig,

    /// Cadence of target network synchronization.
    pub target_sync: TargetSync,

    /// Batch size for training.
    pub batch_size: usize,

    /// Training steps are skipped until the replay buffer holds this many transitions.
    pub min_transitions_warmup: usize,

    /// Discount factor.
    pub discount_factor: f32,

    /// If `true`, the online network selects next actions and the target network evaluates them.
    pub double_dqn: bool,

    /// Number of steps accumulated into one stored transition.
    pub n_step: usize,

    /// Type of critic loss function.
    pub critic_loss: CriticLoss,

    /// Seed of the random number generator used for exploration.
    pub seed: u64,

    /// Device used for the networks.
    pub device: Option<Device>,

    /// If `true`, the agent starts in training mode.
    pub train: bool,
}

impl<Q> Default for DqnConfig<Q>
where
    Q: OutDim,
{
    fn default() -> Self {
        Self {
            model_config: DqnModelConfig::default(),
            replay_buffer_config: ReplayBufferConfig::default(),
            explorer_config: EpsilonScheduleConfig::default(),
            target_sync: TargetSync::default(),
            batch_size: 32,
            min_transitions_warmup: 0,
            discount_factor: 0.99,
            double_dqn: false,
            n_step: 1,
            critic_loss: CriticLoss::Mse,
            seed: 42,
            device: None,
            train: false,
        }
    }
}

impl<Q> DqnConfig<Q>
where
    Q: DeserializeOwned + Serialize + OutDim,
{
    /// Sets the configuration of the model.
    pub fn model_config(mut self, v: DqnModelConfig<Q>) -> Self {
        self.model_config = v;
        self
    }

    /// Sets the configuration of the replay buffer.
    pub fn replay_buffer_config(mut self, v: ReplayBufferConfig) -> Self {
        self.replay_buffer_config = v;
        self
    }

    /// Sets the epsilon schedule.
    pub fn explorer_config(mut self, v: EpsilonScheduleConfig) -> Self {
        self.explorer_config = v;
        self
    }

    /// Sets the target synchronization.
    pub fn target_sync(mut self, v: TargetSync) -> Self {
        self.target_sync = v;
        self
    }

    /// Sets batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Sets the number of warmup transitions.
    pub fn min_transitions_warmup(mut self, v: usize) -> Self {
        self.min_transitions_warmup = v;
        self
    }

    /// Sets discount factor.
    pub fn discount_factor(mut self, v: f32) -> Self {
        self.discount_factor = v;
        self
    }

    /// Enables or disables Double DQN.
    pub fn double_dqn(mut self, v: bool) -> Self {
        self.double_dqn = v;
        self
    }

    /// Sets the number of steps of n-step returns.
    pub fn n_step(mut self, v: usize) -> Self {
        self.n_step = v;
        self
    }

    /// Sets critic loss.
    pub fn critic_loss(mut self, v: CriticLoss) -> Self {
        self.critic_loss = v;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Sets the device.
    pub fn device(mut self, v: Device) -> Self {
        self.device = Some(v);
        self
    }

    /// Sets the initial mode.
    pub fn train(mut self, v: bool) -> Self {
        self.train = v;
        self
    }

    /// Checks hyperparameters and nested configurations.
    pub fn validate(&self) -> Result<(), KeelError> {
        ensure_config(self.model_config.q_config.is_some(), || {
            "q_config is not set".to_string()
        })?;
        if let Some(q_config) = &self.model_config.q_config {
            ensure_config(q_config.get_out_dim() > 0, || {
                "q_config out_dim must be positive".to_string()
            })?;
        }
        ensure_config(self.batch_size > 0, || "batch_size must be positive".to_string())?;
        ensure_config((0.0..=1.0).contains(&self.discount_factor), || {
            format!("discount factor must be in [0, 1], got {}", self.discount_factor)
        })?;
        ensure_config(self.n_step > 0, || "n_step must be positive".to_string())?;
        self.replay_buffer_config.validate()?;
        self.explorer_config.validate()?;
        self.target_sync.validate()
    }

    /// Constructs [`DqnConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`DqnConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
