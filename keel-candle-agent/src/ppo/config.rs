//! Configuration of PPO agent.
use super::PpoModelConfig;
use crate::{util::OutDim, Device};
use anyhow::Result;
use keel_core::error::{ensure_config, KeelError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Ppo`](super::Ppo).
///
/// `P` and `V` are the configuration types of the policy and value networks.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PpoConfig<P, V> {
    /// Configuration of the networks and their optimizers.
    pub model_config: PpoModelConfig<P, V>,

    /// Clipping range of the probability ratio, in `(0, 1)`.
    pub clip_ratio: f64,

    /// Lambda of GAE.
    pub gae_lambda: f32,

    /// Discount factor.
    pub discount_factor: f32,

    /// Weight of the entropy bonus.
    pub entropy_coef: f64,

    /// Weight of the value loss.
    pub value_coef: f64,

    /// Clipping range of value updates. `0` disables value clipping.
    pub value_clip: f64,

    /// Number of passes over the trajectory per update.
    pub update_epochs: usize,

    /// Minibatch size.
    pub batch_size: usize,

    /// Number of steps collected before an update.
    pub trajectory_size: usize,

    /// Maximum global norm of gradients.
    pub max_grad_norm: f64,

    /// If `true`, advantages are normalized to zero mean and unit variance.
    pub normalize_advantage: bool,

    /// Term added to the standard deviation when normalizing advantages.
    pub adv_eps: f32,

    /// Seed of the random number generator used for sampling actions and shuffling.
    pub seed: u64,

    /// Device used for the networks.
    pub device: Option<Device>,

    /// If `true`, the agent starts in training mode.
    pub train: bool,
}

impl<P, V> Default for PpoConfig<P, V> {
    fn default() -> Self {
        Self {
            model_config: PpoModelConfig::default(),
            clip_ratio: 0.2,
            gae_lambda: 0.95,
            discount_factor: 0.99,
            entropy_coef: 0.01,
            value_coef: 0.5,
            value_clip: 0.2,
            update_epochs: 4,
            batch_size: 64,
            trajectory_size: 2048,
            max_grad_norm: 0.5,
            normalize_advantage: true,
            adv_eps: 1e-8,
            seed: 42,
            device: None,
            train: false,
        }
    }
}

impl<P, V> PpoConfig<P, V>
where
    P: DeserializeOwned + Serialize + OutDim,
    V: DeserializeOwned + Serialize + OutDim,
{
    /// Sets the configuration of the networks.
    pub fn model_config(mut self, v: PpoModelConfig<P, V>) -> Self {
        self.model_config = v;
        self
    }

    /// Sets the clipping range of the probability ratio.
    pub fn clip_ratio(mut self, v: f64) -> Self {
        self.clip_ratio = v;
        self
    }

    /// Sets lambda of GAE.
    pub fn gae_lambda(mut self, v: f32) -> Self {
        self.gae_lambda = v;
        self
    }

    /// Sets discount factor.
    pub fn discount_factor(mut self, v: f32) -> Self {
        self.discount_factor = v;
        self
    }

    /// Sets the weight of the entropy bonus.
    pub fn entropy_coef(mut self, v: f64) -> Self {
        self.entropy_coef = v;
        self
    }

    /// Sets the weight of the value loss.
    pub fn value_coef(mut self, v: f64) -> Self {
        self.value_coef = v;
        self
    }

    /// Sets the clipping range of value updates.
    pub fn value_clip(mut self, v: f64) -> Self {
        self.value_clip = v;
        self
    }

    /// Sets the number of epochs per update.
    pub fn update_epochs(mut self, v: usize) -> Self {
        self.update_epochs = v;
        self
    }

    /// Sets minibatch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Sets the number of steps collected before an update.
    pub fn trajectory_size(mut self, v: usize) -> Self {
        self.trajectory_size = v;
        self
    }

    /// Sets the maximum norm of gradients.
    pub fn max_grad_norm(mut self, v: f64) -> Self {
        self.max_grad_norm = v;
        self
    }

    /// Enables or disables advantage normalization.
    pub fn normalize_advantage(mut self, v: bool) -> Self {
        self.normalize_advantage = v;
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

    /// Checks hyperparameters.
    pub fn validate(&self) -> Result<(), KeelError> {
        ensure_config(self.model_config.actor_config.is_some(), || {
            "actor_config is not set".to_string()
        })?;
        ensure_config(self.model_config.critic_config.is_some(), || {
            "critic_config is not set".to_string()
        })?;
        if let Some(actor) = &self.model_config.actor_config {
            ensure_config(actor.get_out_dim() > 0, || {
                "actor out_dim must be positive".to_string()
            })?;
        }
        if let Some(critic) = &self.model_config.critic_config {
            ensure_config(critic.get_out_dim() == 1, || {
                format!("critic out_dim must be 1, got {}", critic.get_out_dim())
            })?;
        }
        ensure_config(self.clip_ratio > 0.0 && self.clip_ratio < 1.0, || {
            format!("clip ratio must be in (0, 1), got {}", self.clip_ratio)
        })?;
        ensure_config((0.0..=1.0).contains(&self.gae_lambda), || {
            format!("GAE lambda must be in [0, 1], got {}", self.gae_lambda)
        })?;
        ensure_config((0.0..=1.0).contains(&self.discount_factor), || {
            format!("discount factor must be in [0, 1], got {}", self.discount_factor)
        })?;
        ensure_config(self.value_clip >= 0.0, || {
            format!("value clip must be non-negative, got {}", self.value_clip)
        })?;
        ensure_config(self.update_epochs > 0, || {
            "update_epochs must be positive".to_string()
        })?;
        ensure_config(self.batch_size > 0, || "batch_size must be positive".to_string())?;
        ensure_config(self.trajectory_size > 0, || {
            "trajectory_size must be positive".to_string()
        })?;
        ensure_config(self.max_grad_norm > 0.0, || {
            format!("max_grad_norm must be positive, got {}", self.max_grad_norm)
        })?;
        ensure_config(self.adv_eps > 0.0, || {
            format!("adv_eps must be positive, got {}", self.adv_eps)
        })
    }

    /// Constructs [`PpoConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`PpoConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mlp::{MlpConfig, PolicyHead, PolicyMlpConfig};
    use tempdir::TempDir;

    type Config = PpoConfig<PolicyMlpConfig, MlpConfig>;

    fn config() -> Config {
        PpoConfig::default().model_config(
            PpoModelConfig::default()
                .actor_config(PolicyMlpConfig::new(3, vec![8], 2, PolicyHead::Categorical))
                .critic_config(MlpConfig::new(3, vec![8], 1, false)),
        )
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());
        assert!(Config::default().validate().is_err());
        assert!(config().clip_ratio(0.0).validate().is_err());
        assert!(config().clip_ratio(1.0).validate().is_err());
        assert!(config().gae_lambda(1.1).validate().is_err());
        assert!(config().value_clip(-0.1).validate().is_err());
        assert!(config().update_epochs(0).validate().is_err());
        assert!(config().trajectory_size(0).validate().is_err());
        assert!(config().max_grad_norm(0.0).validate().is_err());
        assert!(config().value_clip(0.0).validate().is_ok());
    }

    #[test]
    fn test_validate_network_out_dims() {
        let no_actions = PpoConfig::default().model_config(
            PpoModelConfig::default()
                .actor_config(PolicyMlpConfig::new(3, vec![8], 0, PolicyHead::Categorical))
                .critic_config(MlpConfig::new(3, vec![8], 1, false)),
        );
        match no_actions.validate() {
            Err(KeelError::ConfigurationError(_)) => {}
            r => panic!("expected a configuration error, got {:?}", r),
        }

        let wide_critic = PpoConfig::default().model_config(
            PpoModelConfig::default()
                .actor_config(PolicyMlpConfig::new(3, vec![8], 2, PolicyHead::Categorical))
                .critic_config(MlpConfig::new(3, vec![8], 2, false)),
        );
        assert!(wide_critic.validate().is_err());
    }

    #[test]
    fn test_serde_ppo_config() -> Result<()> {
        let config = config()
            .device(Device::Cpu)
            .trajectory_size(128)
            .model_config(
                PpoModelConfig::default()
                    .actor_config(PolicyMlpConfig::new(
                        3,
                        vec![8],
                        2,
                        PolicyHead::Gaussian { init_log_std: -0.5 },
                    ))
                    .critic_config(MlpConfig::new(3, vec![8], 1, false)),
            );
        let dir = TempDir::new("ppo_config")?;
        let path = dir.path().join("ppo_config.yaml");
        config.save(&path)?;
        let config_ = Config::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }
}
