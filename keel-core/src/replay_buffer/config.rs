//! Configuration of the replay buffer.
use super::WeightNormalizer;
use crate::error::{ensure_config, KeelError};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    default::Default,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of prioritized experience replay (PER).
///
/// ```rust
/// use keel_core::replay_buffer::{PerConfig, WeightNormalizer};
///
/// let config = PerConfig::default()
///     .alpha(0.6)
///     .beta(0.4)
///     .beta_increment(0.001)
///     .normalize(WeightNormalizer::Batch);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PerConfig {
    /// Exponent for prioritization. A value of 0 results in uniform sampling.
    pub alpha: f32,

    /// Initial value of the importance sampling exponent.
    pub beta: f32,

    /// Increment of `beta` per sampling; `beta` saturates at 1.
    pub beta_increment: f32,

    /// Added to the absolute value of every given priority.
    pub epsilon: f32,

    /// Method for normalizing importance sampling weights.
    pub normalize: WeightNormalizer,
}

impl Default for PerConfig {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            beta: 0.4,
            beta_increment: 0.001,
            epsilon: 1e-6,
            normalize: WeightNormalizer::Batch,
        }
    }
}

impl PerConfig {
    /// Sets the prioritization exponent `alpha`.
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Sets the initial importance sampling exponent `beta`.
    pub fn beta(mut self, beta: f32) -> Self {
        self.beta = beta;
        self
    }

    /// Sets the increment of `beta` per sampling.
    pub fn beta_increment(mut self, beta_increment: f32) -> Self {
        self.beta_increment = beta_increment;
        self
    }

    /// Sets the priority floor `epsilon`.
    pub fn epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Sets the method for normalizing importance weights.
    pub fn normalize(mut self, normalize: WeightNormalizer) -> Self {
        self.normalize = normalize;
        self
    }

    /// Checks the ranges of the parameters.
    pub fn validate(&self) -> Result<(), KeelError> {
        ensure_config((0.0..=1.0).contains(&self.alpha), || {
            format!("alpha must be in [0, 1], got {}", self.alpha)
        })?;
        ensure_config((0.0..=1.0).contains(&self.beta), || {
            format!("beta must be in [0, 1], got {}", self.beta)
        })?;
        ensure_config(self.beta_increment >= 0.0, || {
            format!("beta_increment must be >= 0, got {}", self.beta_increment)
        })?;
        ensure_config(self.epsilon > 0.0 && self.epsilon.is_finite(), || {
            format!("PER epsilon must be positive, got {}", self.epsilon)
        })
    }
}

/// Configuration of [`ReplayBuffer`](super::ReplayBuffer).
///
/// ```rust
/// use keel_core::replay_buffer::{PerConfig, ReplayBufferConfig};
///
/// // Uniform sampling
/// let config = ReplayBufferConfig::default().capacity(10000).seed(42);
///
/// // Prioritized sampling
/// let config_with_per = ReplayBufferConfig::default()
///     .capacity(10000)
///     .per_config(Some(PerConfig::default()));
/// ```
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ReplayBufferConfig {
    /// Maximum number of transitions. When the buffer is full,
    /// new transitions replace the oldest ones.
    pub capacity: usize,

    /// Random seed used for sampling transitions.
    pub seed: u64,

    /// If `None`, transitions are sampled uniformly at random.
    pub per_config: Option<PerConfig>,
}

impl Default for ReplayBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 10000,
            seed: 42,
            per_config: None,
        }
    }
}

impl ReplayBufferConfig {
    /// Sets the capacity of the replay buffer.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the random seed for sampling.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the configuration for prioritized experience replay.
    pub fn per_config(mut self, per_config: Option<PerConfig>) -> Self {
        self.per_config = per_config;
        self
    }

    /// Checks the ranges of the parameters.
    pub fn validate(&self) -> Result<(), KeelError> {
        ensure_config(self.capacity > 0, || "capacity must be positive".to_string())?;
        match &self.per_config {
            Some(per_config) => per_config.validate(),
            None => Ok(()),
        }
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_validate() {
        assert!(ReplayBufferConfig::default().validate().is_ok());
        assert!(matches!(
            ReplayBufferConfig::default().capacity(0).validate(),
            Err(KeelError::ConfigurationError(_))
        ));
        for per_config in [
            PerConfig::default().alpha(1.5),
            PerConfig::default().beta(-0.1),
            PerConfig::default().beta_increment(-1e-3),
            PerConfig::default().epsilon(0.0),
        ] {
            let config = ReplayBufferConfig::default().per_config(Some(per_config));
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_serde_replay_buffer_config() -> Result<()> {
        let config = ReplayBufferConfig::default()
            .capacity(100)
            .seed(7)
            .per_config(Some(PerConfig::default().normalize(WeightNormalizer::All)));

        let dir = TempDir::new("replay_buffer_config")?;
        let path = dir.path().join("replay_buffer.yaml");
        config.save(&path)?;
        let config_ = ReplayBufferConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }
}
