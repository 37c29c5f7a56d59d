use crate::{
    distributions::PolicyDist,
    model::SubModel1,
    opt::{Optimizer, OptimizerConfig},
};
use anyhow::{Context, Result};
use candle_core::{backprop::GradStore, DType, Device, Tensor, Var, D};
use candle_nn::{VarBuilder, VarMap};
use log::info;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`PpoModel`].
pub struct PpoModelConfig<P, V> {
    pub(super) actor_config: Option<P>,
    pub(super) critic_config: Option<V>,
    pub(super) actor_opt_config: OptimizerConfig,
    pub(super) critic_opt_config: OptimizerConfig,
}

impl<P, V> Default for PpoModelConfig<P, V> {
    fn default() -> Self {
        Self {
            actor_config: None,
            critic_config: None,
            actor_opt_config: OptimizerConfig::Adam { lr: 3e-4 },
            critic_opt_config: OptimizerConfig::Adam { lr: 1e-3 },
        }
    }
}

impl<P, V> PpoModelConfig<P, V>
where
    P: DeserializeOwned + Serialize,
    V: DeserializeOwned + Serialize,
{
    /// Sets the configuration of the policy network.
    pub fn actor_config(mut self, v: P) -> Self {
        self.actor_config = Some(v);
        self
    }

    /// Sets the configuration of the value network. Its output dimension must be 1.
    pub fn critic_config(mut self, v: V) -> Self {
        self.critic_config = Some(v);
        self
    }

    /// Sets the optimizer of the policy network.
    pub fn actor_opt_config(mut self, v: OptimizerConfig) -> Self {
        self.actor_opt_config = v;
        self
    }

    /// Sets the optimizer of the value network.
    pub fn critic_opt_config(mut self, v: OptimizerConfig) -> Self {
        self.critic_opt_config = v;
        self
    }

    /// Constructs [`PpoModelConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`PpoModelConfig`] to as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Policy and value networks of [`Ppo`](super::Ppo), each with its own optimizer.
pub struct PpoModel<P, V>
where
    P: SubModel1<Input = Tensor, Output = PolicyDist>,
    V: SubModel1<Input = Tensor, Output = Tensor>,
{
    actor_varmap: VarMap,
    critic_varmap: VarMap,
    actor: P,
    critic: V,
    actor_opt: Optimizer,
    critic_opt: Optimizer,
}

impl<P, V> PpoModel<P, V>
where
    P: SubModel1<Input = Tensor, Output = PolicyDist>,
    V: SubModel1<Input = Tensor, Output = Tensor>,
{
    /// Constructs [`PpoModel`].
    pub fn build(config: PpoModelConfig<P::Config, V::Config>, device: &Device) -> Result<Self> {
        let actor_config = config.actor_config.context("actor_config is not set.")?;
        let critic_config = config.critic_config.context("critic_config is not set.")?;

        let actor_varmap = VarMap::new();
        let actor = P::build(
            VarBuilder::from_varmap(&actor_varmap, DType::F32, device),
            actor_config,
        )?;
        let critic_varmap = VarMap::new();
        let critic = V::build(
            VarBuilder::from_varmap(&critic_varmap, DType::F32, device),
            critic_config,
        )?;
        let actor_opt = config.actor_opt_config.build(actor_varmap.all_vars())?;
        let critic_opt = config.critic_opt_config.build(critic_varmap.all_vars())?;

        Ok(Self {
            actor_varmap,
            critic_varmap,
            actor,
            critic,
            actor_opt,
            critic_opt,
        })
    }

    /// Action distribution for a batch of observations.
    pub fn actor_forward(&self, obs: &Tensor) -> Result<PolicyDist> {
        self.actor.forward(obs)
    }

    /// State values of shape `(batch,)`.
    pub fn critic_forward(&self, obs: &Tensor) -> Result<Tensor> {
        Ok(self.critic.forward(obs)?.squeeze(D::Minus1)?)
    }

    /// Variables of both networks.
    pub fn vars(&self) -> Vec<Var> {
        let mut vars = self.actor_varmap.all_vars();
        vars.extend(self.critic_varmap.all_vars());
        vars
    }

    /// Updates both networks with gradients of a joint loss.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.actor_opt.step(grads)?;
        self.critic_opt.step(grads)
    }

    /// [`VarMap`] of the policy network.
    pub fn actor_varmap(&self) -> &VarMap {
        &self.actor_varmap
    }

    /// [`VarMap`] of the value network.
    pub fn critic_varmap(&self) -> &VarMap {
        &self.critic_varmap
    }

    /// Saves both networks in the given directory.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.actor_varmap.save(path.join("actor.safetensors"))?;
        self.critic_varmap.save(path.join("critic.safetensors"))?;
        info!("Save ppomodel to {:?}", path);
        Ok(())
    }

    /// Loads both networks from the given directory.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.actor_varmap.load(path.join("actor.safetensors"))?;
        self.critic_varmap.load(path.join("critic.safetensors"))?;
        info!("Load ppomodel from {:?}", path);
        Ok(())
    }
}
