//! PPO agent implemented with candle.
use super::{config::PpoConfig, model::PpoModel, PpoAction};
use crate::{
    distributions::PolicyDist,
    model::SubModel1,
    opt::clip_grad_norm,
    util::{rows_to_tensor, NamedTensors, OutDim},
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use keel_core::{
    error::KeelError,
    gae::{explained_variance, normalize_advantages},
    record::{Record, RecordValue},
    trajectory::Trajectory,
    Agent, Configurable, Env, Policy, Step, SyncModel,
};
use log::{debug, trace, warn};
use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fmt::Debug,
    fs::{self, File},
    io::{BufReader, Write},
    marker::PhantomData,
    path::Path,
};

/// Metrics of an update of [`Ppo`], averaged over the processed minibatches.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PpoStats {
    /// Negated clipped surrogate objective.
    pub policy_loss: f32,

    /// Loss of the value function.
    pub value_loss: f32,

    /// Entropy of the policy.
    pub entropy: f32,

    /// Estimate of the KL divergence between the old and new policies.
    pub approx_kl: f32,

    /// Fraction of samples whose probability ratio left the clipping range.
    pub clip_fraction: f32,

    /// Explained variance of the returns by the value estimates at sampling time.
    pub explained_variance: f32,

    /// Number of minibatches used for parameter updates.
    pub n_minibatches: usize,

    /// Number of minibatches skipped because of a non-finite loss.
    pub skipped_minibatches: usize,
}

impl From<PpoStats> for Record {
    fn from(stats: PpoStats) -> Self {
        Record::from_slice(&[
            ("policy_loss", RecordValue::Scalar(stats.policy_loss)),
            ("value_loss", RecordValue::Scalar(stats.value_loss)),
            ("entropy", RecordValue::Scalar(stats.entropy)),
            ("approx_kl", RecordValue::Scalar(stats.approx_kl)),
            ("clip_fraction", RecordValue::Scalar(stats.clip_fraction)),
            (
                "explained_variance",
                RecordValue::Scalar(stats.explained_variance),
            ),
            (
                "n_minibatches",
                RecordValue::Scalar(stats.n_minibatches as f32),
            ),
            (
                "skipped_minibatches",
                RecordValue::Scalar(stats.skipped_minibatches as f32),
            ),
        ])
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
struct PpoState {
    n_updates: usize,
}

struct Minibatch {
    states: Tensor,
    actions: Tensor,
    old_log_probs: Tensor,
    old_values: Tensor,
    advantages: Tensor,
    returns: Tensor,
}

#[derive(Default)]
struct MinibatchStats {
    policy_loss: f32,
    value_loss: f32,
    entropy: f32,
    approx_kl: f32,
    clip_fraction: f32,
}

/// Elementwise `min(ratio * adv, clip(ratio, 1 - clip, 1 + clip) * adv)`.
pub(crate) fn clipped_surrogate(ratio: &Tensor, adv: &Tensor, clip: f64) -> Result<Tensor> {
    let s1 = (ratio * adv)?;
    let s2 = (ratio.clamp(1.0 - clip, 1.0 + clip)? * adv)?;
    Ok(s1.minimum(&s2)?)
}

/// Mean squared error of values, optionally clipped around the old values.
pub(crate) fn value_loss(
    values: &Tensor,
    old_values: &Tensor,
    returns: &Tensor,
    clip: f64,
) -> Result<Tensor> {
    let loss = (values - returns)?.sqr()?.mean_all()?;
    if clip > 0.0 {
        let clipped = (old_values + (values - old_values)?.clamp(-clip, clip)?)?;
        let loss_clipped = (clipped - returns)?.sqr()?.mean_all()?;
        Ok(loss.maximum(&loss_clipped)?)
    } else {
        Ok(loss)
    }
}

/// PPO agent implemented with candle.
///
/// Observations are flat `f32` vectors. The kind of actions follows the head of the
/// policy network, see [`PpoAction`].
pub struct Ppo<E, P, V>
where
    E: Env,
    P: SubModel1<Input = Tensor, Output = PolicyDist>,
    V: SubModel1<Input = Tensor, Output = Tensor>,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    V::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    config: PpoConfig<P::Config, V::Config>,
    model: PpoModel<P, V>,
    trajectory: Trajectory<Vec<f32>, PpoAction>,
    n_updates: usize,
    train: bool,
    device: Device,
    rng: SmallRng,
    phantom: PhantomData<E>,
}

impl<E, P, V> Ppo<E, P, V>
where
    E: Env,
    P: SubModel1<Input = Tensor, Output = PolicyDist>,
    V: SubModel1<Input = Tensor, Output = Tensor>,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    V::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    /// Selects an action.
    ///
    /// In training mode the action is sampled and recorded in the trajectory together
    /// with its log probability and the value estimate of `state`. Otherwise the mode
    /// of the distribution is returned and nothing is recorded.
    pub fn select_action(&mut self, state: &[f32], training: bool) -> Result<PpoAction> {
        let obs = Tensor::from_slice(state, (1, state.len()), &self.device)?;
        let dist = self.model.actor_forward(&obs)?.detach();

        if !training {
            return first(PpoAction::from_batch(&dist.mode()?)?);
        }

        let value = self
            .model
            .critic_forward(&obs)?
            .detach()
            .squeeze(0)?
            .to_scalar::<f32>()?;
        let act = dist.sample(&mut self.rng)?;
        let log_prob = dist.log_prob(&act)?.squeeze(0)?.to_scalar::<f32>()?;
        let action = first(PpoAction::from_batch(&act)?)?;
        self.trajectory
            .record(state.to_vec(), action.clone(), log_prob, value);
        Ok(action)
    }

    /// Sets reward and episode end flag of the last recorded step.
    pub fn store_reward(&mut self, reward: f32, done: bool) -> Result<()> {
        Ok(self.trajectory.store_reward(reward, done)?)
    }

    /// `true` if the trajectory holds at least `trajectory_size` steps.
    pub fn is_ready_to_update(&self) -> bool {
        self.trajectory.len() >= self.config.trajectory_size
    }

    /// Updates the policy and value networks with the collected trajectory, then clears it.
    ///
    /// Fails with [`KeelError::NotReadyToUpdate`] if [`Ppo::is_ready_to_update`] is `false`.
    /// Minibatches with a non-finite loss are skipped and counted.
    pub fn update(&mut self) -> Result<PpoStats> {
        let len = self.trajectory.len();
        let required = self.config.trajectory_size;
        if len < required {
            return Err(KeelError::NotReadyToUpdate { len, required }.into());
        }

        let (advantages, returns) = self
            .trajectory
            .advantages(self.config.discount_factor, self.config.gae_lambda);
        let values = self.trajectory.values();
        let ev = explained_variance(&values, &returns, 1e-8);
        let advantages = match self.config.normalize_advantage {
            true => normalize_advantages(&advantages, self.config.adv_eps),
            false => advantages,
        };

        let steps = self.trajectory.steps();
        let states = {
            let rows = steps.iter().map(|s| s.state.as_slice()).collect::<Vec<_>>();
            rows_to_tensor(&rows, &self.device)?
        };
        let actions = {
            let actions = steps.iter().map(|s| &s.action).collect::<Vec<_>>();
            PpoAction::to_batch(&actions, &self.device)?
        };
        let old_log_probs = Tensor::from_vec(self.trajectory.log_probs(), len, &self.device)?;
        let old_values = Tensor::from_vec(values, len, &self.device)?;
        let advantages = Tensor::from_vec(advantages, len, &self.device)?;
        let returns = Tensor::from_vec(returns, len, &self.device)?;

        let mut sum = MinibatchStats::default();
        let mut n_minibatches = 0;
        let mut skipped_minibatches = 0;
        let mut ixs = (0..len as u32).collect::<Vec<_>>();

        for _ in 0..self.config.update_epochs {
            ixs.shuffle(&mut self.rng);
            for chunk in ixs.chunks(self.config.batch_size) {
                let ix = Tensor::from_slice(chunk, chunk.len(), &self.device)?;
                let mb = Minibatch {
                    states: states.index_select(&ix, 0)?,
                    actions: actions.index_select(&ix, 0)?,
                    old_log_probs: old_log_probs.index_select(&ix, 0)?,
                    old_values: old_values.index_select(&ix, 0)?,
                    advantages: advantages.index_select(&ix, 0)?,
                    returns: returns.index_select(&ix, 0)?,
                };
                match self.update_minibatch(&mb)? {
                    Some(s) => {
                        sum.policy_loss += s.policy_loss;
                        sum.value_loss += s.value_loss;
                        sum.entropy += s.entropy;
                        sum.approx_kl += s.approx_kl;
                        sum.clip_fraction += s.clip_fraction;
                        n_minibatches += 1;
                    }
                    None => skipped_minibatches += 1,
                }
            }
        }

        self.trajectory.clear();
        self.n_updates += 1;

        let n = n_minibatches.max(1) as f32;
        let stats = PpoStats {
            policy_loss: sum.policy_loss / n,
            value_loss: sum.value_loss / n,
            entropy: sum.entropy / n,
            approx_kl: sum.approx_kl / n,
            clip_fraction: sum.clip_fraction / n,
            explained_variance: ev,
            n_minibatches,
            skipped_minibatches,
        };
        debug!("update {}: {:?}", self.n_updates, stats);
        Ok(stats)
    }

    fn update_minibatch(&mut self, mb: &Minibatch) -> Result<Option<MinibatchStats>> {
        let clip = self.config.clip_ratio;
        let dist = self.model.actor_forward(&mb.states)?;
        let log_probs = dist.log_prob(&mb.actions)?;
        let entropy = dist.entropy()?.mean_all()?;
        let ratio = (&log_probs - &mb.old_log_probs)?.exp()?;
        let policy_loss = clipped_surrogate(&ratio, &mb.advantages, clip)?
            .mean_all()?
            .neg()?;
        let values = self.model.critic_forward(&mb.states)?;
        let value_loss = value_loss(&values, &mb.old_values, &mb.returns, self.config.value_clip)?;
        let loss = ((&policy_loss + value_loss.affine(self.config.value_coef, 0.)?)?
            - entropy.affine(self.config.entropy_coef, 0.)?)?;

        let loss_value = loss.to_scalar::<f32>()?;
        if !loss_value.is_finite() {
            warn!("Skip minibatch: loss is {}", loss_value);
            return Ok(None);
        }

        let mut grads = loss.backward()?;
        let grad_norm = clip_grad_norm(&mut grads, &self.model.vars(), self.config.max_grad_norm)?;
        self.model.step(&grads)?;

        let approx_kl = (&mb.old_log_probs - log_probs.detach())?
            .mean_all()?
            .to_scalar::<f32>()?;
        let clip_fraction = (ratio.detach() - 1.0)?
            .abs()?
            .gt(clip)?
            .to_dtype(DType::F32)?
            .mean_all()?
            .to_scalar::<f32>()?;
        trace!("minibatch: loss = {}, grad_norm = {}", loss_value, grad_norm);

        Ok(Some(MinibatchStats {
            policy_loss: policy_loss.to_scalar::<f32>()?,
            value_loss: value_loss.to_scalar::<f32>()?,
            entropy: entropy.to_scalar::<f32>()?,
            approx_kl,
            clip_fraction,
        }))
    }

    /// Number of steps in the current trajectory.
    pub fn trajectory_len(&self) -> usize {
        self.trajectory.len()
    }

    /// Number of completed updates.
    pub fn n_updates(&self) -> usize {
        self.n_updates
    }

    /// The networks.
    pub fn model(&self) -> &PpoModel<P, V> {
        &self.model
    }

    /// The configuration the agent was built with.
    pub fn config(&self) -> &PpoConfig<P::Config, V::Config> {
        &self.config
    }
}

fn first(actions: Vec<PpoAction>) -> Result<PpoAction> {
    actions
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No action in the batch"))
}

impl<E, P, V> Configurable for Ppo<E, P, V>
where
    E: Env,
    P: SubModel1<Input = Tensor, Output = PolicyDist>,
    V: SubModel1<Input = Tensor, Output = Tensor>,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    V::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    type Config = PpoConfig<P::Config, V::Config>;

    /// Constructs PPO agent.
    fn build(config: Self::Config) -> Result<Self> {
        config.validate()?;
        let device: Device = config.device.unwrap_or_default().try_into()?;
        let model = PpoModel::build(config.model_config.clone(), &device)?;
        let rng = SmallRng::seed_from_u64(config.seed);

        Ok(Self {
            train: config.train,
            config,
            model,
            trajectory: Trajectory::new(),
            n_updates: 0,
            device,
            rng,
            phantom: PhantomData,
        })
    }
}

impl<E, P, V> Policy<E> for Ppo<E, P, V>
where
    E: Env,
    E::Obs: Into<Vec<f32>>,
    E::Act: TryFrom<PpoAction, Error = KeelError>,
    P: SubModel1<Input = Tensor, Output = PolicyDist>,
    V: SubModel1<Input = Tensor, Output = Tensor>,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    V::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    fn sample(&mut self, obs: &E::Obs) -> Result<E::Act> {
        let state: Vec<f32> = obs.clone().into();
        let action = self.select_action(&state, self.train)?;
        Ok(E::Act::try_from(action)?)
    }
}

impl<E, P, V> Agent<E> for Ppo<E, P, V>
where
    E: Env,
    E::Obs: Into<Vec<f32>>,
    E::Act: TryFrom<PpoAction, Error = KeelError>,
    P: SubModel1<Input = Tensor, Output = PolicyDist>,
    V: SubModel1<Input = Tensor, Output = Tensor>,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    V::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }

    /// Truncated episodes are treated as terminated.
    fn observe(&mut self, _obs: &E::Obs, step: &Step<E>) -> Result<()> {
        self.store_reward(step.reward, step.is_done())
    }

    fn opt_with_record(&mut self) -> Result<Option<Record>> {
        if !self.is_ready_to_update() {
            return Ok(None);
        }
        Ok(Some(self.update()?.into()))
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        self.model.save(path)?;
        let state = PpoState {
            n_updates: self.n_updates,
        };
        let mut file = File::create(path.join("state.yaml"))?;
        file.write_all(serde_yaml::to_string(&state)?.as_bytes())?;
        self.config.save(path.join("config.yaml"))?;
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        self.model.load(path)?;
        let rdr = BufReader::new(File::open(path.join("state.yaml"))?);
        let state: PpoState = serde_yaml::from_reader(rdr)?;
        self.n_updates = state.n_updates;
        Ok(())
    }
}

impl<E, P, V> SyncModel for Ppo<E, P, V>
where
    E: Env,
    P: SubModel1<Input = Tensor, Output = PolicyDist>,
    V: SubModel1<Input = Tensor, Output = Tensor>,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    V::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    /// Snapshots of the policy and value networks.
    type ModelInfo = (NamedTensors, NamedTensors);

    fn model_info(&self) -> Result<(usize, Self::ModelInfo)> {
        Ok((
            self.n_updates,
            (
                NamedTensors::copy_from(self.model.actor_varmap())?,
                NamedTensors::copy_from(self.model.critic_varmap())?,
            ),
        ))
    }

    fn sync_model(&mut self, model_info: &Self::ModelInfo) -> Result<()> {
        model_info.0.copy_to(self.model.actor_varmap())?;
        model_info.1.copy_to(self.model.critic_varmap())
    }
}
