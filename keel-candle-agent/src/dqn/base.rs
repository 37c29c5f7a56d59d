//! DQN agent implemented with candle.
use super::{config::DqnConfig, explorer::EpsilonGreedy, model::DqnModel};
use crate::{
    model::SubModel1,
    util::{argmax_first, hard_sync, rows_to_tensor, soft_sync, NamedTensors, OutDim},
};
use anyhow::Result;
use candle_core::{shape::D, DType, Device, Tensor};
use keel_core::{
    error::KeelError,
    record::{Record, RecordValue},
    replay_buffer::{Experience, NStepProcessor, ReplayBuffer},
    target_sync::SyncAction,
    Agent, Configurable, Env, Policy, Step, SyncModel,
};
use log::{debug, info, trace, warn};
use rand::{rngs::SmallRng, SeedableRng};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufReader, Write},
    marker::PhantomData,
    path::Path,
};

/// Metrics of a training step of [`Dqn`].
///
/// The default value is returned when the replay buffer does not hold enough
/// transitions for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DqnStats {
    /// Loss of the action-value function.
    pub loss: f32,

    /// Mean of the predicted action values of the batch.
    pub mean_q: f32,

    /// Epsilon after the step.
    pub epsilon: f32,

    /// Number of completed training steps.
    pub training_steps: usize,

    /// `true` if the loss was not finite and parameters were left untouched.
    pub skipped: bool,
}

impl From<DqnStats> for Record {
    fn from(stats: DqnStats) -> Self {
        Record::from_slice(&[
            ("loss_critic", RecordValue::Scalar(stats.loss)),
            ("mean_q", RecordValue::Scalar(stats.mean_q)),
            ("epsilon", RecordValue::Scalar(stats.epsilon)),
            (
                "training_steps",
                RecordValue::Scalar(stats.training_steps as f32),
            ),
            (
                "skipped",
                RecordValue::Scalar(if stats.skipped { 1.0 } else { 0.0 }),
            ),
        ])
    }
}

/// Counters restored together with the parameters.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
struct DqnState {
    epsilon: f32,
    training_steps: usize,
}

#[allow(clippy::upper_case_acronyms)]
/// DQN agent implemented with candle.
///
/// Observations are flat `f32` vectors and actions are indices in `0..n_actions`,
/// where `n_actions` is the output dimension of the action-value network.
pub struct Dqn<E, Q>
where
    E: Env,
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + std::fmt::Debug + PartialEq + Clone,
{
    config: DqnConfig<Q::Config>,
    qnet: DqnModel<Q>,
    qnet_tgt: DqnModel<Q>,
    buffer: ReplayBuffer<Vec<f32>, usize>,
    n_step: NStepProcessor<Vec<f32>, usize>,
    explorer: EpsilonGreedy,
    n_actions: usize,
    training_steps: usize,
    train: bool,
    device: Device,
    rng: SmallRng,
    phantom: PhantomData<E>,
}

fn q_values<Q>(qnet: &DqnModel<Q>, device: &Device, state: &[f32]) -> Result<Vec<f32>>
where
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + Clone,
{
    let obs = Tensor::from_slice(state, (1, state.len()), device)?;
    let q = qnet.forward(&obs)?.detach();
    Ok(q.squeeze(0)?.to_vec1::<f32>()?)
}

impl<E, Q> Dqn<E, Q>
where
    E: Env,
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + std::fmt::Debug + PartialEq + Clone,
{
    /// Action values of the online network for a single state.
    pub fn q_values(&self, state: &[f32]) -> Result<Vec<f32>> {
        q_values(&self.qnet, &self.device, state)
    }

    /// Selects an action.
    ///
    /// In training mode a uniformly random action is taken with probability epsilon.
    /// Otherwise the action with the largest value is taken, the first one on ties.
    /// The online network is evaluated once and without gradient tracking.
    pub fn select_action(&mut self, state: &[f32], training: bool) -> Result<usize> {
        if training {
            let (qnet, device) = (&self.qnet, &self.device);
            self.explorer
                .action(self.n_actions, &mut self.rng, || q_values(qnet, device, state))
        } else {
            Ok(argmax_first(&self.q_values(state)?))
        }
    }

    /// Stores a transition in the replay buffer.
    ///
    /// With n-step returns the transition goes through the n-step window first and
    /// the synthesized transitions are stored instead.
    pub fn remember(
        &mut self,
        state: Vec<f32>,
        action: usize,
        reward: f32,
        next_state: Vec<f32>,
        done: bool,
    ) -> Result<()> {
        if action >= self.n_actions {
            return Err(KeelError::ActionSpaceMismatch(format!(
                "action {} for {} actions",
                action, self.n_actions
            ))
            .into());
        }
        let exp = Experience::new(state, action, reward, next_state, done);
        for exp in self.n_step.push(exp) {
            self.buffer.push(exp);
        }
        Ok(())
    }

    /// Discards the pending n-step window, for episodes cut without a terminal state.
    pub fn discard_pending(&mut self) {
        if self.n_step.pending() > 0 {
            trace!("Discard {} pending n-step transitions", self.n_step.pending());
        }
        self.n_step.reset();
    }

    fn required_transitions(&self) -> usize {
        self.config.batch_size.max(self.config.min_transitions_warmup)
    }

    /// Bootstrapped targets, detached from the graph.
    fn targets(&self, next_obs: &Tensor, reward: &Tensor, not_done: &Tensor) -> Result<Tensor> {
        let gamma = (self.config.discount_factor as f64).powi(self.config.n_step as i32);
        let q_next = if self.config.double_dqn {
            let a = self
                .qnet
                .forward(next_obs)?
                .detach()
                .argmax_keepdim(D::Minus1)?
                .to_dtype(DType::I64)?;
            self.qnet_tgt
                .forward(next_obs)?
                .detach()
                .gather(&a, D::Minus1)?
                .squeeze(D::Minus1)?
        } else {
            self.qnet_tgt.forward(next_obs)?.detach().max(D::Minus1)?
        };
        Ok((reward + (not_done * q_next)?.affine(gamma, 0.)?)?.detach())
    }

    /// Performs a training step on a batch sampled from the replay buffer.
    ///
    /// Returns [`DqnStats::default()`] without touching anything if the buffer holds
    /// fewer than `max(batch_size, min_transitions_warmup)` transitions. If the loss
    /// is not finite, parameters, priorities, counters, epsilon and the importance
    /// sampling exponent are left as they are and the returned stats are marked as skipped.
    pub fn train_step(&mut self) -> Result<DqnStats> {
        if self.buffer.len() < self.required_transitions() {
            return Ok(DqnStats::default());
        }

        let beta = self.buffer.beta();
        let batch = self.buffer.sample(self.config.batch_size);
        let n = batch.len();
        let obs = {
            let rows = batch
                .experiences
                .iter()
                .map(|e| e.state.as_slice())
                .collect::<Vec<_>>();
            rows_to_tensor(&rows, &self.device)?
        };
        let next_obs = {
            let rows = batch
                .experiences
                .iter()
                .map(|e| e.next_state.as_slice())
                .collect::<Vec<_>>();
            rows_to_tensor(&rows, &self.device)?
        };
        let act = {
            let act = batch
                .experiences
                .iter()
                .map(|e| e.action as i64)
                .collect::<Vec<_>>();
            Tensor::from_vec(act, (n, 1), &self.device)?
        };
        let reward = Tensor::from_vec(batch.rewards(), n, &self.device)?;
        let not_done = {
            let not_done = batch.dones().iter().map(|d| 1.0 - d).collect::<Vec<_>>();
            Tensor::from_vec(not_done, n, &self.device)?
        };

        let pred = self
            .qnet
            .forward(&obs)?
            .gather(&act, D::Minus1)?
            .squeeze(D::Minus1)?;
        let tgt = self.targets(&next_obs, &reward, &not_done)?;
        let losses = self.config.critic_loss.elementwise(&pred, &tgt)?;
        let loss = match &batch.weights {
            Some(ws) => (losses * Tensor::from_slice(ws, n, &self.device)?)?.mean_all()?,
            None => losses.mean_all()?,
        };

        let loss_value = loss.to_scalar::<f32>()?;
        let mean_q = pred.detach().mean_all()?.to_scalar::<f32>()?;
        if !loss_value.is_finite() {
            warn!(
                "Skip training step {}: loss is {}",
                self.training_steps + 1,
                loss_value
            );
            if let Some(beta) = beta {
                self.buffer.set_beta(beta);
            }
            return Ok(DqnStats {
                loss: loss_value,
                mean_q,
                epsilon: self.explorer.eps(),
                training_steps: self.training_steps,
                skipped: true,
            });
        }

        self.qnet.backward_step(&loss)?;

        if self.buffer.is_prioritized() {
            let td_errs = (pred.detach() - &tgt)?.abs()?.to_vec1::<f32>()?;
            self.buffer.update_priorities(&batch.indices, &td_errs)?;
        }

        self.training_steps += 1;
        match self.config.target_sync.action(self.training_steps) {
            Some(SyncAction::Copy) => {
                hard_sync(self.qnet_tgt.get_varmap(), self.qnet.get_varmap())?;
                info!("Hard sync of the target network at step {}", self.training_steps);
            }
            Some(SyncAction::Blend(tau)) => {
                soft_sync(self.qnet_tgt.get_varmap(), self.qnet.get_varmap(), tau as f64)?;
            }
            None => {}
        }

        let epsilon = self.explorer.step();
        debug!(
            "step {}: loss = {}, mean_q = {}, epsilon = {}",
            self.training_steps, loss_value, mean_q, epsilon
        );

        Ok(DqnStats {
            loss: loss_value,
            mean_q,
            epsilon,
            training_steps: self.training_steps,
            skipped: false,
        })
    }

    /// Clears the replay buffer, restores the initial epsilon and zeroes the step counter.
    ///
    /// Network parameters are kept.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.n_step.reset();
        self.explorer.reset();
        self.training_steps = 0;
    }

    /// Current epsilon.
    pub fn epsilon(&self) -> f32 {
        self.explorer.eps()
    }

    /// Number of completed training steps.
    pub fn training_steps(&self) -> usize {
        self.training_steps
    }

    /// Number of actions.
    pub fn n_actions(&self) -> usize {
        self.n_actions
    }

    /// The replay buffer.
    pub fn buffer(&self) -> &ReplayBuffer<Vec<f32>, usize> {
        &self.buffer
    }

    /// The online network.
    pub fn qnet(&self) -> &DqnModel<Q> {
        &self.qnet
    }

    /// The target network.
    pub fn qnet_tgt(&self) -> &DqnModel<Q> {
        &self.qnet_tgt
    }

    /// The configuration the agent was built with.
    pub fn config(&self) -> &DqnConfig<Q::Config> {
        &self.config
    }
}

impl<E, Q> Configurable for Dqn<E, Q>
where
    E: Env,
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + std::fmt::Debug + PartialEq + Clone,
{
    type Config = DqnConfig<Q::Config>;

    /// Constructs DQN agent.
    ///
    /// The target network starts as an exact copy of the online network.
    fn build(config: Self::Config) -> Result<Self> {
        config.validate()?;
        let device: Device = config.device.unwrap_or_default().try_into()?;
        let qnet = DqnModel::build(config.model_config.clone(), &device)?;
        let qnet_tgt = DqnModel::build(config.model_config.clone(), &device)?;
        hard_sync(qnet_tgt.get_varmap(), qnet.get_varmap())?;

        let n_actions = qnet.out_dim();
        let buffer = ReplayBuffer::build(&config.replay_buffer_config)?;
        let n_step = NStepProcessor::new(config.n_step, config.discount_factor)?;
        let explorer = EpsilonGreedy::new(&config.explorer_config)?;
        let rng = SmallRng::seed_from_u64(config.seed);

        Ok(Dqn {
            train: config.train,
            config,
            qnet,
            qnet_tgt,
            buffer,
            n_step,
            explorer,
            n_actions,
            training_steps: 0,
            device,
            rng,
            phantom: PhantomData,
        })
    }
}

impl<E, Q> Policy<E> for Dqn<E, Q>
where
    E: Env,
    E::Obs: Into<Vec<f32>>,
    E::Act: From<usize>,
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + std::fmt::Debug + PartialEq + Clone,
{
    fn sample(&mut self, obs: &E::Obs) -> Result<E::Act> {
        let state: Vec<f32> = obs.clone().into();
        let a = self.select_action(&state, self.train)?;
        Ok(a.into())
    }
}

impl<E, Q> Agent<E> for Dqn<E, Q>
where
    E: Env,
    E::Obs: Into<Vec<f32>>,
    E::Act: From<usize> + Into<usize>,
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + std::fmt::Debug + PartialEq + Clone,
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

    fn observe(&mut self, obs: &E::Obs, step: &Step<E>) -> Result<()> {
        let state: Vec<f32> = obs.clone().into();
        let next_state: Vec<f32> = step.obs.clone().into();
        self.remember(
            state,
            step.act.clone().into(),
            step.reward,
            next_state,
            step.is_terminated,
        )?;
        if step.is_truncated && !step.is_terminated {
            self.discard_pending();
        }
        Ok(())
    }

    fn opt_with_record(&mut self) -> Result<Option<Record>> {
        if self.buffer.len() < self.required_transitions() {
            return Ok(None);
        }
        Ok(Some(self.train_step()?.into()))
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        self.qnet.save(path.join("qnet.safetensors"))?;
        self.qnet_tgt.save(path.join("qnet_tgt.safetensors"))?;
        let state = DqnState {
            epsilon: self.explorer.eps(),
            training_steps: self.training_steps,
        };
        let mut file = File::create(path.join("state.yaml"))?;
        file.write_all(serde_yaml::to_string(&state)?.as_bytes())?;
        self.config.save(path.join("config.yaml"))?;
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        self.qnet.load(path.join("qnet.safetensors"))?;
        self.qnet_tgt.load(path.join("qnet_tgt.safetensors"))?;
        let rdr = BufReader::new(File::open(path.join("state.yaml"))?);
        let state: DqnState = serde_yaml::from_reader(rdr)?;
        self.explorer.set_eps(state.epsilon);
        self.training_steps = state.training_steps;
        Ok(())
    }
}

impl<E, Q> SyncModel for Dqn<E, Q>
where
    E: Env,
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + std::fmt::Debug + PartialEq + Clone,
{
    type ModelInfo = NamedTensors;

    fn model_info(&self) -> Result<(usize, Self::ModelInfo)> {
        Ok((
            self.training_steps,
            NamedTensors::copy_from(self.qnet.get_varmap())?,
        ))
    }

    fn sync_model(&mut self, model_info: &Self::ModelInfo) -> Result<()> {
        model_info.copy_to(self.qnet.get_varmap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dqn::DqnModelConfig, mlp::Mlp, mlp::MlpConfig};
    use keel_core::{
        dummy::TwoStateMdp,
        replay_buffer::{PerConfig, ReplayBufferConfig},
    };
    use rand::Rng;

    type Agent_ = Dqn<TwoStateMdp, Mlp>;

    fn config() -> DqnConfig<MlpConfig> {
        DqnConfig::default()
            .model_config(DqnModelConfig::default().q_config(MlpConfig::new(2, vec![16], 2, false)))
            .batch_size(16)
            .replay_buffer_config(ReplayBufferConfig::default().capacity(100))
    }

    fn fill(agent: &mut Agent_, n: usize) -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..n {
            let s = vec![rng.gen::<f32>(), rng.gen::<f32>()];
            let s_ = vec![rng.gen::<f32>(), rng.gen::<f32>()];
            agent.remember(s, rng.gen_range(0..2), rng.gen(), s_, rng.gen_bool(0.1))?;
        }
        Ok(())
    }

    #[test]
    fn test_target_is_copy_at_construction() -> Result<()> {
        let agent = Agent_::build(config())?;
        let online = NamedTensors::copy_from(agent.qnet.get_varmap())?;
        let target = NamedTensors::copy_from(agent.qnet_tgt.get_varmap())?;
        for (k, v) in online.named_tensors.iter() {
            let diff = (v - &target.named_tensors[k])?.abs()?.sum_all()?.to_scalar::<f32>()?;
            assert_eq!(diff, 0.0);
        }
        Ok(())
    }

    #[test]
    fn test_double_dqn_target_equals_standard_with_identical_params() -> Result<()> {
        let mut agent = Agent_::build(config())?;
        fill(&mut agent, 50)?;
        let batch = agent.buffer.sample(16);
        let rows = batch
            .experiences
            .iter()
            .map(|e| e.next_state.as_slice())
            .collect::<Vec<_>>();
        let next_obs = rows_to_tensor(&rows, &Device::Cpu)?;
        let reward = Tensor::from_vec(batch.rewards(), 16, &Device::Cpu)?;
        let not_done = Tensor::from_vec(
            batch.dones().iter().map(|d| 1.0 - d).collect::<Vec<_>>(),
            16,
            &Device::Cpu,
        )?;

        agent.config.double_dqn = false;
        let standard = agent.targets(&next_obs, &reward, &not_done)?.to_vec1::<f32>()?;
        agent.config.double_dqn = true;
        let double = agent.targets(&next_obs, &reward, &not_done)?.to_vec1::<f32>()?;
        for (x, y) in standard.iter().zip(double.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_insufficient_data_is_a_noop() -> Result<()> {
        let mut agent = Agent_::build(config())?;
        fill(&mut agent, 15)?;
        let eps = agent.epsilon();
        assert_eq!(agent.train_step()?, DqnStats::default());
        assert_eq!(agent.epsilon(), eps);
        assert_eq!(agent.training_steps(), 0);
        assert!(Agent::<TwoStateMdp>::opt_with_record(&mut agent)?.is_none());
        Ok(())
    }

    #[test]
    fn test_non_finite_loss_is_skipped() -> Result<()> {
        let mut agent = Agent_::build(config())?;
        for _ in 0..16 {
            agent.remember(vec![1.0, 0.0], 0, f32::NAN, vec![0.0, 1.0], false)?;
        }
        let before = NamedTensors::copy_from(agent.qnet.get_varmap())?;
        let stats = agent.train_step()?;
        assert!(stats.skipped);
        assert_eq!(agent.training_steps(), 0);
        assert_eq!(agent.epsilon(), 1.0);

        let after = NamedTensors::copy_from(agent.qnet.get_varmap())?;
        for (k, v) in before.named_tensors.iter() {
            let diff = (v - &after.named_tensors[k])?.abs()?.sum_all()?.to_scalar::<f32>()?;
            assert_eq!(diff, 0.0);
        }
        Ok(())
    }

    #[test]
    fn test_skipped_step_keeps_beta() -> Result<()> {
        let config = config().replay_buffer_config(
            ReplayBufferConfig::default()
                .capacity(100)
                .per_config(Some(PerConfig::default())),
        );
        let mut agent = Agent_::build(config)?;
        for _ in 0..16 {
            agent.remember(vec![1.0, 0.0], 0, f32::NAN, vec![0.0, 1.0], false)?;
        }
        let beta = agent.buffer().beta();
        assert!(beta.is_some());
        assert!(agent.train_step()?.skipped);
        assert_eq!(agent.buffer().beta(), beta);
        Ok(())
    }

    #[test]
    fn test_zero_actions_is_rejected() {
        let config = config()
            .model_config(DqnModelConfig::default().q_config(MlpConfig::new(2, vec![4], 0, false)));
        let err = match Agent_::build(config) {
            Ok(_) => panic!("built an agent without actions"),
            Err(e) => e,
        };
        assert!(matches!(
            err.downcast_ref::<KeelError>(),
            Some(KeelError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_reset() -> Result<()> {
        let mut agent = Agent_::build(config())?;
        fill(&mut agent, 40)?;
        for _ in 0..5 {
            agent.train_step()?;
        }
        assert!(agent.epsilon() < 1.0);
        agent.reset();
        assert_eq!(agent.buffer().len(), 0);
        assert_eq!(agent.epsilon(), 1.0);
        assert_eq!(agent.training_steps(), 0);
        Ok(())
    }

    #[test]
    fn test_remember_rejects_unknown_action() -> Result<()> {
        let mut agent = Agent_::build(config())?;
        let err = agent
            .remember(vec![1.0, 0.0], 2, 0.0, vec![0.0, 1.0], false)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KeelError>(),
            Some(KeelError::ActionSpaceMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_sync_model() -> Result<()> {
        let mut learner = Agent_::build(config())?;
        let mut worker = Agent_::build(config().seed(7))?;
        fill(&mut learner, 40)?;
        for _ in 0..3 {
            learner.train_step()?;
        }

        let (n_opts, info) = learner.model_info()?;
        assert_eq!(n_opts, 3);
        worker.sync_model(&info)?;
        for s in [[1f32, 0.], [0., 1.]] {
            assert_eq!(learner.q_values(&s)?, worker.q_values(&s)?);
        }
        Ok(())
    }
}
