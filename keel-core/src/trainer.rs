//! Train [`Agent`].
mod config;
mod sampler;
use crate::{
    record::{AggregateRecorder, Record, RecordValue::Scalar},
    Agent, Env, Evaluator,
};
use anyhow::Result;
pub use config::TrainerConfig;
use log::{info, warn};
pub use sampler::Sampler;
use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

/// Manages training loop and related objects.
///
/// # Training loop
///
/// 1. Build the environment and reset the counters `env_steps = 0`, `opt_steps = 0`.
/// 2. Do an environment step with [`Sampler`]; the agent observes the resulting
///    [`Step`](crate::Step) with [`Agent::observe`]. `env_steps += 1`.
/// 3. If `env_steps >= warmup_period` and `env_steps % opt_interval == 0`, call
///    [`Agent::opt_with_record`]. The agent may decline to optimize, e.g. while its
///    replay buffer or trajectory is too short; otherwise `opt_steps += 1` and:
///     1. If `opt_steps % eval_interval == 0`, evaluate the agent and record the result
///        as `"eval_reward"`. If it is the best so far, save the parameters in
///        `(model_dir)/best`.
///     2. If `opt_steps % record_compute_cost_interval == 0`, record
///        `"opt_steps_per_sec"`.
///     3. If `opt_steps % save_interval == 0`, save the parameters in
///        `(model_dir)/(opt_steps)`.
///     4. If `opt_steps % flush_record_interval == 0`, flush the recorder.
///     5. If `opt_steps == max_opts`, finish training.
/// 4. Back to step 2.
pub struct Trainer<E: Env> {
    env_config_train: E::Config,
    config: TrainerConfig,

    /// Optimization steps for computing optimization steps per second.
    opt_steps_for_ops: usize,

    /// Timer for computing for optimization steps per second.
    timer_for_ops: Duration,
}

impl<E: Env> Trainer<E> {
    /// Constructs a trainer.
    pub fn build(config: TrainerConfig, env_config_train: E::Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            env_config_train,
            config,
            opt_steps_for_ops: 0,
            timer_for_ops: Duration::new(0, 0),
        })
    }

    fn save_model<A: Agent<E>>(agent: &A, model_dir: &Path) {
        match agent.save_params(model_dir) {
            Ok(()) => info!("Saved the model in {:?}.", model_dir),
            Err(e) => warn!("Failed to save model in {:?}: {}", model_dir, e),
        }
    }

    fn model_dir(&self) -> Option<PathBuf> {
        self.config.model_dir.as_ref().map(PathBuf::from)
    }

    /// Returns optimization steps per second, then reset the internal counter.
    fn opt_steps_per_sec(&mut self) -> f32 {
        let secs = self.timer_for_ops.as_secs_f32().max(f32::EPSILON);
        let osps = self.opt_steps_for_ops as f32 / secs;
        self.opt_steps_for_ops = 0;
        self.timer_for_ops = Duration::new(0, 0);
        osps
    }

    /// Performs a training step.
    ///
    /// First, it performs an environment step. Then, if the number of environment steps
    /// reaches the optimization interval `opt_interval`, asks the agent for an
    /// optimization step.
    ///
    /// The second return value in the tuple is if an optimization step is done (`true`).
    pub fn train_step<A: Agent<E>>(
        &mut self,
        agent: &mut A,
        sampler: &mut Sampler<E>,
        env_steps: &mut usize,
        opt_steps: &mut usize,
    ) -> Result<(Record, bool)> {
        let record = sampler.sample_and_observe(agent)?;
        *env_steps += 1;

        if *env_steps < self.config.warmup_period || *env_steps % self.config.opt_interval != 0 {
            return Ok((record, false));
        }

        let timer = SystemTime::now();
        match agent.opt_with_record()? {
            Some(record_agent) => {
                *opt_steps += 1;
                self.timer_for_ops += timer.elapsed()?;
                self.opt_steps_for_ops += 1;
                Ok((record.merge(record_agent), true))
            }
            None => Ok((record, false)),
        }
    }

    /// Train the agent.
    pub fn train<A, D>(
        &mut self,
        agent: &mut A,
        recorder: &mut dyn AggregateRecorder,
        evaluator: &mut D,
    ) -> Result<()>
    where
        A: Agent<E>,
        D: Evaluator<E>,
    {
        let env = E::build(&self.env_config_train, 0)?;
        let mut sampler = Sampler::new(env);
        let mut max_eval_reward = f32::MIN;
        let mut env_steps: usize = 0;
        let mut opt_steps: usize = 0;
        agent.train();

        if self.config.max_opts == 0 {
            return Ok(());
        }

        loop {
            let (mut record, is_opt) =
                self.train_step(agent, &mut sampler, &mut env_steps, &mut opt_steps)?;

            if is_opt {
                if opt_steps % self.config.record_compute_cost_interval == 0 {
                    record.insert("opt_steps_per_sec", Scalar(self.opt_steps_per_sec()));
                }

                if opt_steps % self.config.eval_interval == 0 {
                    info!("Starts evaluation of the trained model");
                    agent.eval();
                    let eval_reward = evaluator.evaluate(agent)?.get_scalar("Episode return")?;
                    agent.train();
                    record.insert("eval_reward", Scalar(eval_reward));

                    if eval_reward > max_eval_reward {
                        max_eval_reward = eval_reward;
                        if let Some(model_dir) = self.model_dir() {
                            Self::save_model(agent, &model_dir.join("best"));
                        }
                    }
                }

                if opt_steps % self.config.save_interval == 0 {
                    if let Some(model_dir) = self.model_dir() {
                        Self::save_model(agent, &model_dir.join(opt_steps.to_string()));
                    }
                }
            }

            if !record.is_empty() {
                recorder.store(record);
            }

            if is_opt && opt_steps % self.config.flush_record_interval == 0 {
                recorder.flush(opt_steps as _);
            }

            if is_opt && opt_steps == self.config.max_opts {
                break;
            }
        }

        recorder.flush(opt_steps as _);
        Ok(())
    }
}
