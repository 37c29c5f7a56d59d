use anyhow::{anyhow, Result};
use candle_core::Tensor;
use keel_candle_agent::{
    dqn::{Dqn, DqnConfig, DqnModelConfig},
    mlp::{DuelingMlp, DuelingMlpConfig, Mlp, MlpConfig},
    model::SubModel1,
    opt::OptimizerConfig,
    util::OutDim,
};
use keel_core::{
    dummy::{TwoStateMdp, TwoStateMdpConfig},
    record::BufferedRecorder,
    replay_buffer::{PerConfig, ReplayBufferConfig},
    target_sync::TargetSync,
    Agent, Configurable, DefaultEvaluator, Env, SyncModel, Trainer, TrainerConfig,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
    thread,
};
use tempdir::TempDir;

const WARMUP: usize = 100;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn base_config<Q: OutDim + Serialize + DeserializeOwned>(q_config: Q) -> DqnConfig<Q> {
    DqnConfig {
        model_config: DqnModelConfig::default()
            .q_config(q_config)
            .opt_config(OptimizerConfig::Adam { lr: 5e-3 }),
        replay_buffer_config: ReplayBufferConfig::default().capacity(1000),
        target_sync: TargetSync::Hard { interval: 20 },
        batch_size: 32,
        min_transitions_warmup: WARMUP,
        discount_factor: 0.5,
        ..DqnConfig::default()
    }
}

fn mlp_config() -> DqnConfig<MlpConfig> {
    base_config(MlpConfig::new(2, vec![32], 2, false))
}

/// Acts with epsilon-greedy exploration and stores the transition.
fn env_step<Q>(agent: &mut Dqn<TwoStateMdp, Q>, env: &mut TwoStateMdp, obs: &mut Vec<f32>) -> Result<()>
where
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    let a = agent.select_action(obs, true)?;
    let (step, _) = env.step(&a)?;
    agent.remember(obs.clone(), a, step.reward, step.obs.clone(), step.is_terminated)?;
    *obs = if step.is_done() { env.reset()? } else { step.obs };
    Ok(())
}

/// Fills the buffer up to the warmup size, then runs `n` training steps, one per environment step.
fn run<Q>(agent: &mut Dqn<TwoStateMdp, Q>, n: usize) -> Result<()>
where
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    let mut env = TwoStateMdp::build(&TwoStateMdpConfig::default(), 0)?;
    let mut obs = env.reset()?;

    while agent.buffer().len() < WARMUP {
        env_step(agent, &mut env, &mut obs)?;
    }
    for _ in 0..n {
        env_step(agent, &mut env, &mut obs)?;
        let stats = agent.train_step()?;
        assert!(!stats.skipped);
    }
    Ok(())
}

fn assert_greedy_optimal<Q>(agent: &mut Dqn<TwoStateMdp, Q>) -> Result<()>
where
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    for s in 0..2 {
        let a = agent.select_action(&TwoStateMdp::obs(s), false)?;
        assert_eq!(a, TwoStateMdp::optimal_action(s), "q = {:?}", agent.q_values(&TwoStateMdp::obs(s))?);
    }
    Ok(())
}

#[test]
fn test_dqn_converges_on_toy_mdp() -> Result<()> {
    init_logger();
    let mut agent = Dqn::<TwoStateMdp, Mlp>::build(mlp_config())?;
    run(&mut agent, 1000)?;
    assert_eq!(agent.training_steps(), 1000);
    assert_greedy_optimal(&mut agent)
}

#[test]
fn test_prioritized_double_dueling_n_step_converges() -> Result<()> {
    init_logger();
    let config = base_config(DuelingMlpConfig::new(2, vec![32], 2))
        .replay_buffer_config(
            ReplayBufferConfig::default()
                .capacity(1000)
                .per_config(Some(PerConfig::default())),
        )
        .double_dqn(true)
        .n_step(3)
        .target_sync(TargetSync::Soft { tau: 0.05 });
    let mut agent = Dqn::<TwoStateMdp, DuelingMlp>::build(config)?;
    run(&mut agent, 1000)?;
    assert_greedy_optimal(&mut agent)?;

    let buffer = agent.buffer();
    assert!(buffer.beta().unwrap() > PerConfig::default().beta);
    for ix in 0..buffer.len() {
        assert!(buffer.priority(ix).unwrap() > 0.0);
    }
    Ok(())
}

#[test]
fn test_epsilon_decay_per_train_step() -> Result<()> {
    let mut agent = Dqn::<TwoStateMdp, Mlp>::build(mlp_config())?;
    for n in [1, 50, 200] {
        agent.reset();
        run(&mut agent, n)?;
        let expected = 0.995f32.powi(n as i32).max(0.01);
        assert!((agent.epsilon() - expected).abs() < 1e-4);
    }

    agent.reset();
    run(&mut agent, 1000)?;
    assert!((agent.epsilon() - 0.01).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_save_and_load() -> Result<()> {
    let mut agent = Dqn::<TwoStateMdp, Mlp>::build(mlp_config())?;
    run(&mut agent, 50)?;

    let dir = TempDir::new("dqn")?;
    agent.save_params(dir.path())?;
    for file in ["qnet.safetensors", "qnet_tgt.safetensors", "state.yaml", "config.yaml"] {
        assert!(dir.path().join(file).exists());
    }

    let mut agent_ = Dqn::<TwoStateMdp, Mlp>::build(mlp_config().seed(1))?;
    agent_.load_params(dir.path())?;
    assert_eq!(agent_.training_steps(), 50);
    assert!((agent_.epsilon() - agent.epsilon()).abs() < 1e-7);
    for s in 0..2 {
        let obs = TwoStateMdp::obs(s);
        assert_eq!(agent.q_values(&obs)?, agent_.q_values(&obs)?);
    }
    assert_eq!(DqnConfig::<MlpConfig>::load(dir.path().join("config.yaml"))?, mlp_config());
    Ok(())
}

#[test]
fn test_trainer_with_dqn() -> Result<()> {
    init_logger();
    let dir = TempDir::new("dqn_trainer")?;
    let env_config = TwoStateMdpConfig::default();
    let config = TrainerConfig::default()
        .max_opts(1000)
        .eval_interval(500)
        .flush_record_interval(500)
        .model_dir(dir.path().to_string_lossy());
    let mut trainer = Trainer::<TwoStateMdp>::build(config, env_config.clone())?;
    let mut agent = Dqn::<TwoStateMdp, Mlp>::build(mlp_config())?;
    let mut recorder = BufferedRecorder::new();
    let mut evaluator = DefaultEvaluator::<TwoStateMdp>::new(&env_config, 0, 2)?;

    trainer.train(&mut agent, &mut recorder, &mut evaluator)?;

    assert_eq!(agent.training_steps(), 1000);
    let flushed = recorder.flushed();
    assert_eq!(flushed.len(), 2);
    assert_eq!(flushed[1].0, 1000);
    assert_eq!(flushed[1].1.get_scalar("eval_reward")?, 10.0);
    assert!(dir.path().join("best").join("qnet.safetensors").exists());
    Ok(())
}

#[test]
fn test_workers_share_a_learner() -> Result<()> {
    const N_WORKERS: usize = 2;
    const N_STEPS: usize = 200;
    let learner = Arc::new(Mutex::new(Dqn::<TwoStateMdp, Mlp>::build(mlp_config())?));

    let handles = (0..N_WORKERS)
        .map(|i| {
            let learner = Arc::clone(&learner);
            thread::spawn(move || -> Result<()> {
                let mut worker = Dqn::<TwoStateMdp, Mlp>::build(mlp_config().seed(i as u64 + 1))?;
                let mut env = TwoStateMdp::build(&TwoStateMdpConfig::default(), i as i64)?;
                let mut obs = env.reset()?;
                for _ in 0..N_STEPS {
                    let a = worker.select_action(&obs, true)?;
                    let (step, _) = env.step(&a)?;
                    {
                        let mut learner = learner.lock().map_err(|_| anyhow!("learner lock is poisoned"))?;
                        learner.remember(obs.clone(), a, step.reward, step.obs.clone(), step.is_terminated)?;
                        learner.train_step()?;
                        let (_, info) = learner.model_info()?;
                        worker.sync_model(&info)?;
                    }
                    obs = if step.is_done() { env.reset()? } else { step.obs };
                }
                Ok(())
            })
        })
        .collect::<Vec<_>>();
    for h in handles {
        h.join().map_err(|_| anyhow!("worker panicked"))??;
    }

    let learner = learner.lock().unwrap();
    let n = N_WORKERS * N_STEPS;
    assert_eq!(learner.buffer().len(), n);
    // training starts with the transition that completes the warmup
    assert_eq!(learner.training_steps(), n - WARMUP + 1);
    Ok(())
}
