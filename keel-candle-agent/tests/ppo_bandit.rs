use anyhow::Result;
use keel_candle_agent::{
    mlp::{Mlp, MlpConfig, PolicyHead, PolicyMlp, PolicyMlpConfig},
    opt::OptimizerConfig,
    ppo::{Ppo, PpoAction, PpoConfig, PpoModelConfig},
};
use keel_core::{
    record::{BufferedRecorder, Record},
    Agent, Configurable, DefaultEvaluator, Env, Step, Trainer, TrainerConfig,
};
use tempdir::TempDir;

const OBS: [f32; 1] = [1.0];

/// One-state bandit with two arms; arm 0 pays 1, arm 1 pays nothing.
struct Bandit;

impl Env for Bandit {
    type Config = ();
    type Obs = Vec<f32>;
    type Act = usize;
    type Info = ();

    fn build(_config: &(), _seed: i64) -> Result<Self> {
        Ok(Bandit)
    }

    fn step(&mut self, a: &usize) -> Result<(Step<Self>, Record)> {
        let reward = if *a == 0 { 1.0 } else { 0.0 };
        Ok((Step::new(OBS.to_vec(), *a, reward, true, false, ()), Record::empty()))
    }

    fn reset(&mut self) -> Result<Vec<f32>> {
        Ok(OBS.to_vec())
    }

    fn reset_with_index(&mut self, _ix: usize) -> Result<Vec<f32>> {
        self.reset()
    }
}

/// One-step continuous bandit with reward `-(a - 0.5)^2`.
struct ContinuousBandit;

impl Env for ContinuousBandit {
    type Config = ();
    type Obs = Vec<f32>;
    type Act = Vec<f32>;
    type Info = ();

    fn build(_config: &(), _seed: i64) -> Result<Self> {
        Ok(ContinuousBandit)
    }

    fn step(&mut self, a: &Vec<f32>) -> Result<(Step<Self>, Record)> {
        let reward = -(a[0] - 0.5).powi(2);
        Ok((Step::new(OBS.to_vec(), a.clone(), reward, true, false, ()), Record::empty()))
    }

    fn reset(&mut self) -> Result<Vec<f32>> {
        Ok(OBS.to_vec())
    }

    fn reset_with_index(&mut self, _ix: usize) -> Result<Vec<f32>> {
        self.reset()
    }
}

fn config(head: PolicyHead, out_dim: usize) -> PpoConfig<PolicyMlpConfig, MlpConfig> {
    PpoConfig::default()
        .model_config(
            PpoModelConfig::default()
                .actor_config(PolicyMlpConfig::new(1, vec![16], out_dim, head))
                .critic_config(MlpConfig::new(1, vec![16], 1, false))
                .actor_opt_config(OptimizerConfig::Adam { lr: 1e-2 })
                .critic_opt_config(OptimizerConfig::Adam { lr: 1e-2 }),
        )
        .trajectory_size(32)
        .batch_size(16)
}

fn discrete_config() -> PpoConfig<PolicyMlpConfig, MlpConfig> {
    config(PolicyHead::Categorical, 2)
}

/// Collects trajectories on `env` and updates the agent `n_updates` times.
fn run<E>(agent: &mut Ppo<E, PolicyMlp, Mlp>, env: &mut E, n_updates: usize) -> Result<()>
where
    E: Env<Obs = Vec<f32>>,
    E::Act: TryFrom<PpoAction, Error = keel_core::error::KeelError>,
{
    let mut obs = env.reset()?;
    while agent.n_updates() < n_updates {
        let a = E::Act::try_from(agent.select_action(&obs, true)?)?;
        let (step, _) = env.step(&a)?;
        agent.store_reward(step.reward, step.is_done())?;
        obs = if step.is_done() { env.reset()? } else { step.obs };

        if agent.is_ready_to_update() {
            let stats = agent.update()?;
            assert_eq!(stats.skipped_minibatches, 0);
            assert_eq!(agent.trajectory_len(), 0);
        }
    }
    Ok(())
}

#[test]
fn test_ppo_learns_discrete_bandit() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut agent = Ppo::<Bandit, PolicyMlp, Mlp>::build(discrete_config())?;
    run(&mut agent, &mut Bandit, 30)?;
    assert_eq!(agent.select_action(&OBS, false)?, PpoAction::Discrete(0));
    Ok(())
}

#[test]
fn test_ppo_learns_gaussian_mean() -> Result<()> {
    let config = config(PolicyHead::Gaussian { init_log_std: -0.5 }, 1)
        .trajectory_size(64)
        .batch_size(32)
        .entropy_coef(0.0);
    let mut agent = Ppo::<ContinuousBandit, PolicyMlp, Mlp>::build(config)?;
    run(&mut agent, &mut ContinuousBandit, 60)?;

    match agent.select_action(&OBS, false)? {
        PpoAction::Continuous(a) => assert!((a[0] - 0.5).abs() < 0.2, "mean = {}", a[0]),
        a => panic!("unexpected action {:?}", a),
    }
    Ok(())
}

#[test]
fn test_save_and_load() -> Result<()> {
    let mut agent = Ppo::<Bandit, PolicyMlp, Mlp>::build(discrete_config())?;
    run(&mut agent, &mut Bandit, 2)?;

    let dir = TempDir::new("ppo")?;
    agent.save_params(dir.path())?;
    for file in ["actor.safetensors", "critic.safetensors", "state.yaml", "config.yaml"] {
        assert!(dir.path().join(file).exists());
    }

    let mut agent_ = Ppo::<Bandit, PolicyMlp, Mlp>::build(discrete_config().seed(7))?;
    agent_.load_params(dir.path())?;
    assert_eq!(agent_.n_updates(), 2);
    assert_eq!(
        agent.select_action(&OBS, false)?,
        agent_.select_action(&OBS, false)?
    );
    assert_eq!(
        PpoConfig::<PolicyMlpConfig, MlpConfig>::load(dir.path().join("config.yaml"))?,
        discrete_config()
    );
    Ok(())
}

#[test]
fn test_trainer_with_ppo() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = TrainerConfig::default()
        .max_opts(30)
        .eval_interval(30)
        .flush_record_interval(10);
    let mut trainer = Trainer::<Bandit>::build(config, ())?;
    let mut agent = Ppo::<Bandit, PolicyMlp, Mlp>::build(discrete_config())?;
    let mut recorder = BufferedRecorder::new();
    let mut evaluator = DefaultEvaluator::<Bandit>::new(&(), 0, 1)?;

    trainer.train(&mut agent, &mut recorder, &mut evaluator)?;

    assert_eq!(agent.n_updates(), 30);
    let flushed = recorder.flushed();
    assert_eq!(flushed.len(), 3);
    // 4 epochs of 2 minibatches in every update
    assert_eq!(flushed[0].1.get_scalar("n_minibatches_mean")?, 8.0);
    assert_eq!(flushed[2].1.get_scalar("eval_reward")?, 1.0);
    Ok(())
}
