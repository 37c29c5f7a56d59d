#![warn(missing_docs)]
//! Backend-independent core of keel, a reinforcement learning library.
//!
//! This crate holds everything of an RL training loop that does not touch a
//! tensor library:
//!
//! * [`replay_buffer`] - uniform and prioritized replay memory, n-step transitions
//! * [`schedule`] - epsilon decay for exploration
//! * [`gae`] and [`trajectory`] - on-policy rollouts and advantage estimation
//! * [`target_sync`] - cadence of target network updates
//! * [`Env`], [`Policy`], [`Agent`], [`Trainer`] and [`Evaluator`] - the training loop
//! * [`record`] - metrics produced by agents and the trainer
//!
//! Agents binding these pieces to a tensor backend live in `keel-candle-agent`.
pub mod dummy;
pub mod error;
pub mod gae;
pub mod record;
pub mod replay_buffer;
pub mod schedule;
pub mod target_sync;
pub mod trajectory;

mod base;
pub use base::{Agent, Configurable, Env, Info, Policy, Step};

mod evaluator;
pub use evaluator::{DefaultEvaluator, Evaluator};

mod sync_model;
pub use sync_model::SyncModel;

mod trainer;
pub use trainer::{Sampler, Trainer, TrainerConfig};
