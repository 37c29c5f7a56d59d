//! DQN agent.
//!
//! Supports Double DQN targets, dueling networks through [`DuelingMlp`](crate::mlp::DuelingMlp),
//! n-step returns and prioritized experience replay.
mod base;
mod config;
mod explorer;
mod model;
pub use base::{Dqn, DqnStats};
pub use config::DqnConfig;
pub use explorer::EpsilonGreedy;
pub use model::{DqnModel, DqnModelConfig};
