//! PPO agent.
//!
//! Advantages are estimated with GAE over a fixed-size trajectory, then the policy
//! is trained with the clipped surrogate objective for several epochs of shuffled
//! minibatches. The value function may be clipped around its old estimates.
mod action;
mod base;
mod config;
mod model;
pub use action::PpoAction;
pub use base::{Ppo, PpoStats};
pub use config::PpoConfig;
pub use model::{PpoModel, PpoModelConfig};
