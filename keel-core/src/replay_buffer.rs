//! Replay memory of transitions.
//!
//! [`ReplayBuffer`] stores [`Experience`]s in a circular array and samples them
//! uniformly or by priority. [`NStepProcessor`] turns consecutive one-step
//! transitions into n-step transitions before they are pushed.
mod base;
mod batch;
mod config;
mod step_proc;
pub use base::{IwScheduler, ReplayBuffer, WeightNormalizer};
pub use batch::{Batch, Experience};
pub use config::{PerConfig, ReplayBufferConfig};
pub use step_proc::NStepProcessor;
