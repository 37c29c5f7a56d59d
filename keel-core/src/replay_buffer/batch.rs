//! Transitions and sampled batches.
use serde::{Deserialize, Serialize};

/// A transition `(s_t, a_t, r_t, s_t+1, done)`.
///
/// For n-step transitions `reward` is the discounted sum of `n` rewards and
/// `next_state`/`done` are taken from the `n`-th step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience<O, A> {
    /// State on which the action was taken.
    pub state: O,

    /// Action.
    pub action: A,

    /// Reward.
    pub reward: f32,

    /// State after the action.
    pub next_state: O,

    /// `true` if the episode terminated at `next_state`.
    pub done: bool,
}

impl<O, A> Experience<O, A> {
    /// Constructs a transition.
    pub fn new(state: O, action: A, reward: f32, next_state: O, done: bool) -> Self {
        Self {
            state,
            action,
            reward,
            next_state,
            done,
        }
    }
}

/// A batch of transitions sampled from a [`ReplayBuffer`](super::ReplayBuffer).
#[derive(Debug, Clone)]
pub struct Batch<O, A> {
    /// Sampled transitions.
    pub experiences: Vec<Experience<O, A>>,

    /// Slots of the sampled transitions, used to update their priorities.
    pub indices: Vec<usize>,

    /// Normalized importance sampling weights; `None` for uniform sampling.
    pub weights: Option<Vec<f32>>,
}

impl<O, A> Batch<O, A> {
    /// Number of transitions in the batch.
    pub fn len(&self) -> usize {
        self.experiences.len()
    }

    /// Returns `true` if the batch holds no transition.
    pub fn is_empty(&self) -> bool {
        self.experiences.is_empty()
    }

    /// Rewards of the batch.
    pub fn rewards(&self) -> Vec<f32> {
        self.experiences.iter().map(|e| e.reward).collect()
    }

    /// Done flags of the batch as `0.0` / `1.0`.
    pub fn dones(&self) -> Vec<f32> {
        self.experiences
            .iter()
            .map(|e| if e.done { 1.0 } else { 0.0 })
            .collect()
    }
}
