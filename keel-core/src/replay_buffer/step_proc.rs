//! N-step transitions.
use super::Experience;
use crate::error::{ensure_config, KeelError};
use std::collections::VecDeque;

/// Accumulates the last `n` one-step transitions and emits n-step transitions.
///
/// The emitted transition starts at the oldest transition of the window, its reward is
/// `sum_{k=0}^{n-1} gamma^k r_{t+k}` and its `next_state`/`done` come from the newest one.
/// When a transition with `done == true` arrives the whole window is flushed: every
/// remaining start index produces a transition truncated at the terminal step.
///
/// With `n == 1` every transition passes through unchanged.
pub struct NStepProcessor<O, A> {
    n: usize,
    gamma: f32,
    window: VecDeque<Experience<O, A>>,
}

impl<O: Clone, A> NStepProcessor<O, A> {
    /// Creates a processor; `n` must be positive and `gamma` in `[0, 1]`.
    pub fn new(n: usize, gamma: f32) -> Result<Self, KeelError> {
        ensure_config(n >= 1, || "n_step must be positive".to_string())?;
        ensure_config((0.0..=1.0).contains(&gamma), || {
            format!("discount must be in [0, 1], got {}", gamma)
        })?;
        Ok(Self {
            n,
            gamma,
            window: VecDeque::with_capacity(n),
        })
    }

    /// Number of steps of the emitted transitions.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of transitions waiting in the window.
    pub fn pending(&self) -> usize {
        self.window.len()
    }

    /// Adds a one-step transition and returns the transitions that became complete.
    pub fn push(&mut self, experience: Experience<O, A>) -> Vec<Experience<O, A>> {
        if self.n == 1 {
            return vec![experience];
        }

        let done = experience.done;
        self.window.push_back(experience);

        if done {
            self.flush()
        } else if self.window.len() == self.n {
            self.pop_n_step().into_iter().collect()
        } else {
            vec![]
        }
    }

    /// Emits a transition for every start index in the window and empties it.
    pub fn flush(&mut self) -> Vec<Experience<O, A>> {
        let mut out = Vec::with_capacity(self.window.len());
        while let Some(e) = self.pop_n_step() {
            out.push(e);
        }
        out
    }

    /// Discards the window.
    pub fn reset(&mut self) {
        self.window.clear();
    }

    fn pop_n_step(&mut self) -> Option<Experience<O, A>> {
        let (next_state, done) = match self.window.back() {
            Some(last) => (last.next_state.clone(), last.done),
            None => return None,
        };
        let reward = self
            .window
            .iter()
            .rev()
            .fold(0f32, |acc, e| e.reward + self.gamma * acc);

        self.window.pop_front().map(|first| Experience {
            state: first.state,
            action: first.action,
            reward,
            next_state,
            done,
        })
    }
}
