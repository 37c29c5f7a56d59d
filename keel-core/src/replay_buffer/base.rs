//! Replay buffer with optional prioritized sampling.
mod iw_scheduler;
mod sum_tree;
use super::{Batch, Experience, PerConfig, ReplayBufferConfig};
use crate::error::KeelError;
use anyhow::Result;
pub use iw_scheduler::IwScheduler;
use log::trace;
use rand::{rngs::StdRng, SeedableRng};
use sum_tree::SumTree;
pub use sum_tree::WeightNormalizer;

struct PerState {
    sum_tree: SumTree,
    iw_scheduler: IwScheduler,
    epsilon: f32,
    normalize: WeightNormalizer,
}

impl PerState {
    fn new(capacity: usize, per_config: &PerConfig) -> Self {
        Self {
            sum_tree: SumTree::new(capacity, per_config.alpha),
            iw_scheduler: IwScheduler::new(per_config.beta, per_config.beta_increment),
            epsilon: per_config.epsilon,
            normalize: per_config.normalize,
        }
    }
}

/// A fixed-capacity circular store of [`Experience`]s.
///
/// Without [`PerConfig`], [`ReplayBuffer::sample`] draws `min(batch_size, len)`
/// distinct transitions uniformly at random.
///
/// With [`PerConfig`], every slot carries a priority `p > 0` and transitions are drawn
/// with replacement with probability `p^alpha / sum_j p_j^alpha`. Sampled batches come
/// with importance sampling weights `(N * P(i))^-beta`, and `beta` is increased after
/// every sampling. A newly pushed transition gets the largest priority currently
/// stored (1.0 in an empty buffer).
///
/// ```rust
/// use keel_core::replay_buffer::{Experience, ReplayBuffer, ReplayBufferConfig};
///
/// let config = ReplayBufferConfig::default().capacity(2);
/// let mut buffer = ReplayBuffer::<f32, usize>::build(&config)?;
/// for i in 0..3 {
///     buffer.push(Experience::new(i as f32, i, 0.0, i as f32 + 1.0, false));
/// }
/// assert_eq!(buffer.len(), 2);
/// assert_eq!(buffer.sample(4).len(), 2);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct ReplayBuffer<O, A> {
    capacity: usize,

    /// Slot of the next push.
    i: usize,

    data: Vec<Experience<O, A>>,
    rng: StdRng,
    per_config: Option<PerConfig>,
    per_state: Option<PerState>,
}

impl<O, A> ReplayBuffer<O, A> {
    /// Builds a replay buffer.
    ///
    /// Fails with [`KeelError::ConfigurationError`] if the configuration is invalid.
    pub fn build(config: &ReplayBufferConfig) -> Result<Self> {
        config.validate()?;
        let capacity = config.capacity;
        let per_state = config
            .per_config
            .as_ref()
            .map(|per_config| PerState::new(capacity, per_config));

        Ok(Self {
            capacity,
            i: 0,
            data: Vec::with_capacity(capacity),
            rng: StdRng::seed_from_u64(config.seed),
            per_config: config.per_config.clone(),
            per_state,
        })
    }

    /// Number of stored transitions.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no transition is stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Maximum number of transitions.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` if the buffer samples by priority.
    pub fn is_prioritized(&self) -> bool {
        self.per_state.is_some()
    }

    /// Transition stored at slot `ix`.
    pub fn get(&self, ix: usize) -> Option<&Experience<O, A>> {
        self.data.get(ix)
    }

    /// Iterates over stored transitions in slot order.
    pub fn iter(&self) -> std::slice::Iter<'_, Experience<O, A>> {
        self.data.iter()
    }

    /// Priority of slot `ix`, if the buffer is prioritized and the slot is occupied.
    pub fn priority(&self, ix: usize) -> Option<f32> {
        match &self.per_state {
            Some(per_state) if ix < self.len() => Some(per_state.sum_tree.priority(ix)),
            _ => None,
        }
    }

    /// Current importance sampling exponent of a prioritized buffer.
    pub fn beta(&self) -> Option<f32> {
        self.per_state.as_ref().map(|s| s.iw_scheduler.beta())
    }

    /// Overwrites the importance sampling exponent of a prioritized buffer.
    ///
    /// Used to undo the annealing of a [`sample`](Self::sample) whose batch was discarded.
    /// Does nothing on a uniform buffer.
    pub fn set_beta(&mut self, beta: f32) {
        if let Some(per_state) = self.per_state.as_mut() {
            per_state.iw_scheduler.set_beta(beta);
        }
    }

    /// Removes every transition.
    ///
    /// Priorities and the importance sampling exponent return to their initial state.
    pub fn clear(&mut self) {
        self.i = 0;
        self.data.clear();
        self.per_state = self
            .per_config
            .as_ref()
            .map(|per_config| PerState::new(self.capacity, per_config));
    }

    fn write(&mut self, experience: Experience<O, A>) -> usize {
        let ix = self.i;
        if ix < self.data.len() {
            self.data[ix] = experience;
        } else {
            self.data.push(experience);
        }
        self.i = (self.i + 1) % self.capacity;
        ix
    }

    /// Pushes a transition, evicting the oldest one if the buffer is full.
    pub fn push(&mut self, experience: Experience<O, A>) {
        let size = self.len();
        let p = self
            .per_state
            .as_ref()
            .map(|s| s.sum_tree.max(size).unwrap_or(1.0));
        let ix = self.write(experience);
        if let (Some(per_state), Some(p)) = (self.per_state.as_mut(), p) {
            per_state.sum_tree.update(ix, p);
        }
    }

    /// Pushes a transition with an explicit raw priority.
    ///
    /// The stored priority is `|priority| + epsilon`. A uniform buffer ignores the priority.
    pub fn push_with_priority(&mut self, experience: Experience<O, A>, priority: f32) -> Result<()> {
        if !priority.is_finite() {
            return Err(KeelError::ConfigurationError(format!(
                "priority must be finite, got {}",
                priority
            ))
            .into());
        }
        let ix = self.write(experience);
        if let Some(per_state) = self.per_state.as_mut() {
            let p = priority.abs() + per_state.epsilon;
            per_state.sum_tree.update(ix, p);
        }
        Ok(())
    }

    /// Sets `priority[indices[k]] = |priorities[k]| + epsilon`.
    ///
    /// Indices are checked against the current number of stored transitions before
    /// anything is written: an out-of-range index fails with
    /// [`KeelError::IndexOutOfRange`] and leaves every priority untouched.
    /// On a uniform buffer this only performs the checks.
    pub fn update_priorities(&mut self, indices: &[usize], priorities: &[f32]) -> Result<()> {
        let len = self.len();
        if indices.len() != priorities.len() {
            return Err(KeelError::ConfigurationError(format!(
                "{} indices for {} priorities",
                indices.len(),
                priorities.len()
            ))
            .into());
        }
        if let Some(&index) = indices.iter().find(|&&ix| ix >= len) {
            return Err(KeelError::IndexOutOfRange { index, len }.into());
        }
        if let Some(p) = priorities.iter().find(|p| !p.is_finite()) {
            return Err(
                KeelError::ConfigurationError(format!("priority must be finite, got {}", p)).into(),
            );
        }

        if let Some(per_state) = self.per_state.as_mut() {
            for (&ix, &p) in indices.iter().zip(priorities.iter()) {
                per_state.sum_tree.update(ix, p.abs() + per_state.epsilon);
            }
        }
        Ok(())
    }
}

impl<O: Clone, A: Clone> ReplayBuffer<O, A> {
    /// Samples a batch of transitions.
    ///
    /// A uniform buffer returns `min(batch_size, len)` distinct transitions.
    /// A prioritized buffer returns `batch_size` transitions drawn with replacement
    /// together with their normalized importance sampling weights, then increases `beta`.
    /// An empty buffer gives an empty batch.
    pub fn sample(&mut self, batch_size: usize) -> Batch<O, A> {
        let size = self.len();
        if size == 0 {
            return Batch {
                experiences: vec![],
                indices: vec![],
                weights: self.per_state.as_ref().map(|_| vec![]),
            };
        }

        let (indices, weights) = match self.per_state.as_mut() {
            None => {
                let amount = batch_size.min(size);
                let ixs = rand::seq::index::sample(&mut self.rng, size, amount).into_vec();
                (ixs, None)
            }
            Some(per_state) => {
                let beta = per_state.iw_scheduler.beta();
                let (ixs, ws) = per_state.sum_tree.sample(
                    &mut self.rng,
                    batch_size,
                    size,
                    beta,
                    per_state.normalize,
                );
                per_state.iw_scheduler.step();
                trace!("Sampled {} prioritized transitions with beta = {}", ixs.len(), beta);
                (ixs, Some(ws))
            }
        };

        Batch {
            experiences: indices.iter().map(|&ix| self.data[ix].clone()).collect(),
            indices,
            weights,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;

    fn experience(i: usize) -> Experience<f32, usize> {
        Experience::new(i as f32, i, i as f32, i as f32 + 1.0, false)
    }

    fn uniform(capacity: usize) -> ReplayBuffer<f32, usize> {
        let config = ReplayBufferConfig::default().capacity(capacity);
        ReplayBuffer::build(&config).unwrap()
    }

    fn prioritized(capacity: usize, per_config: PerConfig) -> ReplayBuffer<f32, usize> {
        let config = ReplayBufferConfig::default()
            .capacity(capacity)
            .per_config(Some(per_config));
        ReplayBuffer::build(&config).unwrap()
    }

    #[test]
    fn test_eviction() {
        let (capacity, k) = (5, 3);
        let mut buffer = uniform(capacity);
        for i in 0..capacity + k {
            buffer.push(experience(i));
        }

        assert_eq!(buffer.len(), capacity);
        let actions = buffer.iter().map(|e| e.action).collect::<HashSet<_>>();
        assert_eq!(actions, (k..capacity + k).collect::<HashSet<_>>());
    }

    #[test]
    fn test_uniform_sample_distinct() {
        let mut buffer = uniform(10);
        for i in 0..4 {
            buffer.push(experience(i));
        }

        let batch = buffer.sample(8);
        assert_eq!(batch.len(), 4);
        assert!(batch.weights.is_none());
        let ixs = batch.indices.iter().collect::<HashSet<_>>();
        assert_eq!(ixs.len(), 4);

        for _ in 0..20 {
            let batch = buffer.sample(3);
            let ixs = batch.indices.iter().collect::<HashSet<_>>();
            assert_eq!(ixs.len(), 3);
        }
    }

    #[test]
    fn test_empty_buffer() {
        let mut buffer = uniform(3);
        assert!(buffer.sample(2).is_empty());
        let mut buffer = prioritized(3, PerConfig::default());
        assert!(buffer.sample(2).is_empty());
        buffer.push(experience(0));
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.beta(), Some(0.4));
    }

    #[test]
    fn test_new_items_get_max_priority() {
        let mut buffer = prioritized(4, PerConfig::default());
        buffer.push(experience(0));
        assert_eq!(buffer.priority(0), Some(1.0));

        buffer.update_priorities(&[0], &[5.0]).unwrap();
        buffer.push(experience(1));
        let p = buffer.priority(1).unwrap();
        assert!((p - (5.0 + 1e-6)).abs() < 1e-5);
        assert_eq!(buffer.priority(2), None);
    }

    #[test]
    fn test_priority_floor() {
        let mut buffer = prioritized(8, PerConfig::default().epsilon(1e-3));
        for i in 0..8 {
            buffer.push(experience(i));
        }
        buffer
            .update_priorities(&[0, 1, 2, 3], &[0.0, -0.0, -2.0, 1e-9])
            .unwrap();
        buffer.update_priorities(&[4, 0], &[-1e-7, 0.0]).unwrap();

        for ix in 0..8 {
            assert!(buffer.priority(ix).unwrap() > 0.0);
        }
        assert!((buffer.priority(2).unwrap() - 2.001).abs() < 1e-6);
    }

    #[test]
    fn test_update_priorities_rejects_out_of_range() {
        let mut buffer = prioritized(8, PerConfig::default());
        for i in 0..3 {
            buffer.push(experience(i));
        }
        let err = buffer
            .update_priorities(&[0, 3], &[7.0, 7.0])
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<KeelError>(),
            Some(&KeelError::IndexOutOfRange { index: 3, len: 3 })
        );
        // Nothing was written.
        assert_eq!(buffer.priority(0), Some(1.0));

        assert!(buffer.update_priorities(&[0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_skewed_sampling() {
        let mut buffer = prioritized(3, PerConfig::default().alpha(1.0));
        for i in 0..3 {
            buffer.push(experience(i));
        }
        buffer
            .update_priorities(&[0, 1, 2], &[1.0, 1.0, 100.0])
            .unwrap();

        let batch = buffer.sample(1000);
        assert_eq!(batch.len(), 1000);
        let n = batch.indices.iter().filter(|&&ix| ix == 2).count();
        assert!(n >= 900, "{}", n);

        let weights = batch.weights.unwrap();
        let w_max = weights.iter().cloned().fold(0f32, f32::max);
        assert!((w_max - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_beta_anneals() {
        let mut buffer = prioritized(3, PerConfig::default().beta(0.5).beta_increment(0.3));
        buffer.push(experience(0));
        buffer.sample(1);
        assert!((buffer.beta().unwrap() - 0.8).abs() < 1e-6);
        buffer.sample(1);
        assert_eq!(buffer.beta(), Some(1.0));
    }

    #[test]
    fn test_set_beta_restores_annealing() {
        let mut buffer = prioritized(3, PerConfig::default().beta(0.5).beta_increment(0.3));
        buffer.push(experience(0));
        let beta = buffer.beta();
        buffer.sample(1);
        buffer.set_beta(beta.unwrap());
        assert_eq!(buffer.beta(), Some(0.5));
    }
}
