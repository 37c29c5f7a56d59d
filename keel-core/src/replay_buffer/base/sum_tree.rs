//! Sum tree for prioritized sampling.
use rand::Rng;
use segment_tree::{
    ops::{MaxIgnoreNaN, MinIgnoreNaN},
    SegmentPoint,
};
use serde::{Deserialize, Serialize};

/// Specifies how to normalize the importance weights in a prioritized batch.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy, Default)]
pub enum WeightNormalizer {
    /// Normalize by the maximum weight in the batch, so the largest weight is 1.
    #[default]
    Batch,

    /// Normalize by the largest weight attainable by any stored item.
    All,
}

/// Binary tree of `priority^alpha` whose inner nodes hold the sum of their children.
///
/// Leaf `ix` lives at `tree[ix + capacity - 1]`. Sums are kept in `f64` so that
/// long runs of updates on large buffers do not drift.
#[derive(Debug)]
pub struct SumTree {
    alpha: f32,
    capacity: usize,
    tree: Vec<f64>,

    /// `priority^alpha` of every slot, for the largest attainable weight.
    min_tree: SegmentPoint<f32, MinIgnoreNaN>,

    /// Raw stored priority of every slot.
    max_tree: SegmentPoint<f32, MaxIgnoreNaN>,
}

impl SumTree {
    pub fn new(capacity: usize, alpha: f32) -> Self {
        Self {
            alpha,
            capacity,
            tree: vec![0f64; 2 * capacity - 1],
            min_tree: SegmentPoint::build(vec![f32::MAX; capacity], MinIgnoreNaN),
            max_tree: SegmentPoint::build(vec![0f32; capacity], MaxIgnoreNaN),
        }
    }

    fn propagate(&mut self, mut ix: usize, change: f64) {
        while ix != 0 {
            ix = (ix - 1) / 2;
            self.tree[ix] += change;
        }
    }

    fn retrieve(&self, mut ix: usize, mut s: f64) -> usize {
        loop {
            let left = 2 * ix + 1;
            let right = left + 1;

            if left >= self.tree.len() {
                return ix;
            }

            if self.tree[right] <= 0.0 || (s <= self.tree[left] && self.tree[left] > 0.0) {
                ix = left;
            } else {
                s -= self.tree[left];
                ix = right;
            }
        }
    }

    /// Sum of `priority^alpha` over all slots.
    pub fn total(&self) -> f64 {
        self.tree[0]
    }

    /// Maximum raw priority among the first `size` slots.
    pub fn max(&self, size: usize) -> Option<f32> {
        match size {
            0 => None,
            n => Some(self.max_tree.query(0, n)),
        }
    }

    /// Minimum `priority^alpha` among the first `size` slots.
    pub fn min_scaled(&self, size: usize) -> Option<f32> {
        match size {
            0 => None,
            n => Some(self.min_tree.query(0, n)),
        }
    }

    /// Raw priority stored at `ix`.
    pub fn priority(&self, ix: usize) -> f32 {
        self.max_tree.query(ix, ix + 1)
    }

    /// `priority^alpha` stored at `ix`.
    pub fn scaled(&self, ix: usize) -> f64 {
        self.tree[ix + self.capacity - 1]
    }

    /// Sets the priority of `ix`-th slot; `p` must be positive.
    pub fn update(&mut self, ix: usize, p: f32) {
        debug_assert!(ix < self.capacity);
        debug_assert!(p > 0.0);

        let scaled = p.powf(self.alpha);
        self.max_tree.modify(ix, p);
        self.min_tree.modify(ix, scaled);

        let leaf = ix + self.capacity - 1;
        let change = scaled as f64 - self.tree[leaf];
        self.tree[leaf] = scaled as f64;
        self.propagate(leaf, change);
    }

    /// Index of the slot whose cumulative priority interval contains `s`.
    pub fn get(&self, s: f64) -> usize {
        let leaf = self.retrieve(0, s);
        debug_assert!(leaf >= self.capacity - 1);
        leaf + 1 - self.capacity
    }

    /// Draws `batch_size` indices with replacement, proportionally to `priority^alpha`.
    ///
    /// Returns the indices and importance weights `(N * P(i))^-beta`, normalized as
    /// specified by `normalizer`. `size` is the number of occupied slots `N`.
    pub fn sample<R: Rng>(
        &self,
        rng: &mut R,
        batch_size: usize,
        size: usize,
        beta: f32,
        normalizer: WeightNormalizer,
    ) -> (Vec<usize>, Vec<f32>) {
        let total = self.total();
        let ixs = (0..batch_size)
            .map(|_| self.get(total * rng.gen::<f64>()).min(size - 1))
            .collect::<Vec<_>>();

        let n = size as f64 / total;
        let beta = beta as f64;
        let ws = ixs
            .iter()
            .map(|&ix| (n * self.scaled(ix)).powf(-beta))
            .collect::<Vec<_>>();

        let w_max = match normalizer {
            WeightNormalizer::Batch => ws.iter().fold(f64::MIN_POSITIVE, |m, &w| m.max(w)),
            WeightNormalizer::All => {
                let p_min = self.min_scaled(size).unwrap_or(1.0) as f64;
                (n * p_min).powf(-beta)
            }
        };
        let ws = ws.iter().map(|w| (w / w_max) as f32).collect();

        (ixs, ws)
    }
}
