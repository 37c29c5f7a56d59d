//! Action distributions produced by policy networks.
use crate::util::argmax_first;
use anyhow::Result;
use candle_core::{DType, Tensor, D};
use candle_nn::ops::{log_softmax, softmax};
use rand::{distributions::WeightedIndex, prelude::Distribution, Rng};
use rand_distr::StandardNormal;

/// 0.5 * ln(2 * pi)
const HALF_LN_2PI: f64 = 0.918_938_533_204_672_7;

/// Batched distribution over actions.
///
/// Discrete actions are `i64` tensors of shape `(batch,)`. Continuous actions are
/// `f32` tensors of shape `(batch, action_dim)`.
#[derive(Debug, Clone)]
pub enum PolicyDist {
    /// Categorical distribution given by unnormalized logits of shape `(batch, n_actions)`.
    Categorical {
        /// Logits.
        logits: Tensor,
    },

    /// Diagonal Gaussian.
    Gaussian {
        /// Mean of shape `(batch, action_dim)`.
        mean: Tensor,
        /// Log standard deviation of shape `(action_dim,)`.
        log_std: Tensor,
    },
}

impl PolicyDist {
    /// Returns the distribution cut from the computation graph.
    pub fn detach(&self) -> Self {
        match self {
            Self::Categorical { logits } => Self::Categorical {
                logits: logits.detach(),
            },
            Self::Gaussian { mean, log_std } => Self::Gaussian {
                mean: mean.detach(),
                log_std: log_std.detach(),
            },
        }
    }

    /// Draws one action per batch element.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<Tensor> {
        match self {
            Self::Categorical { logits } => {
                let probs = softmax(logits, D::Minus1)?.to_vec2::<f32>()?;
                let mut acts = Vec::with_capacity(probs.len());
                for p in probs.iter() {
                    let dist = WeightedIndex::new(p)?;
                    acts.push(dist.sample(rng) as i64);
                }
                let n = acts.len();
                Ok(Tensor::from_vec(acts, n, logits.device())?)
            }
            Self::Gaussian { mean, log_std } => {
                let std = log_std.exp()?.to_vec1::<f32>()?;
                let (b, d) = mean.dims2()?;
                let mut acts = mean.flatten_all()?.to_vec1::<f32>()?;
                for (i, a) in acts.iter_mut().enumerate() {
                    let z: f32 = rng.sample(StandardNormal);
                    *a += std[i % d] * z;
                }
                Ok(Tensor::from_vec(acts, (b, d), mean.device())?)
            }
        }
    }

    /// The most likely action, the lowest index on ties for discrete actions.
    pub fn mode(&self) -> Result<Tensor> {
        match self {
            Self::Categorical { logits } => {
                let acts = logits
                    .to_vec2::<f32>()?
                    .iter()
                    .map(|row| argmax_first(row) as i64)
                    .collect::<Vec<_>>();
                let n = acts.len();
                Ok(Tensor::from_vec(acts, n, logits.device())?)
            }
            Self::Gaussian { mean, .. } => Ok(mean.clone()),
        }
    }

    /// Log probability of the given actions, shape `(batch,)`.
    pub fn log_prob(&self, actions: &Tensor) -> Result<Tensor> {
        match self {
            Self::Categorical { logits } => {
                let ix = actions.to_dtype(DType::I64)?.unsqueeze(1)?;
                Ok(log_softmax(logits, D::Minus1)?.gather(&ix, 1)?.squeeze(1)?)
            }
            Self::Gaussian { mean, log_std } => {
                let z = (actions - mean)?.broadcast_div(&log_std.exp()?)?;
                let lp = (z.sqr()? * -0.5)?
                    .broadcast_sub(log_std)?
                    .affine(1.0, -HALF_LN_2PI)?;
                Ok(lp.sum(D::Minus1)?)
            }
        }
    }

    /// Entropy of each batch element, shape `(batch,)`.
    pub fn entropy(&self) -> Result<Tensor> {
        match self {
            Self::Categorical { logits } => {
                let p = softmax(logits, D::Minus1)?;
                let logp = log_softmax(logits, D::Minus1)?;
                Ok((p * logp)?.sum(D::Minus1)?.neg()?)
            }
            Self::Gaussian { mean, log_std } => Ok(log_std
                .broadcast_as(mean.shape())?
                .affine(1.0, 0.5 + HALF_LN_2PI)?
                .sum(D::Minus1)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use rand::{rngs::SmallRng, SeedableRng};

    fn gaussian(mean: &[f32], log_std: &[f32]) -> PolicyDist {
        let d = log_std.len();
        PolicyDist::Gaussian {
            mean: Tensor::from_slice(mean, (mean.len() / d, d), &Device::Cpu).unwrap(),
            log_std: Tensor::from_slice(log_std, d, &Device::Cpu).unwrap(),
        }
    }

    #[test]
    fn test_gaussian_closed_form() -> Result<()> {
        let dist = gaussian(&[0.0, 1.0], &[0.0, (2f32).ln()]);
        let a = Tensor::from_slice(&[1f32, 1.0], (1, 2), &Device::Cpu)?;
        let lp = dist.log_prob(&a)?.to_vec1::<f32>()?[0];
        // N(1; 0, 1) + N(1; 1, 2)
        let expected = (-0.5 - HALF_LN_2PI) + (-(2f64).ln() - HALF_LN_2PI);
        assert!((lp as f64 - expected).abs() < 1e-5);

        let h = dist.entropy()?.to_vec1::<f32>()?[0];
        let expected = 2.0 * (0.5 + HALF_LN_2PI) + (2f64).ln();
        assert!((h as f64 - expected).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_categorical_uniform() -> Result<()> {
        let dist = PolicyDist::Categorical {
            logits: Tensor::zeros((3, 2), DType::F32, &Device::Cpu)?,
        };
        let a = Tensor::from_slice(&[0i64, 1, 1], 3, &Device::Cpu)?;
        for lp in dist.log_prob(&a)?.to_vec1::<f32>()? {
            assert!((lp - 0.5f32.ln()).abs() < 1e-6);
        }
        for h in dist.entropy()?.to_vec1::<f32>()? {
            assert!((h - 2f32.ln()).abs() < 1e-6);
        }
        assert_eq!(dist.mode()?.to_vec1::<i64>()?, vec![0, 0, 0]);
        Ok(())
    }

    #[test]
    fn test_categorical_sample_frequency() -> Result<()> {
        let logits = Tensor::from_slice(&[0.9f32.ln(), 0.1f32.ln()], (1, 2), &Device::Cpu)?;
        let dist = PolicyDist::Categorical { logits };
        let mut rng = SmallRng::seed_from_u64(42);
        let n_zero = (0..2000)
            .filter(|_| dist.sample(&mut rng).unwrap().to_vec1::<i64>().unwrap()[0] == 0)
            .count();
        assert!((1700..1900).contains(&n_zero));
        Ok(())
    }

    #[test]
    fn test_gaussian_sample_moments() -> Result<()> {
        let dist = gaussian(&[2.0], &[(0.5f32).ln()]);
        let mut rng = SmallRng::seed_from_u64(7);
        let xs = (0..4000)
            .map(|_| dist.sample(&mut rng).unwrap().to_vec2::<f32>().unwrap()[0][0])
            .collect::<Vec<_>>();
        let mean = xs.iter().sum::<f32>() / xs.len() as f32;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / xs.len() as f32;
        assert!((mean - 2.0).abs() < 0.05);
        assert!((var.sqrt() - 0.5).abs() < 0.05);
        Ok(())
    }
}
