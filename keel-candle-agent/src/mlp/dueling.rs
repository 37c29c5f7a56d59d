use super::{create_linear_layers, mlp_forward};
use crate::{model::SubModel1, util::OutDim};
use anyhow::{bail, Result};
use candle_core::{Device, Module, Tensor, D};
use candle_nn::{linear, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`DuelingMlp`].
pub struct DuelingMlpConfig {
    in_dim: usize,
    units: Vec<usize>,
    out_dim: usize,
}

impl DuelingMlpConfig {
    /// Creates configuration of a dueling network.
    ///
    /// `units` are the hidden layers of the shared trunk and must not be empty.
    pub fn new(in_dim: usize, units: Vec<usize>, out_dim: usize) -> Self {
        Self {
            in_dim,
            units,
            out_dim,
        }
    }
}

impl OutDim for DuelingMlpConfig {
    fn get_out_dim(&self) -> usize {
        self.out_dim
    }

    fn set_out_dim(&mut self, out_dim: usize) {
        self.out_dim = out_dim;
    }
}

/// Dueling network.
///
/// A shared trunk feeds a state-value head `V(s)` and an advantage head `A(s, a)`,
/// combined as `Q(s, a) = V(s) + A(s, a) - mean_a A(s, a)`.
pub struct DuelingMlp {
    device: Device,
    trunk: Vec<Linear>,
    value: Linear,
    adv: Linear,
}

impl SubModel1 for DuelingMlp {
    type Config = DuelingMlpConfig;
    type Input = Tensor;
    type Output = Tensor;

    fn forward(&self, xs: &Self::Input) -> Result<Tensor> {
        let xs = xs.to_device(&self.device)?;
        let h = mlp_forward(&xs, &self.trunk)?.relu()?;
        let v = self.value.forward(&h)?;
        let a = self.adv.forward(&h)?;
        let a = a.broadcast_sub(&a.mean_keepdim(D::Minus1)?)?;
        Ok(a.broadcast_add(&v)?)
    }

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        let (last, hidden) = match config.units.split_last() {
            Some((last, hidden)) => (*last, hidden),
            None => bail!("Dueling network needs at least one hidden layer"),
        };
        let device = vb.device().clone();
        let trunk = create_linear_layers("trunk", vb.clone(), config.in_dim, hidden, last)?;
        let value = linear(last, 1, vb.pp("value"))?;
        let adv = linear(last, config.out_dim, vb.pp("adv"))?;

        Ok(Self {
            device,
            trunk,
            value,
            adv,
        })
    }
}
