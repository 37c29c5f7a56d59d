use super::{create_linear_layers, mlp_forward};
use crate::{distributions::PolicyDist, model::SubModel1, util::OutDim};
use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_nn::{Init, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

/// Output head of [`PolicyMlp`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum PolicyHead {
    /// Logits of a categorical distribution over discrete actions.
    Categorical,

    /// Mean of a diagonal Gaussian with a state-independent, learnable log standard deviation.
    Gaussian {
        /// Initial value of the log standard deviation.
        init_log_std: f64,
    },
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`PolicyMlp`].
pub struct PolicyMlpConfig {
    in_dim: usize,
    units: Vec<usize>,
    out_dim: usize,
    head: PolicyHead,
}

impl PolicyMlpConfig {
    /// Creates configuration of a policy network.
    ///
    /// `out_dim` is the number of actions for [`PolicyHead::Categorical`] and the
    /// action dimension for [`PolicyHead::Gaussian`].
    pub fn new(in_dim: usize, units: Vec<usize>, out_dim: usize, head: PolicyHead) -> Self {
        Self {
            in_dim,
            units,
            out_dim,
            head,
        }
    }

    /// Returns the output head.
    pub fn head(&self) -> &PolicyHead {
        &self.head
    }
}

impl OutDim for PolicyMlpConfig {
    fn get_out_dim(&self) -> usize {
        self.out_dim
    }

    fn set_out_dim(&mut self, out_dim: usize) {
        self.out_dim = out_dim;
    }
}

/// Multilayer perceptron producing a [`PolicyDist`].
pub struct PolicyMlp {
    device: Device,
    layers: Vec<Linear>,
    log_std: Option<Tensor>,
}

impl SubModel1 for PolicyMlp {
    type Config = PolicyMlpConfig;
    type Input = Tensor;
    type Output = PolicyDist;

    fn forward(&self, xs: &Self::Input) -> Result<PolicyDist> {
        let xs = xs.to_device(&self.device)?;
        let out = mlp_forward(&xs, &self.layers)?;

        match &self.log_std {
            None => Ok(PolicyDist::Categorical { logits: out }),
            Some(log_std) => Ok(PolicyDist::Gaussian {
                mean: out,
                log_std: log_std.clone(),
            }),
        }
    }

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        let device = vb.device().clone();
        let vb = vb.pp("policy");
        let layers =
            create_linear_layers("mlp", vb.clone(), config.in_dim, &config.units, config.out_dim)?;
        let log_std = match config.head {
            PolicyHead::Categorical => None,
            PolicyHead::Gaussian { init_log_std } => Some(vb.get_with_hints(
                config.out_dim,
                "log_std",
                Init::Const(init_log_std),
            )?),
        };

        Ok(Self {
            device,
            layers,
            log_std,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    #[test]
    fn test_gaussian_head_registers_log_std() -> Result<()> {
        let vm = VarMap::new();
        let vb = VarBuilder::from_varmap(&vm, DType::F32, &Device::Cpu);
        let config = PolicyMlpConfig::new(2, vec![8], 3, PolicyHead::Gaussian { init_log_std: -0.5 });
        let net = PolicyMlp::build(vb, config)?;

        let log_std = vm.data().lock().unwrap()["policy.log_std"].as_tensor().to_vec1::<f32>()?;
        assert_eq!(log_std, vec![-0.5; 3]);

        match net.forward(&Tensor::zeros((4, 2), DType::F32, &Device::Cpu)?)? {
            PolicyDist::Gaussian { mean, .. } => assert_eq!(mean.dims(), &[4, 3]),
            _ => panic!("expected a Gaussian"),
        }
        Ok(())
    }
}
