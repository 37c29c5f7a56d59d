//! Utilities.
use anyhow::{anyhow, bail, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use log::trace;
use serde::{Deserialize, Serialize};
mod named_tensors;
pub use named_tensors::NamedTensors;

/// Critic loss type.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy, Default)]
pub enum CriticLoss {
    /// Mean squared error.
    #[default]
    Mse,

    /// Smooth L1 loss.
    SmoothL1,
}

impl CriticLoss {
    /// Elementwise loss between predictions and targets, not reduced.
    pub fn elementwise(&self, pred: &Tensor, tgt: &Tensor) -> Result<Tensor> {
        match self {
            Self::Mse => Ok((pred - tgt)?.sqr()?),
            Self::SmoothL1 => Ok(smooth_l1(pred, tgt)?),
        }
    }
}

/// Copies every variable of `src` into the variable of `dest` with the same name.
pub fn hard_sync(dest: &VarMap, src: &VarMap) -> Result<()> {
    trace!("hard_sync");
    let dest = dest
        .data()
        .lock()
        .map_err(|_| anyhow!("VarMap lock is poisoned"))?;
    let src = src
        .data()
        .lock()
        .map_err(|_| anyhow!("VarMap lock is poisoned"))?;

    for (k, v_dest) in dest.iter() {
        let v_src = src
            .get(k)
            .ok_or_else(|| anyhow!("Variable {} is missing in the source", k))?;
        v_dest.set(v_src.as_tensor())?;
    }

    Ok(())
}

/// Apply soft update on variables.
///
/// Variables are identified by their names.
///
/// dest = tau * src + (1.0 - tau) * dest
pub fn soft_sync(dest: &VarMap, src: &VarMap, tau: f64) -> Result<()> {
    trace!("soft_sync");
    let dest = dest
        .data()
        .lock()
        .map_err(|_| anyhow!("VarMap lock is poisoned"))?;
    let src = src
        .data()
        .lock()
        .map_err(|_| anyhow!("VarMap lock is poisoned"))?;

    for (k, v_dest) in dest.iter() {
        let v_src = src
            .get(k)
            .ok_or_else(|| anyhow!("Variable {} is missing in the source", k))?;
        let t_src = v_src.as_tensor().detach();
        let t_dest = v_dest.as_tensor().detach();
        let t = (t_src.affine(tau, 0.)? + t_dest.affine(1.0 - tau, 0.)?)?;
        v_dest.set(&t)?;
    }

    Ok(())
}

/// Interface for handling output dimensions.
pub trait OutDim {
    /// Returns the output dimension.
    fn get_out_dim(&self) -> usize;

    /// Sets the  output dimension.
    fn set_out_dim(&mut self, v: usize);
}

/// Elementwise smooth L1 loss.
///
/// See <https://pytorch.org/docs/stable/generated/torch.nn.SmoothL1Loss.html>.
pub fn smooth_l1(x: &Tensor, y: &Tensor) -> Result<Tensor, candle_core::Error> {
    let d = (x - y)?.abs()?;
    let m1 = d.lt(1.0)?.to_dtype(DType::F32)?;
    let m2 = m1.affine(-1.0, 1.0)?;
    ((0.5 * m1)? * d.sqr()?)? + (m2 * (d - 0.5)?)?
}

/// Stacks rows of the same length into a tensor of shape `(rows.len(), dim)`.
pub fn rows_to_tensor(rows: &[&[f32]], device: &Device) -> Result<Tensor> {
    let dim = match rows.first() {
        Some(r) => r.len(),
        None => bail!("Cannot stack an empty set of rows"),
    };
    let mut data = Vec::with_capacity(rows.len() * dim);
    for r in rows.iter() {
        if r.len() != dim {
            bail!("Row of length {} does not match dimension {}", r.len(), dim);
        }
        data.extend_from_slice(r);
    }
    Ok(Tensor::from_vec(data, (rows.len(), dim), device)?)
}

/// Index of the largest value, the first one on ties.
pub fn argmax_first(xs: &[f32]) -> usize {
    let mut best = 0;
    for (i, x) in xs.iter().enumerate().skip(1) {
        if *x > xs[best] {
            best = i;
        }
    }
    best
}
