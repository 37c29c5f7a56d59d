//! Multilayer perceptron.
mod base;
mod config;
mod dueling;
mod policy;
use anyhow::Result;
pub use base::Mlp;
use candle_core::Tensor;
use candle_nn::{linear, Linear, Module, VarBuilder};
pub use config::MlpConfig;
pub use dueling::{DuelingMlp, DuelingMlpConfig};
pub use policy::{PolicyHead, PolicyMlp, PolicyMlpConfig};

/// Returns linear layers mapping `in_dim` through `units` to `out_dim`.
///
/// Layers are named `{prefix}.ln{i}`.
fn create_linear_layers(
    prefix: &str,
    vb: VarBuilder,
    in_dim: usize,
    units: &[usize],
    out_dim: usize,
) -> Result<Vec<Linear>> {
    let dims: Vec<usize> = std::iter::once(in_dim)
        .chain(units.iter().copied())
        .chain(std::iter::once(out_dim))
        .collect();
    let vb = vb.pp(prefix);

    let mut layers = Vec::with_capacity(dims.len() - 1);
    for (i, w) in dims.windows(2).enumerate() {
        layers.push(linear(w[0], w[1], vb.pp(format!("ln{}", i)))?);
    }
    Ok(layers)
}

/// Applies layers with ReLU between them. No activation after the last layer.
fn mlp_forward(xs: &Tensor, layers: &[Linear]) -> Result<Tensor> {
    let mut xs = xs.clone();
    for (i, layer) in layers.iter().enumerate() {
        xs = layer.forward(&xs)?;
        if i + 1 < layers.len() {
            xs = xs.relu()?;
        }
    }
    Ok(xs)
}
