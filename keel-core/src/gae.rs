//! Advantage estimation and related statistics for on-policy updates.

/// Generalized advantage estimation over a single trajectory.
///
/// For `t` from last to first:
///
/// * `delta_t = r_t + gamma * V(s_t+1) * (1 - done_t) - V(s_t)`
/// * `A_t = delta_t + gamma * lambda * (1 - done_t) * A_t+1`
/// * `return_t = A_t + V(s_t)`
///
/// `V(s_T+1)` of the last step is `last_value`; it is ignored if that step is terminal.
///
/// # Arguments
///
/// * `rewards`, `values`, `dones` - per-step values of equal length.
/// * `last_value` - bootstrap value after the last step.
///
/// # Returns
///
/// Advantages and returns.
pub fn compute_gae(
    rewards: &[f32],
    values: &[f32],
    dones: &[bool],
    last_value: f32,
    gamma: f32,
    lambda: f32,
) -> (Vec<f32>, Vec<f32>) {
    debug_assert_eq!(rewards.len(), values.len());
    debug_assert_eq!(rewards.len(), dones.len());

    let n = rewards.len();
    let mut advantages = vec![0f32; n];
    let mut returns = vec![0f32; n];
    let mut gae = 0f32;

    for t in (0..n).rev() {
        let next_value = if t + 1 == n { last_value } else { values[t + 1] };
        let non_terminal = if dones[t] { 0.0 } else { 1.0 };
        let delta = rewards[t] + gamma * next_value * non_terminal - values[t];
        gae = delta + gamma * lambda * non_terminal * gae;
        advantages[t] = gae;
        returns[t] = gae + values[t];
    }

    (advantages, returns)
}

fn mean_var(xs: &[f32]) -> (f64, f64) {
    if xs.is_empty() {
        return (0.0, 0.0);
    }
    let n = xs.len() as f64;
    let mean = xs.iter().map(|&x| x as f64).sum::<f64>() / n;
    let var = xs.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean, var)
}

/// Returns `(A - mean(A)) / (std(A) + eps)`.
pub fn normalize_advantages(advantages: &[f32], eps: f32) -> Vec<f32> {
    let (mean, var) = mean_var(advantages);
    let denom = var.sqrt() + eps as f64;
    advantages
        .iter()
        .map(|&a| ((a as f64 - mean) / denom) as f32)
        .collect()
}

/// Returns `1 - Var(returns - values) / (Var(returns) + eps)`.
///
/// 1 means perfect prediction; values at or below 0 mean the predictions explain
/// nothing of the returns.
pub fn explained_variance(values: &[f32], returns: &[f32], eps: f32) -> f32 {
    debug_assert_eq!(values.len(), returns.len());
    let residuals = returns
        .iter()
        .zip(values.iter())
        .map(|(r, v)| r - v)
        .collect::<Vec<_>>();
    let (_, var_res) = mean_var(&residuals);
    let (_, var_ret) = mean_var(returns);
    (1.0 - var_res / (var_ret + eps as f64)) as f32
}
