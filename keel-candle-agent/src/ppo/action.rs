use crate::util::rows_to_tensor;
use anyhow::{bail, Result};
use candle_core::{DType, Device, Tensor};
use keel_core::error::KeelError;

/// Action taken by [`Ppo`](super::Ppo).
#[derive(Debug, Clone, PartialEq)]
pub enum PpoAction {
    /// Index of a discrete action.
    Discrete(usize),

    /// Continuous action vector.
    Continuous(Vec<f32>),
}

impl PpoAction {
    /// Splits a batch of actions sampled from a [`PolicyDist`](crate::distributions::PolicyDist).
    pub fn from_batch(t: &Tensor) -> Result<Vec<Self>> {
        match t.dtype() {
            DType::I64 => Ok(t
                .to_vec1::<i64>()?
                .into_iter()
                .map(|a| Self::Discrete(a as usize))
                .collect()),
            DType::F32 => Ok(t.to_vec2::<f32>()?.into_iter().map(Self::Continuous).collect()),
            dtype => bail!("Unexpected dtype of actions: {:?}", dtype),
        }
    }

    /// Stacks actions of the same kind into a batch.
    ///
    /// Discrete actions give an `i64` tensor of shape `(n,)`, continuous actions an
    /// `f32` tensor of shape `(n, action_dim)`.
    pub fn to_batch(actions: &[&Self], device: &Device) -> Result<Tensor> {
        match actions.first() {
            None => bail!("Cannot stack an empty set of actions"),
            Some(Self::Discrete(_)) => {
                let mut ixs = Vec::with_capacity(actions.len());
                for a in actions.iter() {
                    match a {
                        Self::Discrete(ix) => ixs.push(*ix as i64),
                        Self::Continuous(_) => return Err(mixed().into()),
                    }
                }
                let n = ixs.len();
                Ok(Tensor::from_vec(ixs, n, device)?)
            }
            Some(Self::Continuous(_)) => {
                let mut rows = Vec::with_capacity(actions.len());
                for a in actions.iter() {
                    match a {
                        Self::Continuous(v) => rows.push(v.as_slice()),
                        Self::Discrete(_) => return Err(mixed().into()),
                    }
                }
                rows_to_tensor(&rows, device)
            }
        }
    }
}

fn mixed() -> KeelError {
    KeelError::ActionSpaceMismatch("discrete and continuous actions are mixed".to_string())
}

impl From<usize> for PpoAction {
    fn from(a: usize) -> Self {
        Self::Discrete(a)
    }
}

impl From<Vec<f32>> for PpoAction {
    fn from(a: Vec<f32>) -> Self {
        Self::Continuous(a)
    }
}

impl TryFrom<PpoAction> for usize {
    type Error = KeelError;

    fn try_from(a: PpoAction) -> Result<Self, Self::Error> {
        match a {
            PpoAction::Discrete(ix) => Ok(ix),
            PpoAction::Continuous(_) => Err(KeelError::ActionSpaceMismatch(
                "expected a discrete action".to_string(),
            )),
        }
    }
}

impl TryFrom<PpoAction> for Vec<f32> {
    type Error = KeelError;

    fn try_from(a: PpoAction) -> Result<Self, Self::Error> {
        match a {
            PpoAction::Continuous(v) => Ok(v),
            PpoAction::Discrete(_) => Err(KeelError::ActionSpaceMismatch(
                "expected a continuous action".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_of_discrete_actions() -> Result<()> {
        let actions = [PpoAction::Discrete(1), PpoAction::Discrete(0)];
        let t = PpoAction::to_batch(&actions.iter().collect::<Vec<_>>(), &Device::Cpu)?;
        assert_eq!(t.to_vec1::<i64>()?, vec![1, 0]);
        assert_eq!(PpoAction::from_batch(&t)?, actions.to_vec());
        Ok(())
    }

    #[test]
    fn test_mixed_actions_are_rejected() {
        let actions = [PpoAction::Discrete(1), PpoAction::Continuous(vec![0.5])];
        let err = PpoAction::to_batch(&actions.iter().collect::<Vec<_>>(), &Device::Cpu).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KeelError>(),
            Some(KeelError::ActionSpaceMismatch(_))
        ));
        assert!(usize::try_from(PpoAction::Continuous(vec![0.5])).is_err());
    }
}
