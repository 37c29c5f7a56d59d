use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use std::collections::HashMap;

/// Named tensors to send model parameters using a channel.
///
/// Tensors are deep copies on CPU, so a snapshot does not change when the
/// source [`VarMap`] is updated afterwards.
#[derive(Clone, Debug)]
pub struct NamedTensors {
    /// Tensors keyed by variable names.
    pub named_tensors: HashMap<String, Tensor>,
}

impl NamedTensors {
    /// Copy data of [`VarMap`] to CPU.
    pub fn copy_from(vm: &VarMap) -> Result<Self> {
        let data = vm
            .data()
            .lock()
            .map_err(|_| anyhow!("VarMap lock is poisoned"))?;
        let mut named_tensors = HashMap::with_capacity(data.len());
        for (k, v) in data.iter() {
            let t = v.as_tensor().detach().to_device(&Device::Cpu)?.copy()?;
            named_tensors.insert(k.clone(), t);
        }
        Ok(Self { named_tensors })
    }

    /// Copy named tensors to [`VarMap`].
    pub fn copy_to(&self, vm: &VarMap) -> Result<()> {
        let dest = vm
            .data()
            .lock()
            .map_err(|_| anyhow!("VarMap lock is poisoned"))?;
        for (name, src) in self.named_tensors.iter() {
            let v = dest
                .get(name)
                .ok_or_else(|| anyhow!("Variable {} is missing in the destination", name))?;
            v.set(&src.to_device(v.device())?)?;
        }
        Ok(())
    }
}
