//! Parameter exchange between a learner and its workers.

/// Synchronizes the model of an agent with a snapshot taken from another agent.
///
/// A learner shared by several worker threads is kept behind a mutex so that only
/// one optimizer step runs at a time; workers pull [`SyncModel::model_info`]
/// snapshots from it and act with their private copy.
pub trait SyncModel {
    /// Information of the model.
    type ModelInfo: Clone;

    /// Get `ModelInfo`.
    ///
    /// The first element of the return value is the number of optimization steps.
    fn model_info(&self) -> anyhow::Result<(usize, Self::ModelInfo)>;

    /// Synchronizes the model.
    fn sync_model(&mut self, model_info: &Self::ModelInfo) -> anyhow::Result<()>;
}
