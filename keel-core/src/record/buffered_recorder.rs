use super::{AggregateRecorder, Record, RecordStorage, RecordValue, Recorder};
use log::info;

/// Buffered recorder.
///
/// Every written record is kept in memory, for example the sequence of
/// observations and actions of an evaluation run. Stored records are aggregated
/// with [`RecordStorage`] on [`AggregateRecorder::flush`]; the resulting scalars
/// are logged and the aggregated record is kept as well.
#[derive(Default)]
pub struct BufferedRecorder {
    buf: Vec<Record>,
    storage: RecordStorage,
    flushed: Vec<(i64, Record)>,
}

impl BufferedRecorder {
    /// Construct the recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an iterator over the written records.
    pub fn iter(&self) -> std::slice::Iter<Record> {
        self.buf.iter()
    }

    /// Aggregated records produced by every flush, with their step.
    pub fn flushed(&self) -> &[(i64, Record)] {
        &self.flushed
    }
}

impl Recorder for BufferedRecorder {
    /// Write a [`Record`] to the buffer.
    fn write(&mut self, record: Record) {
        self.buf.push(record);
    }
}

impl AggregateRecorder for BufferedRecorder {
    fn store(&mut self, record: Record) {
        self.storage.store(record);
    }

    fn flush(&mut self, step: i64) {
        if self.storage.is_empty() {
            return;
        }

        let record = self.storage.aggregate();
        let mut scalars = record
            .iter()
            .filter_map(|(k, v)| match v {
                RecordValue::Scalar(x) => Some(format!("{} = {:.5}", k, x)),
                _ => None,
            })
            .collect::<Vec<_>>();
        scalars.sort();
        info!("step {}: {}", step, scalars.join(", "));

        self.flushed.push((step, record));
    }
}
