//! Record storage and aggregation.
use super::{Record, RecordValue};
use std::collections::HashMap;

/// Stores records and aggregates them on demand.
///
/// Scalars sharing a key are summarized with their minimum, maximum, mean and median.
/// For any other kind of value the most recent one is kept.
#[derive(Default)]
pub struct RecordStorage {
    data: Vec<Record>,
}

fn min(vs: &[f32]) -> RecordValue {
    RecordValue::Scalar(vs.iter().copied().fold(f32::INFINITY, f32::min))
}

fn max(vs: &[f32]) -> RecordValue {
    RecordValue::Scalar(vs.iter().copied().fold(f32::NEG_INFINITY, f32::max))
}

fn mean(vs: &[f32]) -> RecordValue {
    RecordValue::Scalar(vs.iter().sum::<f32>() / vs.len() as f32)
}

fn median(mut vs: Vec<f32>) -> RecordValue {
    vs.sort_by(|x, y| x.total_cmp(y));
    RecordValue::Scalar(vs[vs.len() / 2])
}

impl RecordStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self { data: vec![] }
    }

    /// Stores a record.
    pub fn store(&mut self, record: Record) {
        self.data.push(record);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no record is stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Aggregates all stored records and clears the storage.
    ///
    /// A scalar key observed once is kept as is; a scalar key observed more than once
    /// is replaced by `<key>_min`, `<key>_max`, `<key>_mean` and `<key>_median`.
    pub fn aggregate(&mut self) -> Record {
        let mut scalars: HashMap<String, Vec<f32>> = HashMap::new();
        let mut latest: HashMap<String, RecordValue> = HashMap::new();

        for record in self.data.drain(..) {
            for (k, v) in record.into_iter_in_record() {
                match v {
                    RecordValue::Scalar(x) => scalars.entry(k).or_default().push(x),
                    v => {
                        latest.insert(k, v);
                    }
                }
            }
        }

        let mut record = Record::empty();
        for (k, v) in latest.into_iter() {
            record.insert(k, v);
        }
        for (k, vs) in scalars.into_iter() {
            if vs.len() == 1 {
                record.insert(k, RecordValue::Scalar(vs[0]));
            } else {
                record.insert(format!("{}_min", k), min(&vs));
                record.insert(format!("{}_max", k), max(&vs));
                record.insert(format!("{}_mean", k), mean(&vs));
                record.insert(format!("{}_median", k), median(vs));
            }
        }
        record
    }
}
