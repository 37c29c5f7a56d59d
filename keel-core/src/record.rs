//! Types and traits for recording training metrics.
//!
//! * [`Record`] - a key-value container of [`RecordValue`]s
//! * [`Recorder`] / [`AggregateRecorder`] - destinations of records
//! * [`RecordStorage`] - aggregation of stored records
//! * [`BufferedRecorder`] - keeps records in memory and logs aggregated scalars
//! * [`NullRecorder`] - discards records
//!
//! ```rust
//! use keel_core::record::{Record, RecordValue};
//!
//! let mut record = Record::empty();
//! record.insert("opt_steps", RecordValue::Scalar(100.0));
//! record.insert("loss", RecordValue::Scalar(0.25));
//! record.insert("q_values", RecordValue::Array1(vec![0.5, 1.5]));
//! ```
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;
mod storage;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::{AggregateRecorder, Recorder};
pub use storage::RecordStorage;
