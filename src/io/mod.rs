//! Persistence of integration state.
//!
//! Checkpoints are the only files the time-integration core writes; model
//! output belongs to the model's own callbacks.

mod checkpoint;

pub use checkpoint::{CheckpointError, CheckpointRecord, CheckpointStore, RetentionPolicy};
