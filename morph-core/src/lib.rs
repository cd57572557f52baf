//! Core types for Morph - audio buffers and thread coordination
//!
//! - AudioBuffer: immutable mono sample buffer shared between threads
//! - Coordinator: registry of named queues, signals and worker threads

mod buffer;
mod coordinator;

pub use buffer::AudioBuffer;
pub use coordinator::{Coordinator, CoordinatorError, Queue, Signal, WorkerError, WorkerResult};
