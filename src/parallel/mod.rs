//! Concurrent resize pipeline: worker pool, coordinator and reporting
//!
//! The coordinator walks the source tree onto an unbounded work queue, a
//! fixed pool of worker threads resizes each image, and every outcome comes
//! back as a [`ProcessedResult`](crate::processing::ProcessedResult) on a
//! result channel. Statistics are folded by the coordinator alone.

pub mod coordinator;
pub mod pool;
pub mod progress;
pub mod stats;

pub use coordinator::{Coordinator, Phase};
pub use pool::{destination_for, ShutdownSignal, WorkItem, WorkerContext, WorkerPool};
pub use progress::{ConsoleProgress, JsonProgress, MemorySink, NullSink, ProgressSink, ProgressUpdate};
pub use stats::{FailedItem, RunReport, RunStatistics};
