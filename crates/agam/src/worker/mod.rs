pub mod pool;

pub use pool::{JobOutcome, JobRunner, WorkerPool};
