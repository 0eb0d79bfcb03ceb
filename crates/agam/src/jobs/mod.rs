pub mod model;
pub mod store;

pub use model::{
    JobId, JobInput, JobKind, JobPage, JobRecord, JobStatus, ListQuery, NewJob, Operation,
};
pub use store::{JobStore, NullJobStore, SqliteJobStore};
