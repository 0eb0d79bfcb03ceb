//! Test harness for isolated dispatcher runs.
//!
//! Each `TestHarness` owns a temp data directory holding its own blob store,
//! temp storage and SQLite database. The native engine is built without
//! external converters so results never depend on what the host has
//! installed.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use agam::config::{LimitsConfig, ServiceMode};
use agam::db::Database;
use agam::dispatch::{Dispatcher, DispatcherOptions};
use agam::engine::{DocumentEngine, Engine};
use agam::jobs::{JobId, JobRecord, JobStore, NullJobStore, SqliteJobStore};
use agam::storage::{FsBlobStore, TempStorage};

const TERMINAL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TestHarness {
    /// Declared first so workers are joined before the directory goes away.
    pub dispatcher: Dispatcher,
    /// Temporary directory backing every store of this harness.
    temp_dir: TempDir,
}

impl TestHarness {
    /// Durable mode, two workers, native engine.
    pub fn new() -> Self {
        Self::build(ServiceMode::Durable, 2, 16, |temp| {
            Arc::new(Engine::new(temp, None, None))
        })
    }

    /// Streaming mode with the native engine.
    pub fn streaming() -> Self {
        Self::build(ServiceMode::Streaming, 0, 1, |temp| {
            Arc::new(Engine::new(temp, None, None))
        })
    }

    /// Durable mode with a caller-supplied engine.
    pub fn with_engine<F>(worker_count: usize, queue_capacity: usize, engine: F) -> Self
    where
        F: FnOnce(TempStorage) -> Arc<dyn DocumentEngine>,
    {
        Self::build(ServiceMode::Durable, worker_count, queue_capacity, engine)
    }

    fn build<F>(mode: ServiceMode, worker_count: usize, queue_capacity: usize, engine: F) -> Self
    where
        F: FnOnce(TempStorage) -> Arc<dyn DocumentEngine>,
    {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let store: Arc<dyn JobStore> = match mode {
            ServiceMode::Durable => Arc::new(SqliteJobStore::new(
                Database::open(&base.join("agam.db")).expect("Failed to open database"),
            )),
            ServiceMode::Streaming => Arc::new(NullJobStore),
        };
        let blobs = FsBlobStore::new(base.join("blobs")).expect("Failed to create blob store");
        let temp = TempStorage::new(base.join("temp")).expect("Failed to create temp storage");

        let options = DispatcherOptions {
            mode,
            limits: LimitsConfig::default(),
            worker_count,
            queue_capacity,
            retention: Duration::from_secs(3600),
        };
        let dispatcher = Dispatcher::new(options, store, Arc::new(blobs), engine(temp));

        Self {
            dispatcher,
            temp_dir,
        }
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.path().join("temp")
    }

    pub fn blob_root(&self) -> PathBuf {
        self.temp_dir.path().join("blobs")
    }

    /// Number of files under `<blobs>/<namespace>`.
    pub fn blob_count(&self, namespace: &str) -> usize {
        count_entries(&self.blob_root().join(namespace))
    }

    pub fn temp_count(&self) -> usize {
        count_entries(&self.temp_root())
    }

    /// Polls until the job reaches `completed` or `failed`.
    pub fn wait_for_terminal(&self, id: &JobId) -> JobRecord {
        let deadline = Instant::now() + TERMINAL_TIMEOUT;
        loop {
            let job = self.dispatcher.get(id).expect("Job lookup failed");
            if job.status.is_terminal() {
                return job;
            }
            assert!(
                Instant::now() < deadline,
                "Job {} did not finish in time (status: {})",
                id,
                job.status
            );
            thread::sleep(Duration::from_millis(20));
        }
    }
}

fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.count())
        .unwrap_or(0)
}
