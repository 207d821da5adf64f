//! Runs conversion jobs on a fixed pool of blocking worker threads.
//!
//! Jobs only read their source file and write their own outputs, so they run
//! without any shared state. The graph is updated afterwards on the calling
//! thread, from the collected results.

use std::{io, sync::Arc};

use tokio::runtime::{Builder, Runtime};

use crate::{
    convert::{ConversionJob, ConversionOutcome, TextureConverter},
    error::ConvertError,
};

/// Summary of one texture pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextureReport {
    pub planned: usize,
    pub converted: usize,
    pub failed: usize,
    pub files_written: usize,
    pub files_reused: usize,
    pub redundant_splits: usize,
}

impl TextureReport {
    pub fn record(&mut self, outcome: &ConversionOutcome) {
        self.converted += 1;
        self.files_written += outcome.written.len();
        self.files_reused += outcome.reused.len();
        self.redundant_splits += outcome.redundant.len();
    }
}

pub type JobResult = (ConversionJob, Result<ConversionOutcome, ConvertError>);

pub struct ConversionScheduler {
    runtime: Runtime,
    workers: usize,
}

impl ConversionScheduler {
    pub fn new(workers: usize) -> io::Result<Self> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name("gltf-squash-convert")
            .build()?;
        Ok(Self { runtime, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Submits every job before waiting on any of them, then blocks until
    /// all have finished. A failing job does not affect the others.
    pub fn run(&self, converter: Arc<TextureConverter>, jobs: Vec<ConversionJob>) -> Vec<JobResult> {
        let handles: Vec<_> = jobs
            .iter()
            .cloned()
            .map(|job| {
                let converter = Arc::clone(&converter);
                self.runtime.spawn_blocking(move || converter.convert(&job))
            })
            .collect();

        let joined = self.runtime.block_on(futures::future::join_all(handles));

        jobs.into_iter()
            .zip(joined)
            .map(|(job, joined)| {
                let result = joined
                    .map_err(|err| ConvertError::Task(err.to_string()))
                    .and_then(|result| result);
                (job, result)
            })
            .collect()
    }
}
