//! Fixed-size worker pool for sample preprocessing.

use crate::sample::SampleError;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Runs independent preprocessing tasks on a dedicated rayon pool.
///
/// Every task yields `Ok(Some(_))`, `Ok(None)` for a rejected input, or an
/// error. Results are gathered only after every task has finished; rejected
/// entries are then dropped while the input order is preserved. The first
/// error in input order fails the whole batch.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(num_threads: usize) -> Result<Self, SampleError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(|i| format!("sample-worker-{i}"))
            .build()
            .map_err(|e| SampleError::ThreadPool(e.to_string()))?;
        Ok(WorkerPool { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn run<T, R, E, F>(&self, tasks: Vec<T>, job: F) -> Result<Vec<R>, E>
    where
        T: Send,
        R: Send,
        E: Send,
        F: Fn(T) -> Result<Option<R>, E> + Sync + Send,
    {
        let total = tasks.len();
        let outcomes: Vec<Result<Option<R>, E>> =
            self.pool.install(|| tasks.into_par_iter().map(&job).collect());

        let mut results = Vec::with_capacity(total);
        for outcome in outcomes {
            if let Some(result) = outcome? {
                results.push(result);
            }
        }
        log::info!(
            "Worker pool kept {} of {} tasks ({} rejected)",
            results.len(),
            total,
            total - results.len()
        );
        Ok(results)
    }
}
