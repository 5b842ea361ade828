//! Worker pool driving frame fits.
//!
//! [`FitEngine`] owns a bounded [`JobQueue`] and one thread per [`FitWorker`].
//! Jobs are fitted in whatever order the workers take them; callers that need
//! frame order sort the collected results afterwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use log::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::job::{FitJob, JobHandle, JobQueue, Work};
use crate::peak::PeakResults;
use crate::spot_filter::SpotFilter;
use crate::worker::FitWorker;

/// Runs when a worker thread exits, however it exits.
///
/// A panicking worker closes the queue: blocked producers wake with an error
/// and the remaining workers drain what is queued and stop.
struct WorkerExit {
    id: usize,
    finished: Arc<AtomicBool>,
    queue: Arc<JobQueue>,
}

impl Drop for WorkerExit {
    fn drop(&mut self) {
        self.finished.store(true, Ordering::Release);
        if thread::panicking() {
            error!("Fit worker {} panicked, closing the job queue", self.id);
            self.queue.close();
        }
    }
}

#[derive(Debug)]
struct WorkerThread {
    id: usize,
    finished: Arc<AtomicBool>,
    handle: thread::JoinHandle<Result<()>>,
}

/// Fits queued frames on a fixed number of worker threads.
///
/// Call [`end`](Self::end) to stop the workers. Dropping a running engine
/// stops them immediately and cancels whatever is still queued.
#[derive(Debug)]
pub struct FitEngine {
    config: Arc<Config>,
    queue: Arc<JobQueue>,
    workers: Vec<WorkerThread>,
}

impl FitEngine {
    pub fn new(
        config: Config,
        spot_filter: Arc<dyn SpotFilter>,
        results: Arc<dyn PeakResults>,
        threads: usize,
    ) -> Result<Self> {
        config.check()?;
        if threads == 0 {
            return Err(Error::InvalidConfig(
                "at least one worker thread is required".into(),
            ));
        }

        let config = Arc::new(config);
        let mut engine = Self {
            queue: Arc::new(JobQueue::new(config.queue_capacity)),
            config,
            workers: Vec::with_capacity(threads),
        };

        for id in 0..threads {
            let mut worker = FitWorker::new(
                id,
                Arc::clone(&engine.config),
                Arc::clone(&spot_filter),
                Arc::clone(&results),
            );
            let finished = worker.finished_flag();
            let exit = WorkerExit {
                id,
                finished: Arc::clone(&finished),
                queue: Arc::clone(&engine.queue),
            };

            // On failure the partially built engine is dropped, which stops
            // the workers spawned so far.
            let handle = thread::Builder::new()
                .name(format!("fit-worker-{id}"))
                .spawn(move || {
                    let exit = exit;
                    worker.run(&exit.queue)
                })
                .map_err(|source| Error::Spawn { id, source })?;

            engine.workers.push(WorkerThread {
                id,
                finished,
                handle,
            });
        }

        info!(
            "Fit engine started: {} workers, queue capacity {}",
            threads, engine.config.queue_capacity
        );
        Ok(engine)
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Every worker has stopped.
    pub fn is_stopped(&self) -> bool {
        self.workers
            .iter()
            .all(|w| w.finished.load(Ordering::Acquire))
    }

    /// A worker thread exited before [`end`](Self::end) asked it to.
    pub fn has_dead_worker(&self) -> bool {
        self.workers.iter().any(|w| w.handle.is_finished())
    }

    /// Queue `job` for fitting, blocking while the queue is full.
    ///
    /// Fails once any worker has died; its error is reported by
    /// [`end`](Self::end).
    pub fn run(&self, job: FitJob) -> Result<JobHandle> {
        if self.is_stopped() || self.has_dead_worker() {
            return Err(Error::EngineStopped);
        }
        let handle = job.handle();
        debug!("Queueing frame {}", job.frame().index());
        self.queue
            .put(Work::Job(Box::new(job)))
            .map_err(|_| Error::EngineStopped)?;
        Ok(handle)
    }

    /// Stop the workers and wait for them to exit.
    ///
    /// Without `immediate` every queued job is fitted first. With it, queued
    /// jobs are cancelled and the workers stop at their next candidate. The
    /// first worker failure is returned after all threads were joined.
    pub fn end(mut self, immediate: bool) -> Result<()> {
        self.shutdown(immediate)
    }

    fn shutdown(&mut self, immediate: bool) -> Result<()> {
        if immediate {
            for worker in &self.workers {
                worker.finished.store(true, Ordering::Release);
            }
            let cancelled = self.cancel_queued();
            if cancelled > 0 {
                warn!("Cancelled {cancelled} queued jobs");
            }
        }

        // Stop signals queue behind any remaining jobs. A closed queue stops
        // the workers by itself.
        for _ in &self.workers {
            if self.queue.force_put(Work::Stop).is_err() {
                break;
            }
        }

        let mut first_error = None;
        for worker in self.workers.drain(..) {
            let outcome = match worker.handle.join() {
                Ok(Ok(())) => Ok(()),
                Ok(Err(source)) => Err(Error::WorkerFailed {
                    id: worker.id,
                    source: Box::new(source),
                }),
                Err(_) => Err(Error::WorkerPanicked { id: worker.id }),
            };
            if let Err(err) = outcome {
                error!("{err}");
                first_error.get_or_insert(err);
            }
        }

        self.queue.close();
        let abandoned = self.cancel_queued();
        if abandoned > 0 {
            warn!("Cancelled {abandoned} jobs left by failed workers");
        }
        info!("Fit engine stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Cancel every job still in the queue.
    fn cancel_queued(&self) -> usize {
        let mut cancelled = 0;
        for work in self.queue.drain() {
            if let Work::Job(job) = work {
                job.handle().cancel();
                cancelled += 1;
            }
        }
        cancelled
    }
}

impl Drop for FitEngine {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        warn!("Fit engine dropped while running; stopping workers");
        if let Err(err) = self.shutdown(true) {
            error!("Fit engine shutdown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests;
