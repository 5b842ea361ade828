//! Units of work handed to the fit workers.
//!
//! A [`FitJob`] moves through the queue to exactly one worker. The driver
//! keeps a [`JobHandle`] to follow its progress and collect the outcome.

mod queue;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

pub use queue::{JobQueue, Work};

use crate::fit_result::FitResult;
use crate::frame::Frame;
use crate::peak::PeakResult;
use crate::result_filter::ResultFilterSpec;
use crate::spot_filter::Spot;

/// Optional per-job overrides.
#[derive(Debug, Clone, Default)]
pub struct FitParameters {
    /// Fit exactly these candidates, in this order.
    pub spots: Option<Vec<Spot>>,
    /// Fit the candidates at these row-major pixel indices; intensities are
    /// taken from the spot filter's preprocessed data.
    pub max_indices: Option<Vec<usize>>,
    pub background: Option<f32>,
    pub noise: Option<f32>,
    /// Last frame covered by a job spanning several frames.
    pub end_frame: Option<u32>,
    /// Judge fits against known positions instead of keeping the worker's own
    /// selection.
    pub filter: Option<ResultFilterSpec>,
}

/// One frame to fit.
#[derive(Debug)]
pub struct FitJob {
    frame: Frame,
    parameters: Option<FitParameters>,
    /// Report which candidates produced accepted peaks.
    record_indices: bool,
    handle: JobHandle,
}

impl FitJob {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            parameters: None,
            record_indices: false,
            handle: JobHandle::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: FitParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_recorded_indices(mut self) -> Self {
        self.record_indices = true;
        self
    }

    #[inline]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    #[inline]
    pub fn parameters(&self) -> Option<&FitParameters> {
        self.parameters.as_ref()
    }

    #[inline]
    pub fn records_indices(&self) -> bool {
        self.record_indices
    }

    /// Handle shared with the driver.
    pub fn handle(&self) -> JobHandle {
        self.handle.clone()
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Fit of one candidate, keyed by its rank in the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFit {
    pub candidate: usize,
    pub result: FitResult,
}

impl CandidateFit {
    pub fn new(candidate: usize, result: FitResult) -> Self {
        Self { candidate, result }
    }
}

/// Everything a worker produced for one job.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub frame: u32,
    pub candidates: Vec<Spot>,
    /// Peaks sent to the result sink.
    pub results: Vec<PeakResult>,
    /// One entry per attempted candidate.
    pub fit_results: Vec<CandidateFit>,
    /// Candidates that produced an accepted peak, when recorded.
    pub fitted_indices: Option<Vec<usize>>,
    /// The failures limit stopped the frame early.
    pub aborted: bool,
}

// ============================================================================
// Handle
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    /// Ended without an outcome: dropped by an immediate shutdown or
    /// abandoned by a worker that failed mid-job.
    Cancelled,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    outcome: Option<JobOutcome>,
}

#[derive(Debug)]
struct JobShared {
    state: Mutex<JobState>,
    changed: Condvar,
}

/// Shared view of a job's progress.
#[derive(Debug, Clone)]
pub struct JobHandle {
    shared: Arc<JobShared>,
}

impl JobHandle {
    fn new() -> Self {
        Self {
            shared: Arc::new(JobShared {
                state: Mutex::new(JobState {
                    status: JobStatus::Queued,
                    outcome: None,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.shared.state.lock().status
    }

    pub fn is_done(&self) -> bool {
        matches!(self.status(), JobStatus::Finished | JobStatus::Cancelled)
    }

    pub(crate) fn start(&self) {
        self.set(JobStatus::Started, None);
    }

    pub(crate) fn finish(&self, outcome: JobOutcome) {
        self.set(JobStatus::Finished, Some(outcome));
    }

    pub(crate) fn cancel(&self) {
        self.set(JobStatus::Cancelled, None);
    }

    fn set(&self, status: JobStatus, outcome: Option<JobOutcome>) {
        let mut state = self.shared.state.lock();
        state.status = status;
        if outcome.is_some() {
            state.outcome = outcome;
        }
        self.shared.changed.notify_all();
    }

    /// Block until the job finished or was cancelled and return its outcome.
    /// Only the first caller receives the outcome.
    pub fn wait(&self) -> Option<JobOutcome> {
        let mut state = self.shared.state.lock();
        while !matches!(state.status, JobStatus::Finished | JobStatus::Cancelled) {
            self.shared.changed.wait(&mut state);
        }
        state.outcome.take()
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !matches!(state.status, JobStatus::Finished | JobStatus::Cancelled) {
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                return None;
            }
        }
        state.outcome.take()
    }
}

/// A started job owned by a worker.
///
/// Dropping it before [`finish`](Self::finish), e.g. while unwinding from a
/// panic, cancels the job so waiters do not block forever.
#[derive(Debug)]
pub(crate) struct InFlight {
    handle: Option<JobHandle>,
}

impl InFlight {
    pub(crate) fn start(handle: JobHandle) -> Self {
        handle.start();
        Self {
            handle: Some(handle),
        }
    }

    pub(crate) fn finish(mut self, outcome: JobOutcome) {
        if let Some(handle) = self.handle.take() {
            handle.finish(outcome);
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
        }
    }
}
