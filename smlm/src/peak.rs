//! Accepted localisations and the thread-safe result sink.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::gaussian::{
    ANGLE, BACKGROUND, SIGNAL, X_POSITION, X_SD, Y_POSITION, Y_SD, parameter_count,
};

/// One accepted emitter.
///
/// `params` uses the single-peak layout `[background, signal, angle, x, y,
/// x_sd, y_sd]`. Positions are in full-image coordinates with pixel centres at
/// `+0.5`; the angle is in degrees when it was fitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakResult {
    pub frame: u32,
    /// Last frame of a ranged job; equal to `frame` otherwise.
    pub end_frame: u32,
    /// Candidate pixel in full-image coordinates.
    pub orig_x: usize,
    pub orig_y: usize,
    pub orig_value: f32,
    pub error: f64,
    pub noise: f32,
    pub params: [f32; PEAK_RESULT_PARAMETERS],
    pub param_devs: Option<[f32; PEAK_RESULT_PARAMETERS]>,
}

impl PeakResult {
    #[inline]
    pub fn background(&self) -> f32 {
        self.params[BACKGROUND]
    }

    #[inline]
    pub fn signal(&self) -> f32 {
        self.params[1 + SIGNAL]
    }

    #[inline]
    pub fn angle(&self) -> f32 {
        self.params[1 + ANGLE]
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.params[1 + X_POSITION]
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.params[1 + Y_POSITION]
    }

    #[inline]
    pub fn x_sd(&self) -> f32 {
        self.params[1 + X_SD]
    }

    #[inline]
    pub fn y_sd(&self) -> f32 {
        self.params[1 + Y_SD]
    }

    /// Squared distance between the centres of two results.
    #[inline]
    pub fn distance_squared(&self, other: &PeakResult) -> f32 {
        let dx = self.x() - other.x();
        let dy = self.y() - other.y();
        dx * dx + dy * dy
    }
}

pub(crate) const PEAK_RESULT_PARAMETERS: usize = parameter_count(1);

/// Append-only destination for accepted peaks, shared by all workers.
pub trait PeakResults: Send + Sync {
    /// Append every result of one frame.
    fn add_all(&self, results: Vec<PeakResult>);

    fn size(&self) -> usize;
}

/// In-memory [`PeakResults`] behind a mutex.
#[derive(Debug, Default)]
pub struct SharedPeakResults {
    results: Mutex<Vec<PeakResult>>,
}

impl SharedPeakResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything collected so far.
    pub fn snapshot(&self) -> Vec<PeakResult> {
        self.results.lock().clone()
    }

    /// Impose frame order; workers append in completion order.
    pub fn sort_by_frame(&self) {
        self.results.lock().sort_by_key(|r| r.frame);
    }

    pub fn take(&self) -> Vec<PeakResult> {
        std::mem::take(&mut *self.results.lock())
    }
}

impl PeakResults for SharedPeakResults {
    fn add_all(&self, results: Vec<PeakResult>) {
        if results.is_empty() {
            return;
        }
        self.results.lock().extend(results);
    }

    fn size(&self) -> usize {
        self.results.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn result(frame: u32, x: f32, y: f32) -> PeakResult {
        PeakResult {
            frame,
            end_frame: frame,
            orig_x: x as usize,
            orig_y: y as usize,
            orig_value: 100.0,
            error: 0.01,
            noise: 2.0,
            params: [10.0, 1000.0, 0.0, x, y, 1.3, 1.3],
            param_devs: None,
        }
    }

    #[test]
    fn test_accessors_follow_parameter_layout() {
        let r = result(0, 3.5, 4.5);
        assert_eq!(PEAK_RESULT_PARAMETERS, 7);
        assert_eq!(r.background(), 10.0);
        assert_eq!(r.signal(), 1000.0);
        assert_eq!(r.angle(), 0.0);
        assert_eq!(r.x(), 3.5);
        assert_eq!(r.y(), 4.5);
        assert_eq!(r.x_sd(), 1.3);
        assert_eq!(r.distance_squared(&result(0, 6.5, 8.5)), 25.0);
    }

    #[test]
    fn test_concurrent_append_and_sort() {
        let sink = Arc::new(SharedPeakResults::new());
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for i in 0..25u32 {
                        let frame = 100 - (t * 25 + i);
                        sink.add_all(vec![result(frame, 1.0, 1.0), result(frame, 2.0, 2.0)]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(sink.size(), 200);
        sink.sort_by_frame();
        let all = sink.snapshot();
        assert!(all.windows(2).all(|w| w[0].frame <= w[1].frame));
        assert_eq!(all[0].frame, 1);

        assert_eq!(sink.take().len(), 200);
        assert_eq!(sink.size(), 0);
    }

    #[test]
    fn test_empty_append_is_ignored() {
        let sink = SharedPeakResults::new();
        sink.add_all(Vec::new());
        assert_eq!(sink.size(), 0);
    }
}
