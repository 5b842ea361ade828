//! Filters that judge fits against known emitter positions.
//!
//! Used for benchmarking: each fit outcome of a frame is offered to the
//! filter, and the filter's own selection replaces the worker's results for
//! that frame.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::fit_result::FitResult;
use crate::job::CandidateFit;
use crate::peak::PeakResult;

/// Receives every fit outcome of one frame.
pub trait ResultFilter: Send {
    /// A fit that converged; `peaks` are its peaks in full-image coordinates.
    fn filter(&mut self, candidate: usize, fit: &FitResult, peaks: &[PeakResult]);

    /// A fit that failed for the candidate at full-image `position`.
    fn pass_fail(&mut self, candidate: usize, fit: &FitResult, position: DVec2);

    /// Called once after the last candidate.
    fn finalise(&mut self);

    fn results(&self) -> &[PeakResult];

    fn fit_results(&self) -> &[CandidateFit];
}

/// Serializable description of a result filter, attached to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResultFilterSpec {
    /// Keep every peak within `distance` of any target.
    Distance { targets: Vec<DVec2>, distance: f64 },
    /// Keep only the closest peak within `distance` of each target.
    OptimumDistance { targets: Vec<DVec2>, distance: f64 },
}

impl ResultFilterSpec {
    pub fn build(&self) -> Box<dyn ResultFilter> {
        match self {
            ResultFilterSpec::Distance { targets, distance } => {
                Box::new(DistanceResultFilter::new(targets.clone(), *distance))
            }
            ResultFilterSpec::OptimumDistance { targets, distance } => {
                Box::new(OptimumDistanceResultFilter::new(targets.clone(), *distance))
            }
        }
    }
}

#[inline]
fn peak_position(peak: &PeakResult) -> DVec2 {
    DVec2::new(peak.x() as f64, peak.y() as f64)
}

// ============================================================================
// Distance filter
// ============================================================================

#[derive(Debug)]
pub struct DistanceResultFilter {
    targets: Vec<DVec2>,
    distance_squared: f64,
    results: Vec<PeakResult>,
    fit_results: Vec<CandidateFit>,
}

impl DistanceResultFilter {
    pub fn new(targets: Vec<DVec2>, distance: f64) -> Self {
        Self {
            targets,
            distance_squared: distance * distance,
            results: Vec::new(),
            fit_results: Vec::new(),
        }
    }

    fn near_target(&self, position: DVec2) -> bool {
        self.targets
            .iter()
            .any(|t| t.distance_squared(position) <= self.distance_squared)
    }
}

impl ResultFilter for DistanceResultFilter {
    fn filter(&mut self, candidate: usize, fit: &FitResult, peaks: &[PeakResult]) {
        let before = self.results.len();
        for peak in peaks {
            if self.near_target(peak_position(peak)) {
                self.results.push(peak.clone());
            }
        }
        if self.results.len() > before {
            self.fit_results.push(CandidateFit::new(candidate, fit.clone()));
        }
    }

    fn pass_fail(&mut self, candidate: usize, fit: &FitResult, position: DVec2) {
        if self.near_target(position) {
            self.fit_results.push(CandidateFit::new(candidate, fit.clone()));
        }
    }

    fn finalise(&mut self) {}

    fn results(&self) -> &[PeakResult] {
        &self.results
    }

    fn fit_results(&self) -> &[CandidateFit] {
        &self.fit_results
    }
}

// ============================================================================
// Optimum distance filter
// ============================================================================

#[derive(Debug, Clone)]
struct Match {
    distance_squared: f64,
    peak: PeakResult,
    fit: CandidateFit,
}

#[derive(Debug)]
pub struct OptimumDistanceResultFilter {
    targets: Vec<DVec2>,
    distance_squared: f64,
    best: Vec<Option<Match>>,
    failures: Vec<CandidateFit>,
    results: Vec<PeakResult>,
    fit_results: Vec<CandidateFit>,
}

impl OptimumDistanceResultFilter {
    pub fn new(targets: Vec<DVec2>, distance: f64) -> Self {
        Self {
            best: vec![None; targets.len()],
            targets,
            distance_squared: distance * distance,
            failures: Vec::new(),
            results: Vec::new(),
            fit_results: Vec::new(),
        }
    }

    /// Closest target within range.
    fn nearest(&self, position: DVec2) -> Option<(usize, f64)> {
        self.targets
            .iter()
            .map(|t| t.distance_squared(position))
            .enumerate()
            .filter(|&(_, d)| d <= self.distance_squared)
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

impl ResultFilter for OptimumDistanceResultFilter {
    fn filter(&mut self, candidate: usize, fit: &FitResult, peaks: &[PeakResult]) {
        for peak in peaks {
            let Some((target, distance_squared)) = self.nearest(peak_position(peak)) else {
                continue;
            };
            let better = self.best[target]
                .as_ref()
                .is_none_or(|m| distance_squared < m.distance_squared);
            if better {
                self.best[target] = Some(Match {
                    distance_squared,
                    peak: peak.clone(),
                    fit: CandidateFit::new(candidate, fit.clone()),
                });
            }
        }
    }

    fn pass_fail(&mut self, candidate: usize, fit: &FitResult, position: DVec2) {
        if self.nearest(position).is_some() {
            self.failures.push(CandidateFit::new(candidate, fit.clone()));
        }
    }

    fn finalise(&mut self) {
        self.results.clear();
        self.fit_results.clear();
        for m in self.best.iter().flatten() {
            self.results.push(m.peak.clone());
            if !self.fit_results.iter().any(|f| f.candidate == m.fit.candidate) {
                self.fit_results.push(m.fit.clone());
            }
        }
        self.fit_results.append(&mut self.failures);
    }

    fn results(&self) -> &[PeakResult] {
        &self.results
    }

    fn fit_results(&self) -> &[CandidateFit] {
        &self.fit_results
    }
}

#[cfg(test)]
mod tests;
