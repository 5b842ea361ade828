//! Doublet detection by residual quadrant analysis.
//!
//! Two emitters fitted as one peak leave a residual pattern with opposite
//! quadrants of the same sign. The residual image is split into quadrants
//! around the fitted centre twice: along the pixel axes ("+") and along the
//! diagonals ("X"). A strong imbalance between opposite quadrant pairs
//! triggers a two-peak re-fit, which is kept only if it wins on the
//! information criterion.

use glam::DVec2;
use log::{debug, trace};

use crate::config::Config;
use crate::fit_result::{FitResult, FitStatus};
use crate::gaussian::{
    ANGLE, BACKGROUND, FitLimits, GaussianFitter, SIGNAL, X_POSITION, X_SD, Y_POSITION, Y_SD,
};

/// Iteration budget multiplier for the two-peak re-fit.
const DOUBLET_ITERATION_MULTIPLIER: usize = 4;

/// Outcome of the quadrant test on one residual image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadrantAnalysis {
    /// Larger of the two pattern scores, in `[0, 1]`.
    pub score: f64,
    /// Imbalance of the quadrants split along the pixel axes.
    pub axis_score: f64,
    /// Imbalance of the quadrants split along the diagonals.
    pub diagonal_score: f64,
    /// Unit direction along which the two peaks are separated.
    pub vector: DVec2,
}

impl QuadrantAnalysis {
    /// Two centres placed one width either side of `centre` along `vector`.
    pub fn split(&self, centre: DVec2, sd: DVec2) -> (DVec2, DVec2) {
        let offset = self.vector * sd;
        (centre - offset, centre + offset)
    }
}

/// Quadrant test of a `width x height` residual image around `(cx, cy)`.
///
/// Returns `None` when every residual is zero.
pub fn quadrant_analysis(
    residuals: &[f64],
    width: usize,
    height: usize,
    cx: f64,
    cy: f64,
) -> Option<QuadrantAnalysis> {
    debug_assert_eq!(residuals.len(), width * height);

    // "+" partition: A (+,+), B (-,+), C (-,-), D (+,-)
    let mut axis = [0.0f64; 4];
    // "X" partition: A right, B down, C left, D up
    let mut diagonal = [0.0f64; 4];
    let mut total = 0.0;

    for (index, &r) in residuals.iter().enumerate() {
        total += r.abs();
        let dx = (index % width) as f64 - cx;
        let dy = (index / width) as f64 - cy;

        if dx != 0.0 && dy != 0.0 {
            let q = match (dx > 0.0, dy > 0.0) {
                (true, true) => 0,
                (false, true) => 1,
                (false, false) => 2,
                (true, false) => 3,
            };
            axis[q] += r;
        }

        if dx.abs() != dy.abs() {
            let q = if dx.abs() > dy.abs() {
                if dx > 0.0 { 0 } else { 2 }
            } else if dy > 0.0 {
                1
            } else {
                3
            };
            diagonal[q] += r;
        }
    }

    if total <= 0.0 {
        return None;
    }

    let axis_balance = (axis[0] + axis[2]) - (axis[1] + axis[3]);
    let diagonal_balance = (diagonal[0] + diagonal[2]) - (diagonal[1] + diagonal[3]);
    let axis_score = axis_balance.abs() / total;
    let diagonal_score = diagonal_balance.abs() / total;

    // Excess along A/C of the "+" pattern means the peaks lie on the main
    // diagonal; excess along A/C of the "X" pattern means they lie on the x axis.
    let vector = if axis_score >= diagonal_score {
        if axis_balance > 0.0 {
            DVec2::new(1.0, 1.0).normalize()
        } else {
            DVec2::new(1.0, -1.0).normalize()
        }
    } else if diagonal_balance > 0.0 {
        DVec2::X
    } else {
        DVec2::Y
    };

    Some(QuadrantAnalysis {
        score: axis_score.max(diagonal_score),
        axis_score,
        diagonal_score,
        vector,
    })
}

/// Small-sample corrected information criterion from a sum of squared
/// residuals, assuming Gaussian noise.
///
/// `aic = 2(p - logL) + 2p(p + 1) / (n - p - 1)` with
/// `logL = -n/2 (ln 2π + ln(ssr / n) + 1)`. This is an approximation for
/// image data and is used only to compare models on the same region.
pub fn information_criterion(sum_of_squares: f64, n: usize, p: usize) -> f64 {
    let (n, p) = (n as f64, p as f64);
    if n - p - 1.0 <= 0.0 {
        return f64::INFINITY;
    }
    let ssr = sum_of_squares.max(f64::MIN_POSITIVE);
    let log_likelihood = -0.5 * n * ((2.0 * std::f64::consts::PI).ln() + (ssr / n).ln() + 1.0);
    2.0 * (p - log_likelihood) + 2.0 * p * (p + 1.0) / (n - p - 1.0)
}

/// Decides whether a single-peak fit is really two peaks.
#[derive(Debug, Clone, Copy)]
pub struct DoubletAnalyzer {
    residuals_threshold: f64,
    shift_factor: f64,
}

impl DoubletAnalyzer {
    pub fn new(config: &Config) -> Self {
        Self {
            residuals_threshold: config.residuals_threshold,
            shift_factor: config.doublet_shift_factor,
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.residuals_threshold < 1.0
    }

    /// A single fit qualifies if it is OK, or diverged in width but still fits
    /// inside the region.
    pub fn is_candidate(&self, fit: &FitResult, width: usize, height: usize) -> bool {
        match fit.status {
            FitStatus::Ok => fit.n_peaks == 1,
            FitStatus::WidthDiverged => {
                let limit = width.max(height) as f64 * 0.5;
                let p = fit.peak(0);
                fit.n_peaks == 1 && p[X_SD] <= limit && p[Y_SD] <= limit
            }
            _ => false,
        }
    }

    /// Re-fit `single` as two peaks if its residuals call for it.
    ///
    /// Must be called straight after `single` was fitted to `region`, since it
    /// reads the fitter's retained residuals. Returns the doublet (one or two
    /// surviving peaks) or `None` to keep the single result.
    pub fn analyse(
        &self,
        fitter: &mut GaussianFitter,
        single: &FitResult,
        region: &[f32],
        width: usize,
        height: usize,
        had_neighbours: bool,
    ) -> Option<FitResult> {
        if !self.enabled() || !self.is_candidate(single, width, height) {
            return None;
        }
        let n = width * height;
        if fitter.residuals().len() != n {
            return None;
        }

        let peak = single.peak(0);
        let centre = DVec2::new(peak[X_POSITION], peak[Y_POSITION]);
        let sd = DVec2::new(peak[X_SD], peak[Y_SD]);

        let analysis = quadrant_analysis(fitter.residuals(), width, height, centre.x, centre.y)?;
        trace!(
            "Quadrant scores: axis {:.3}, diagonal {:.3}",
            analysis.axis_score, analysis.diagonal_score
        );
        if analysis.score < self.residuals_threshold {
            return None;
        }

        let single_aic = information_criterion(fitter.sum_of_squares(), n, single.n_fitted_params);

        let (c1, c2) = analysis.split(centre, sd);
        let half_signal = peak[SIGNAL] * 0.5;
        let mut initial = Vec::with_capacity(13);
        initial.push(single.params[BACKGROUND]);
        for c in [c1, c2] {
            initial.extend_from_slice(&[half_signal, peak[ANGLE], c.x, c.y, sd.x, sd.y]);
        }

        let half_window = width.max(height) as f64 * 0.5;
        let shift = fitter.coordinate_shift(sd.x, sd.y);
        let limits = FitLimits {
            max_iterations: Some(fitter.config().max_iterations * DOUBLET_ITERATION_MULTIPLIER),
            coordinate_shift: Some(shift.map_or(half_window, |s| s.max(half_window))),
        };

        let doublet = fitter.fit_with_limits(region, width, height, 2, &initial, false, limits);
        if !doublet.is_ok() {
            trace!("Doublet fit rejected: {}", doublet.status);
            return None;
        }

        let inside = |p: &[f64]| {
            let (x, y) = (p[X_POSITION], p[Y_POSITION]);
            x >= -0.5 && x < width as f64 - 0.5 && y >= -0.5 && y < height as f64 - 0.5
        };
        if !inside(doublet.peak(0)) || !inside(doublet.peak(1)) {
            trace!("Doublet peak left the region");
            return None;
        }

        let doublet_aic =
            information_criterion(fitter.sum_of_squares(), n, doublet.n_fitted_params);
        if !(doublet_aic < single_aic) {
            trace!("Doublet AIC {doublet_aic:.2} not better than single {single_aic:.2}");
            return None;
        }

        let kept: Vec<usize> = match shift {
            Some(shift) => {
                let mut tolerance = shift * self.shift_factor;
                if had_neighbours {
                    tolerance = tolerance.min(half_window);
                }
                (0..2)
                    .filter(|&k| {
                        let p = doublet.peak(k);
                        let moved = (p[X_POSITION] - centre.x)
                            .abs()
                            .max((p[Y_POSITION] - centre.y).abs());
                        moved <= tolerance
                    })
                    .collect()
            }
            None => vec![0, 1],
        };
        if kept.is_empty() {
            trace!("Both doublet peaks moved too far");
            return None;
        }

        debug!(
            "Doublet accepted (score {:.3}, AIC {:.2} < {:.2}, {} peaks kept)",
            analysis.score,
            doublet_aic,
            single_aic,
            kept.len()
        );
        Some(doublet.with_peaks(&kept))
    }
}
