//! Multi-peak 2D Gaussian fitting.
//!
//! [`GaussianFitter`] fits `n` elliptical Gaussians sharing one background to
//! a pixel region with a Levenberg-Marquardt loop, minimising either squared
//! residuals or the Poisson deviance, then validates the result.

mod fitter;
mod function;
mod lm_optimizer;
mod solver;


pub use fitter::{FitLimits, GaussianFitter};
pub use function::GaussianFunction;
pub use solver::GaussianSolver;

pub(crate) use function::normalise_angle;
pub(crate) use lm_optimizer::LMModel;

// ============================================================================
// Parameter layout: [background, per peak: signal, angle, x, y, x_sd, y_sd]
// ============================================================================

pub const BACKGROUND: usize = 0;
pub const SIGNAL: usize = 0;
pub const ANGLE: usize = 1;
pub const X_POSITION: usize = 2;
pub const Y_POSITION: usize = 3;
pub const X_SD: usize = 4;
pub const Y_SD: usize = 5;
pub const PARAMETERS_PER_PEAK: usize = 6;

/// Length of the parameter vector for `n_peaks` peaks.
#[inline]
pub const fn parameter_count(n_peaks: usize) -> usize {
    1 + PARAMETERS_PER_PEAK * n_peaks
}

/// Index of the first parameter (signal) of peak `k`.
#[inline]
pub const fn peak_offset(k: usize) -> usize {
    1 + PARAMETERS_PER_PEAK * k
}
