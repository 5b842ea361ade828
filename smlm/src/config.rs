//! Configuration types for the fitting engine.
//!
//! [`FitConfig`] drives a single Gaussian fit. [`Config`] wraps it with the
//! per-frame candidate, neighbour, doublet and acceptance settings used by the
//! fit workers. Both round-trip through YAML.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::error::{Error, Result};
use crate::noise::NoiseMethod;

// ============================================================================
// Enums
// ============================================================================

/// Objective minimised by the fitter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumIter,
)]
pub enum FitSolver {
    /// Sum of squared residuals.
    #[default]
    LeastSquares,
    /// Poisson deviance (maximum likelihood for photon counts).
    PoissonMle,
}

/// Which Gaussian shape parameters are free during fitting.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumIter,
)]
pub enum FitFunction {
    /// Widths fixed at the initial value; position, signal and background fitted.
    Fixed,
    /// One shared width.
    #[default]
    Circular,
    /// Independent X/Y widths, axis aligned.
    FreeCircular,
    /// Independent widths and a rotation angle.
    Free,
}

impl FitFunction {
    #[inline]
    pub fn fits_width(self) -> bool {
        !matches!(self, FitFunction::Fixed)
    }

    #[inline]
    pub fn fits_angle(self) -> bool {
        matches!(self, FitFunction::Free)
    }

    /// X and Y widths vary independently.
    #[inline]
    pub fn elliptical(self) -> bool {
        matches!(self, FitFunction::FreeCircular | FitFunction::Free)
    }
}

// ============================================================================
// Fit configuration
// ============================================================================

/// Maximum absolute step per iteration for each parameter kind.
///
/// A step `d` is damped to `d / (1 + |d| / clamp)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClampValues {
    pub background: f64,
    pub signal: f64,
    pub angle: f64,
    pub x: f64,
    pub y: f64,
    pub x_sd: f64,
    pub y_sd: f64,
}

impl Default for ClampValues {
    fn default() -> Self {
        Self {
            background: 100.0,
            signal: 1000.0,
            angle: PI,
            x: 1.0,
            y: 1.0,
            x_sd: 3.0,
            y_sd: 3.0,
        }
    }
}

/// Settings for one Gaussian fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    // -- Model ---------------------------------------------------------------
    pub solver: FitSolver,
    pub function: FitFunction,
    /// Fit the shared background. When false it stays at its initial value.
    pub fit_background: bool,
    /// Initial peak widths (standard deviation, pixels).
    pub initial_sd0: f64,
    pub initial_sd1: f64,
    /// Initial rotation angle in radians. Only fitted by [`FitFunction::Free`].
    pub initial_angle: f64,

    // -- Iteration control ---------------------------------------------------
    pub min_iterations: usize,
    pub max_iterations: usize,
    /// Objective converged when `|Δ| <= relative * mean(old, new)`.
    pub relative_threshold: f64,
    /// Objective converged when `|Δ| <= absolute`.
    pub absolute_threshold: f64,
    /// Parameters converged when every step satisfies `|Δp| <= relative * |p|`.
    /// Non-positive disables the check.
    pub parameter_relative_threshold: f64,
    /// Parameters converged when every step satisfies `|Δp| <= absolute`.
    /// Non-positive disables the check.
    pub parameter_absolute_threshold: f64,
    pub initial_lambda: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,

    // -- Clamping ------------------------------------------------------------
    pub use_clamping: bool,
    /// Halve a parameter's clamp whenever its step changes direction.
    pub use_dynamic_clamping: bool,
    pub clamp: ClampValues,

    // -- Validation ----------------------------------------------------------
    /// Allowed centre shift as a multiple of the largest initial width.
    /// Non-positive disables the check.
    pub coordinate_shift_factor: f64,
    /// Allowed ratio between fitted and initial width. Values <= 1 disable it.
    pub width_factor: f64,
    /// Smallest acceptable signal (photons).
    pub min_signal: f64,
    /// Minimum peak height as a multiple of the frame noise. Zero disables it.
    pub signal_strength: f64,
    /// Estimate parameter standard deviations from the curvature matrix.
    pub compute_deviations: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            solver: FitSolver::LeastSquares,
            function: FitFunction::Circular,
            fit_background: true,
            initial_sd0: 1.0,
            initial_sd1: 1.0,
            initial_angle: 0.0,

            min_iterations: 0,
            max_iterations: 20,
            relative_threshold: 1e-6,
            absolute_threshold: 1e-16,
            parameter_relative_threshold: 0.0,
            parameter_absolute_threshold: 0.0,
            initial_lambda: 0.01,
            lambda_up: 10.0,
            lambda_down: 0.1,

            use_clamping: false,
            use_dynamic_clamping: false,
            clamp: ClampValues::default(),

            coordinate_shift_factor: 1.0,
            width_factor: 2.0,
            min_signal: 0.0,
            signal_strength: 0.0,
            compute_deviations: false,
        }
    }
}

impl FitConfig {
    /// Set both initial widths.
    pub fn with_initial_sd(mut self, sd: f64) -> Self {
        self.initial_sd0 = sd;
        self.initial_sd1 = sd;
        self
    }

    /// Largest configured initial width.
    #[inline]
    pub fn max_initial_sd(&self) -> f64 {
        self.initial_sd0.max(self.initial_sd1)
    }

    /// Returns the first problem found, if any.
    pub fn check(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));

        if !(self.initial_sd0 > 0.0 && self.initial_sd1 > 0.0) {
            return invalid(format!(
                "initial widths must be positive, got {} and {}",
                self.initial_sd0, self.initial_sd1
            ));
        }
        if self.max_iterations == 0 {
            return invalid("max_iterations must be at least 1".into());
        }
        if self.min_iterations > self.max_iterations {
            return invalid(format!(
                "min_iterations ({}) exceeds max_iterations ({})",
                self.min_iterations, self.max_iterations
            ));
        }
        if self.relative_threshold < 0.0 || self.absolute_threshold < 0.0 {
            return invalid("objective thresholds must be non-negative".into());
        }
        if !(self.initial_lambda > 0.0) {
            return invalid(format!(
                "initial_lambda must be positive, got {}",
                self.initial_lambda
            ));
        }
        if !(self.lambda_up > 1.0) || !(self.lambda_down > 0.0 && self.lambda_down < 1.0) {
            return invalid(format!(
                "lambda factors must satisfy up > 1 and 0 < down < 1, got {} and {}",
                self.lambda_up, self.lambda_down
            ));
        }
        if self.use_clamping {
            let c = &self.clamp;
            let values = [c.background, c.signal, c.angle, c.x, c.y, c.x_sd, c.y_sd];
            if values.iter().any(|&v| !(v > 0.0)) {
                return invalid("clamp values must be positive".into());
            }
        }
        if self.signal_strength < 0.0 {
            return invalid("signal_strength must be non-negative".into());
        }
        Ok(())
    }

    /// Panics if the configuration is invalid.
    pub fn validate(&self) {
        if let Err(err) = self.check() {
            panic!("{err}");
        }
    }
}

// ============================================================================
// Engine configuration
// ============================================================================

/// Complete configuration for the fit workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fit: FitConfig,

    // -- Candidates ----------------------------------------------------------
    /// Edge exclusion in pixels. `None` uses the spot filter's border.
    pub border: Option<usize>,
    /// Half-width of the fit region as a multiple of the largest initial width.
    pub fitting_width: f64,
    pub noise_method: NoiseMethod,
    /// Skip fitting and emit one unfitted result per candidate.
    pub maxima_identification_only: bool,

    // -- Neighbours ----------------------------------------------------------
    pub include_neighbours: bool,
    /// Fraction of the candidate height a neighbour must reach to be co-fitted.
    pub neighbour_height_threshold: f64,

    // -- Doublets ------------------------------------------------------------
    /// Quadrant asymmetry score that triggers a doublet fit. Values >= 1 disable it.
    pub residuals_threshold: f64,
    /// Multiplier on the allowed centre shift for each doublet peak.
    pub doublet_shift_factor: f64,

    // -- Acceptance ----------------------------------------------------------
    /// Results closer than this to an earlier result in the frame are dropped.
    /// Zero disables the check.
    pub duplicate_distance: f64,
    /// Consecutive candidates without an accepted peak before the frame is
    /// abandoned. Zero disables the limit.
    pub failures_limit: usize,

    // -- Engine --------------------------------------------------------------
    /// Jobs the queue holds before `run` blocks.
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fit: FitConfig::default(),

            border: None,
            fitting_width: 3.0,
            noise_method: NoiseMethod::QuickResidualsLeastMedianOfSquares,
            maxima_identification_only: false,

            include_neighbours: true,
            neighbour_height_threshold: 0.3,

            residuals_threshold: 1.0,
            doublet_shift_factor: 2.0,

            duplicate_distance: 0.5,
            failures_limit: 3,

            queue_capacity: 10,
        }
    }
}

impl Config {
    /// Half-width of the square fit region around each candidate.
    pub fn fitting_radius(&self) -> usize {
        let radius = (self.fitting_width * self.fit.max_initial_sd()).ceil();
        if radius.is_finite() && radius >= 1.0 {
            radius as usize
        } else {
            1
        }
    }

    /// Returns the first problem found, if any.
    pub fn check(&self) -> Result<()> {
        self.fit.check()?;

        let invalid = |msg: String| Err(Error::InvalidConfig(msg));
        if !(self.fitting_width > 0.0) {
            return invalid(format!(
                "fitting_width must be positive, got {}",
                self.fitting_width
            ));
        }
        if !(0.0..=1.0).contains(&self.neighbour_height_threshold) {
            return invalid(format!(
                "neighbour_height_threshold must be in [0, 1], got {}",
                self.neighbour_height_threshold
            ));
        }
        if self.residuals_threshold < 0.0 {
            return invalid("residuals_threshold must be non-negative".into());
        }
        if !(self.doublet_shift_factor > 0.0) {
            return invalid("doublet_shift_factor must be positive".into());
        }
        if self.duplicate_distance < 0.0 {
            return invalid("duplicate_distance must be non-negative".into());
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be at least 1".into());
        }
        Ok(())
    }

    /// Panics if the configuration is invalid.
    pub fn validate(&self) {
        if let Err(err) = self.check() {
            panic!("{err}");
        }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = common::yaml_format::from_yaml(yaml)?;
        config.check()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        common::yaml_format::to_yaml(self)
    }
}
