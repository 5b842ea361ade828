//! Fit driver: starting values, the optimizer run, validation and
//! diagnostics.

use std::f64::consts::PI;

use log::trace;

use super::function::GaussianFunction;
use super::lm_optimizer::{LMConfig, LMModel, LMStatus, optimize};
use super::solver::GaussianSolver;
use super::{
    ANGLE, BACKGROUND, PARAMETERS_PER_PEAK, SIGNAL, X_POSITION, X_SD, Y_POSITION, Y_SD,
    parameter_count, peak_offset,
};
use crate::config::{FitConfig, FitFunction};
use crate::fit_result::{FitResult, FitStatus};
use crate::math::linear_solver::invert;

/// Per-call overrides used when re-fitting (multi-peak and doublet fits).
#[derive(Debug, Clone, Copy, Default)]
pub struct FitLimits {
    /// Replaces the configured maximum iterations.
    pub max_iterations: Option<usize>,
    /// Replaces the allowed centre shift (pixels).
    pub coordinate_shift: Option<f64>,
}

/// Levenberg-Marquardt Gaussian fitter.
///
/// Keeps the residuals and sums of squares of the last fit for callers that
/// need them (doublet analysis).
#[derive(Debug)]
pub struct GaussianFitter {
    config: FitConfig,
    solver: GaussianSolver,
    noise: f64,
    data: Vec<f64>,
    residuals: Vec<f64>,
    sum_of_squares: f64,
    total_sum_of_squares: f64,
}

impl GaussianFitter {
    pub fn new(config: FitConfig) -> Self {
        config.validate();
        Self {
            solver: config.solver.into(),
            config,
            noise: 0.0,
            data: Vec::new(),
            residuals: Vec::new(),
            sum_of_squares: 0.0,
            total_sum_of_squares: 0.0,
        }
    }

    #[inline]
    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Frame noise used by the signal-strength check.
    pub fn set_noise(&mut self, noise: f64) {
        self.noise = noise;
    }

    /// Residuals `data - model` of the last fit; empty if it never ran.
    #[inline]
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    #[inline]
    pub fn sum_of_squares(&self) -> f64 {
        self.sum_of_squares
    }

    #[inline]
    pub fn total_sum_of_squares(&self) -> f64 {
        self.total_sum_of_squares
    }

    /// Allowed centre shift for a peak starting with widths `(sx, sy)`.
    /// `None` when the check is disabled.
    pub fn coordinate_shift(&self, sx: f64, sy: f64) -> Option<f64> {
        (self.config.coordinate_shift_factor > 0.0)
            .then(|| self.config.coordinate_shift_factor * sx.max(sy))
    }

    /// Fit `n_peaks` Gaussians to `region`.
    ///
    /// `initial` holds `1 + 6 × n_peaks` starting values with positions in
    /// region pixels. With `estimate_amplitude` the signals are re-estimated
    /// from the data instead of taken from `initial`.
    pub fn fit(
        &mut self,
        region: &[f32],
        width: usize,
        height: usize,
        n_peaks: usize,
        initial: &[f64],
        estimate_amplitude: bool,
    ) -> FitResult {
        self.fit_with_limits(
            region,
            width,
            height,
            n_peaks,
            initial,
            estimate_amplitude,
            FitLimits::default(),
        )
    }

    /// Residuals and sums of squares of `params` on `region` without fitting,
    /// retained as if they came from a fit.
    pub fn evaluate_residuals(&mut self, region: &[f32], width: usize, height: usize, params: &[f64]) {
        debug_assert_eq!(region.len(), width * height);
        debug_assert_eq!((params.len() - 1) % PARAMETERS_PER_PEAK, 0);

        let n_peaks = (params.len() - 1) / PARAMETERS_PER_PEAK;
        let function =
            GaussianFunction::new(self.config.function, self.config.fit_background, n_peaks);
        self.data.clear();
        self.data.extend(region.iter().map(|&v| v as f64));
        self.compute_residuals(&function, params, width);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn fit_with_limits(
        &mut self,
        region: &[f32],
        width: usize,
        height: usize,
        n_peaks: usize,
        initial: &[f64],
        estimate_amplitude: bool,
        limits: FitLimits,
    ) -> FitResult {
        debug_assert_eq!(region.len(), width * height);

        self.residuals.clear();
        self.sum_of_squares = 0.0;
        self.total_sum_of_squares = 0.0;

        if n_peaks == 0 || region.is_empty() || initial.len() != parameter_count(n_peaks) {
            return FitResult::failure(FitStatus::BadParameters, initial, n_peaks, None);
        }

        self.data.clear();
        self.data.extend(region.iter().map(|&v| v as f64));

        let function =
            GaussianFunction::new(self.config.function, self.config.fit_background, n_peaks);
        let n_fitted = function.fitted_indices().len();
        if self.data.len() <= n_fitted {
            return FitResult::failure(FitStatus::BadParameters, initial, n_peaks, None);
        }

        let mut start = initial.to_vec();
        function.constrain(&mut start);
        if estimate_amplitude {
            self.estimate_signals(&function, &mut start, width, height);
        }
        if let Some(bad) = self.check_start(&start, n_peaks) {
            return FitResult::failure(FitStatus::BadParameters, &start, n_peaks, Some(bad));
        }

        let lm_config = self.lm_config(&function, limits.max_iterations);
        let outcome = optimize(&function, self.solver, &self.data, width, &start, &lm_config);
        trace!(
            "LM {:?} after {} iterations ({} evaluations), value {:.4e}",
            outcome.status, outcome.iterations, outcome.evaluations, outcome.value
        );

        self.compute_residuals(&function, &outcome.params, width);

        let degrees_of_freedom = self.data.len() - n_fitted;
        let mut result = FitResult {
            status: FitStatus::Ok,
            degrees_of_freedom,
            error: self.error_metric(n_fitted),
            initial_params: start,
            params: outcome.params,
            param_devs: None,
            n_peaks,
            n_fitted_params: n_fitted,
            status_data: None,
            iterations: outcome.iterations,
            evaluations: outcome.evaluations,
        };

        let (status, status_data) = match outcome.status {
            LMStatus::Converged => self.validate(&result, width, height, limits),
            LMStatus::MaxIterations | LMStatus::Stalled => (FitStatus::FailedToConverge, None),
            LMStatus::Singular => (FitStatus::SingularNonLinearModel, None),
            LMStatus::InvalidModel => (FitStatus::InvalidLikelihood, None),
        };
        result.status = status;
        result.status_data = status_data;

        if status.is_ok() && self.config.compute_deviations {
            result.param_devs =
                self.deviations(&function, &outcome.curvature, outcome.value, degrees_of_freedom);
        }
        result
    }

    fn lm_config(&self, function: &GaussianFunction, max_iterations: Option<usize>) -> LMConfig {
        let c = &self.config;
        let clamp = c.use_clamping.then(|| {
            function
                .fitted_indices()
                .iter()
                .map(|&index| {
                    if index == BACKGROUND {
                        return c.clamp.background;
                    }
                    match (index - 1) % PARAMETERS_PER_PEAK {
                        SIGNAL => c.clamp.signal,
                        ANGLE => c.clamp.angle,
                        X_POSITION => c.clamp.x,
                        Y_POSITION => c.clamp.y,
                        X_SD => c.clamp.x_sd,
                        _ => c.clamp.y_sd,
                    }
                })
                .collect()
        });

        LMConfig {
            min_iterations: c.min_iterations,
            max_iterations: max_iterations
                .unwrap_or(c.max_iterations)
                .max(c.min_iterations),
            relative_threshold: c.relative_threshold,
            absolute_threshold: c.absolute_threshold,
            parameter_relative_threshold: c.parameter_relative_threshold,
            parameter_absolute_threshold: c.parameter_absolute_threshold,
            initial_lambda: c.initial_lambda,
            lambda_up: c.lambda_up,
            lambda_down: c.lambda_down,
            clamp,
            dynamic_clamp: c.use_dynamic_clamping,
        }
    }

    /// Single peaks take the background-subtracted region sum; otherwise each
    /// peak takes its height above background at the nearest pixel.
    fn estimate_signals(
        &self,
        function: &GaussianFunction,
        params: &mut [f64],
        width: usize,
        height: usize,
    ) {
        let background = params[BACKGROUND];
        let n_peaks = function.n_peaks();

        if n_peaks == 1 {
            let sum: f64 = self.data.iter().map(|&z| z - background).sum();
            if sum > 0.0 {
                params[peak_offset(0) + SIGNAL] = sum;
                return;
            }
        }

        for k in 0..n_peaks {
            let base = peak_offset(k);
            let x = nearest_pixel(params[base + X_POSITION], width);
            let y = nearest_pixel(params[base + Y_POSITION], height);
            let (sx, sy) = function.widths(&params[base..]);
            let amplitude = self.data[y * width + x] - background;
            params[base + SIGNAL] = amplitude * 2.0 * PI * sx * sy;
        }
    }

    /// Returns the offending value if the starting point is unusable.
    fn check_start(&self, start: &[f64], n_peaks: usize) -> Option<f64> {
        if let Some(&bad) = start.iter().find(|v| !v.is_finite()) {
            return Some(bad);
        }
        for k in 0..n_peaks {
            let base = peak_offset(k);
            for index in [base + SIGNAL, base + X_SD, base + Y_SD] {
                if start[index] <= 0.0 {
                    return Some(start[index]);
                }
            }
        }
        None
    }

    /// Status of a converged fit, with the offending value on rejection.
    fn validate(
        &self,
        result: &FitResult,
        width: usize,
        height: usize,
        limits: FitLimits,
    ) -> (FitStatus, Option<f64>) {
        let c = &self.config;
        let params = &result.params;
        let start = &result.initial_params;

        if let Some(&bad) = params.iter().find(|v| !v.is_finite()) {
            return (FitStatus::BadParameters, Some(bad));
        }

        let max_width = width.max(height) as f64 * 0.5;
        for k in 0..result.n_peaks {
            let base = peak_offset(k);
            let p = &params[base..base + PARAMETERS_PER_PEAK];
            let s = &start[base..base + PARAMETERS_PER_PEAK];

            let signal = p[SIGNAL];
            if signal <= 0.0 || signal <= c.min_signal {
                return (FitStatus::InsufficientSignal, Some(signal));
            }
            if c.signal_strength > 0.0 && self.noise > 0.0 {
                let height = signal / (2.0 * PI * p[X_SD] * p[Y_SD]);
                if height < c.signal_strength * self.noise {
                    return (FitStatus::InsufficientSignal, Some(height / self.noise));
                }
            }

            let allowed = limits
                .coordinate_shift
                .or_else(|| self.coordinate_shift(s[X_SD], s[Y_SD]));
            if let Some(allowed) = allowed {
                let shift = (p[X_POSITION] - s[X_POSITION])
                    .abs()
                    .max((p[Y_POSITION] - s[Y_POSITION]).abs());
                if shift > allowed {
                    return (FitStatus::CoordinatesMoved, Some(shift));
                }
            }

            if c.function.fits_width() {
                for (sd, initial) in [(p[X_SD], s[X_SD]), (p[Y_SD], s[Y_SD])] {
                    if sd > max_width {
                        return (FitStatus::WidthDiverged, Some(sd));
                    }
                    if c.width_factor > 1.0 {
                        let ratio = sd / initial;
                        if ratio > c.width_factor || ratio < 1.0 / c.width_factor {
                            return (FitStatus::WidthDiverged, Some(ratio));
                        }
                    }
                }
            }
        }

        (FitStatus::Ok, None)
    }

    fn compute_residuals(&mut self, function: &GaussianFunction, params: &[f64], width: usize) {
        let n = self.data.len() as f64;
        let mean = self.data.iter().sum::<f64>() / n;

        let mut ssr = 0.0;
        let mut sst = 0.0;
        self.residuals.clear();
        self.residuals.reserve(self.data.len());
        for (index, &z) in self.data.iter().enumerate() {
            let f = function.evaluate((index % width) as f64, (index / width) as f64, params);
            let r = z - f;
            self.residuals.push(r);
            ssr += r * r;
            sst += (z - mean) * (z - mean);
        }
        self.sum_of_squares = ssr;
        self.total_sum_of_squares = sst;
    }

    /// `1 - adjusted R²` of the last fit.
    fn error_metric(&self, n_fitted: usize) -> f64 {
        let n = self.data.len() as f64;
        let p = n_fitted as f64;
        let (ssr, sst) = (self.sum_of_squares, self.total_sum_of_squares);
        if !ssr.is_finite() {
            return 1.0;
        }
        if sst <= 0.0 {
            return if ssr <= 0.0 { 0.0 } else { 1.0 };
        }
        if n - p - 1.0 <= 0.0 {
            return ssr / sst;
        }
        (ssr / sst) * (n - 1.0) / (n - p - 1.0)
    }

    /// Standard deviations from the inverted curvature matrix.
    fn deviations(
        &self,
        function: &GaussianFunction,
        curvature: &[f64],
        value: f64,
        degrees_of_freedom: usize,
    ) -> Option<Vec<f64>> {
        let fitted = function.fitted_indices();
        let m = fitted.len();
        let covariance = invert(curvature, m)?;
        let scale = self.solver.covariance_scale(value, degrees_of_freedom);

        let mut devs = vec![0.0; parameter_count(function.n_peaks())];
        for (i, &index) in fitted.iter().enumerate() {
            let variance = covariance[i * m + i] * scale;
            devs[index] = if variance > 0.0 { variance.sqrt() } else { 0.0 };
        }
        if function.function() == FitFunction::Circular {
            for k in 0..function.n_peaks() {
                let base = peak_offset(k);
                devs[base + Y_SD] = devs[base + X_SD];
            }
        }
        Some(devs)
    }
}

#[inline]
fn nearest_pixel(position: f64, size: usize) -> usize {
    if position.is_finite() {
        (position.round().max(0.0) as usize).min(size - 1)
    } else {
        0
    }
}
