//! Outcome of a single Gaussian fit.

use strum_macros::Display;

use crate::gaussian::{BACKGROUND, PARAMETERS_PER_PEAK, peak_offset};

/// Why a fit was accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FitStatus {
    Ok,
    /// Non-finite or non-positive starting or fitted values.
    BadParameters,
    /// A width moved outside the allowed ratio of its starting value.
    WidthDiverged,
    /// Signal or height below the configured minimum.
    InsufficientSignal,
    /// The centre moved further than the allowed shift.
    CoordinatesMoved,
    FailedToConverge,
    SingularNonLinearModel,
    /// The Poisson model predicted a non-positive mean.
    InvalidLikelihood,
}

impl FitStatus {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == FitStatus::Ok
    }
}

/// Parameters and diagnostics of a fit.
///
/// Parameter arrays use the layout `[background, per peak: signal, angle, x,
/// y, x_sd, y_sd]`, with positions relative to the fitted region and the angle
/// in radians.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub status: FitStatus,
    pub degrees_of_freedom: usize,
    /// `1 - adjusted R²`.
    pub error: f64,
    pub initial_params: Vec<f64>,
    pub params: Vec<f64>,
    pub param_devs: Option<Vec<f64>>,
    pub n_peaks: usize,
    pub n_fitted_params: usize,
    /// Status specific detail, e.g. the offending shift or width ratio.
    pub status_data: Option<f64>,
    pub iterations: usize,
    pub evaluations: usize,
}

impl FitResult {
    /// A rejected fit that never produced parameters.
    pub(crate) fn failure(
        status: FitStatus,
        initial_params: &[f64],
        n_peaks: usize,
        status_data: Option<f64>,
    ) -> Self {
        debug_assert!(!status.is_ok());
        Self {
            status,
            degrees_of_freedom: 0,
            error: 1.0,
            initial_params: initial_params.to_vec(),
            params: initial_params.to_vec(),
            param_devs: None,
            n_peaks,
            n_fitted_params: 0,
            status_data,
            iterations: 0,
            evaluations: 0,
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    #[inline]
    pub fn background(&self) -> f64 {
        self.params[BACKGROUND]
    }

    /// The six parameters of peak `k`.
    #[inline]
    pub fn peak(&self, k: usize) -> &[f64] {
        let start = peak_offset(k);
        &self.params[start..start + PARAMETERS_PER_PEAK]
    }

    /// Copy of this result restricted to the listed peaks, in the given order.
    ///
    /// Degrees of freedom and fitted parameter counts are kept from the full
    /// fit since they describe the model that produced the parameters.
    pub fn with_peaks(&self, peaks: &[usize]) -> FitResult {
        let select = |values: &[f64]| {
            let mut out = Vec::with_capacity(1 + peaks.len() * PARAMETERS_PER_PEAK);
            out.push(values[BACKGROUND]);
            for &k in peaks {
                let start = peak_offset(k);
                out.extend_from_slice(&values[start..start + PARAMETERS_PER_PEAK]);
            }
            out
        };

        FitResult {
            status: self.status,
            degrees_of_freedom: self.degrees_of_freedom,
            error: self.error,
            initial_params: select(&self.initial_params),
            params: select(&self.params),
            param_devs: self.param_devs.as_deref().map(select),
            n_peaks: peaks.len(),
            n_fitted_params: self.n_fitted_params,
            status_data: self.status_data,
            iterations: self.iterations,
            evaluations: self.evaluations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_peak_result() -> FitResult {
        let params = vec![
            5.0, // background
            100.0, 0.0, 3.0, 4.0, 1.0, 1.0, // peak 0
            200.0, 0.1, 7.0, 8.0, 1.5, 1.4, // peak 1
        ];
        FitResult {
            status: FitStatus::Ok,
            degrees_of_freedom: 80,
            error: 0.01,
            initial_params: params.clone(),
            params: params.clone(),
            param_devs: Some(params.iter().map(|v| v * 0.1).collect()),
            n_peaks: 2,
            n_fitted_params: 11,
            status_data: None,
            iterations: 5,
            evaluations: 6,
        }
    }

    #[test]
    fn test_peak_slices() {
        let result = two_peak_result();
        assert_eq!(result.background(), 5.0);
        assert_eq!(result.peak(0)[0], 100.0);
        assert_eq!(result.peak(1), &[200.0, 0.1, 7.0, 8.0, 1.5, 1.4]);
    }

    #[test]
    fn test_with_peaks_selects_and_reorders() {
        let result = two_peak_result();
        let second = result.with_peaks(&[1]);
        assert_eq!(second.n_peaks, 1);
        assert_eq!(second.params, vec![5.0, 200.0, 0.1, 7.0, 8.0, 1.5, 1.4]);
        assert_eq!(second.param_devs.as_ref().unwrap()[1], 20.0);
        assert_eq!(second.n_fitted_params, 11);

        let swapped = result.with_peaks(&[1, 0]);
        assert_eq!(swapped.peak(1)[0], 100.0);
    }

    #[test]
    fn test_failure_keeps_initial_params() {
        let initial = [1.0, 2.0, 0.0, 3.0, 4.0, 1.0, 1.0];
        let result = FitResult::failure(FitStatus::BadParameters, &initial, 1, None);
        assert!(!result.is_ok());
        assert_eq!(result.params, initial.to_vec());
        assert_eq!(result.status.to_string(), "BadParameters");
    }
}
