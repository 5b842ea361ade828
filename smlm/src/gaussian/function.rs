//! Multi-peak elliptical 2D Gaussian model.
//!
//! For each peak with signal `S`, centre `(x0, y0)`, widths `(sx, sy)` and
//! rotation `θ`:
//!
//! ```text
//! f(x, y) = S / (2π sx sy) × exp(-(a dx² + 2b dx dy + c dy²))
//! a = cos²θ / 2sx² + sin²θ / 2sy²
//! b = -sin2θ / 4sx² + sin2θ / 4sy²
//! c = sin²θ / 2sx² + cos²θ / 2sy²
//! ```
//!
//! plus one shared background. Pixel centres sit on integer coordinates of
//! the region.

use std::f64::consts::{FRAC_PI_2, PI};

use super::lm_optimizer::LMModel;
use super::{
    ANGLE, BACKGROUND, SIGNAL, X_POSITION, X_SD, Y_POSITION, Y_SD, parameter_count, peak_offset,
};
use crate::config::FitFunction;

/// Slot of each peak parameter in the Jacobian, or `None` when it is fixed.
#[derive(Debug, Clone, Copy, Default)]
struct PeakSlots {
    signal: Option<usize>,
    angle: Option<usize>,
    x: Option<usize>,
    y: Option<usize>,
    x_sd: Option<usize>,
    y_sd: Option<usize>,
}

/// Gaussian model with a fixed peak count and set of free parameters.
#[derive(Debug, Clone)]
pub struct GaussianFunction {
    function: FitFunction,
    n_peaks: usize,
    fitted: Vec<usize>,
    background_slot: Option<usize>,
    slots: Vec<PeakSlots>,
}

impl GaussianFunction {
    pub fn new(function: FitFunction, fit_background: bool, n_peaks: usize) -> Self {
        let mut fitted = Vec::with_capacity(parameter_count(n_peaks));
        let slot = |index: usize, fitted: &mut Vec<usize>| {
            fitted.push(index);
            Some(fitted.len() - 1)
        };

        let background_slot = if fit_background {
            slot(BACKGROUND, &mut fitted)
        } else {
            None
        };

        let slots = (0..n_peaks)
            .map(|k| {
                let base = peak_offset(k);
                let mut s = PeakSlots {
                    signal: slot(base + SIGNAL, &mut fitted),
                    ..Default::default()
                };
                if function.fits_angle() {
                    s.angle = slot(base + ANGLE, &mut fitted);
                }
                s.x = slot(base + X_POSITION, &mut fitted);
                s.y = slot(base + Y_POSITION, &mut fitted);
                if function.fits_width() {
                    s.x_sd = slot(base + X_SD, &mut fitted);
                    if function.elliptical() {
                        s.y_sd = slot(base + Y_SD, &mut fitted);
                    }
                }
                s
            })
            .collect();

        Self {
            function,
            n_peaks,
            fitted,
            background_slot,
            slots,
        }
    }

    #[inline]
    pub fn function(&self) -> FitFunction {
        self.function
    }

    #[inline]
    pub fn n_peaks(&self) -> usize {
        self.n_peaks
    }

    /// Indices of the free parameters within the full parameter vector.
    #[inline]
    pub fn fitted_indices(&self) -> &[usize] {
        &self.fitted
    }

    /// Widths used for peak parameters `p`. Circular peaks share the X width.
    #[inline]
    pub fn widths(&self, p: &[f64]) -> (f64, f64) {
        match self.function {
            FitFunction::Circular => (p[X_SD], p[X_SD]),
            _ => (p[X_SD], p[Y_SD]),
        }
    }

    #[inline]
    fn angle(&self, p: &[f64]) -> f64 {
        if self.function.fits_angle() {
            p[ANGLE]
        } else {
            0.0
        }
    }

    fn peak_value(&self, x: f64, y: f64, p: &[f64]) -> f64 {
        let (sx, sy) = self.widths(p);
        let (sin, cos) = self.angle(p).sin_cos();
        let sin2 = 2.0 * sin * cos;
        let (sx2, sy2) = (sx * sx, sy * sy);

        let a = cos * cos / (2.0 * sx2) + sin * sin / (2.0 * sy2);
        let b = -sin2 / (4.0 * sx2) + sin2 / (4.0 * sy2);
        let c = sin * sin / (2.0 * sx2) + cos * cos / (2.0 * sy2);

        let dx = x - p[X_POSITION];
        let dy = y - p[Y_POSITION];
        let q = a * dx * dx + 2.0 * b * dx * dy + c * dy * dy;
        p[SIGNAL] / (2.0 * PI * sx * sy) * (-q).exp()
    }

    /// Adds the partial derivatives of one peak into `jacobian`.
    fn peak_value_and_jacobian(
        &self,
        x: f64,
        y: f64,
        p: &[f64],
        s: &PeakSlots,
        jacobian: &mut [f64],
    ) -> f64 {
        let (sx, sy) = self.widths(p);
        let theta = self.angle(p);
        let (sin, cos) = theta.sin_cos();
        let (sin2, cos2) = (2.0 * theta).sin_cos();
        let (sin_sq, cos_sq) = (sin * sin, cos * cos);
        let (sx2, sy2) = (sx * sx, sy * sy);

        let a = cos_sq / (2.0 * sx2) + sin_sq / (2.0 * sy2);
        let b = -sin2 / (4.0 * sx2) + sin2 / (4.0 * sy2);
        let c = sin_sq / (2.0 * sx2) + cos_sq / (2.0 * sy2);

        let dx = x - p[X_POSITION];
        let dy = y - p[Y_POSITION];
        let (dx2, dxdy, dy2) = (dx * dx, dx * dy, dy * dy);

        let norm = 1.0 / (2.0 * PI * sx * sy);
        let e = (-(a * dx2 + 2.0 * b * dxdy + c * dy2)).exp();
        let g = p[SIGNAL] * norm * e;

        if let Some(i) = s.signal {
            jacobian[i] += norm * e;
        }
        if let Some(i) = s.x {
            jacobian[i] += g * (2.0 * a * dx + 2.0 * b * dy);
        }
        if let Some(i) = s.y {
            jacobian[i] += g * (2.0 * b * dx + 2.0 * c * dy);
        }

        if s.x_sd.is_some() {
            let sx3 = sx2 * sx;
            let da = -cos_sq / sx3;
            let db = sin2 / (2.0 * sx3);
            let dc = -sin_sq / sx3;
            let d_sx = -g / sx - g * (da * dx2 + 2.0 * db * dxdy + dc * dy2);

            let sy3 = sy2 * sy;
            let da = -sin_sq / sy3;
            let db = -sin2 / (2.0 * sy3);
            let dc = -cos_sq / sy3;
            let d_sy = -g / sy - g * (da * dx2 + 2.0 * db * dxdy + dc * dy2);

            match (s.x_sd, s.y_sd) {
                (Some(i), Some(j)) => {
                    jacobian[i] += d_sx;
                    jacobian[j] += d_sy;
                }
                (Some(i), None) => jacobian[i] += d_sx + d_sy,
                _ => {}
            }
        }

        if let Some(i) = s.angle {
            let k = 1.0 / (2.0 * sy2) - 1.0 / (2.0 * sx2);
            let da = sin2 * k;
            let db = cos2 * k;
            let dc = -sin2 * k;
            jacobian[i] += -g * (da * dx2 + 2.0 * db * dxdy + dc * dy2);
        }

        g
    }
}

impl LMModel for GaussianFunction {
    #[inline]
    fn fitted_indices(&self) -> &[usize] {
        &self.fitted
    }

    fn evaluate(&self, x: f64, y: f64, params: &[f64]) -> f64 {
        debug_assert_eq!(params.len(), parameter_count(self.n_peaks));
        let mut value = params[BACKGROUND];
        for k in 0..self.n_peaks {
            let base = peak_offset(k);
            value += self.peak_value(x, y, &params[base..]);
        }
        value
    }

    fn evaluate_and_jacobian(&self, x: f64, y: f64, params: &[f64], jacobian: &mut [f64]) -> f64 {
        debug_assert_eq!(jacobian.len(), self.fitted.len());
        jacobian.fill(0.0);

        if let Some(i) = self.background_slot {
            jacobian[i] = 1.0;
        }
        let mut value = params[BACKGROUND];
        for (k, slots) in self.slots.iter().enumerate() {
            let base = peak_offset(k);
            value += self.peak_value_and_jacobian(x, y, &params[base..], slots, jacobian);
        }
        value
    }

    fn constrain(&self, params: &mut [f64]) {
        for k in 0..self.n_peaks {
            let base = peak_offset(k);
            params[base + X_SD] = params[base + X_SD].abs();
            params[base + Y_SD] = params[base + Y_SD].abs();
            if self.function == FitFunction::Circular {
                params[base + Y_SD] = params[base + X_SD];
            }
            if self.function.fits_angle() {
                params[base + ANGLE] = normalise_angle(params[base + ANGLE]);
            }
        }
    }
}

/// Map an ellipse rotation into `[-π/2, π/2)`; rotating by π is a no-op.
pub(crate) fn normalise_angle(theta: f64) -> f64 {
    if !theta.is_finite() {
        return theta;
    }
    (theta + FRAC_PI_2).rem_euclid(PI) - FRAC_PI_2
}
