//! Frame noise and background estimation.
//!
//! Noise is estimated once per frame and feeds the fitter's signal-strength
//! check and every reported result. The residual methods work on the
//! difference between each interior pixel and its 3x3 mean, which removes
//! slowly varying background and most of the spot signal.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::math::statistics::{MAD_TO_SIGMA, lowest_mean_mut, mean_and_std, median_mut};

/// Ratio between the standard deviation of a pixel and that of its residual
/// against the 3x3 mean: `sqrt(9 / 8)`.
const RESIDUAL_TO_SIGMA: f64 = 1.060_660_171_779_821_2;

/// E[z² | |z| < Φ⁻¹(3/4)] for a standard normal. Rescales the mean of the
/// lowest half of squared residuals to a variance.
const TRIMMED_SQUARE_CONSISTENCY: f64 = 0.142_651_835_488_518_8;

/// Noise estimator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumIter,
)]
pub enum NoiseMethod {
    /// Standard deviation of every pixel.
    AllPixels,
    /// RMS distance of the pixels below the median from the median.
    LowestPixels,
    /// Median of squared residuals, scaled for a normal distribution.
    ResidualsLeastMedianOfSquares,
    /// Mean of the lowest half of squared residuals, scaled for a normal distribution.
    ResidualsLeastTrimmedSquares,
    /// RMS of all residuals.
    ResidualsLeastMeanSquare,
    /// Least median of squares over every other row and column.
    #[default]
    QuickResidualsLeastMedianOfSquares,
}

/// Estimate the noise standard deviation of a `width x height` frame.
pub fn estimate_noise(data: &[f32], width: usize, height: usize, method: NoiseMethod) -> f32 {
    debug_assert_eq!(data.len(), width * height);

    if data.is_empty() {
        return 0.0;
    }

    let noise = match method {
        NoiseMethod::AllPixels => all_pixels(data),
        NoiseMethod::LowestPixels => lowest_pixels(data),
        NoiseMethod::ResidualsLeastMedianOfSquares
        | NoiseMethod::ResidualsLeastTrimmedSquares
        | NoiseMethod::ResidualsLeastMeanSquare
        | NoiseMethod::QuickResidualsLeastMedianOfSquares => {
            let step = if method == NoiseMethod::QuickResidualsLeastMedianOfSquares {
                2
            } else {
                1
            };
            let mut squares = squared_residuals(data, width, height, step);
            if squares.is_empty() {
                // Too small for a 3x3 neighbourhood.
                all_pixels(data)
            } else {
                residual_sigma(&mut squares, method) * RESIDUAL_TO_SIGMA
            }
        }
    };

    noise as f32
}

/// Mean pixel value of the frame.
pub fn estimate_background(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    (data.iter().map(|&v| v as f64).sum::<f64>() / data.len() as f64) as f32
}

fn all_pixels(data: &[f32]) -> f64 {
    mean_and_std(data.iter().map(|&v| v as f64)).1
}

fn lowest_pixels(data: &[f32]) -> f64 {
    let mut values: Vec<f64> = data.iter().map(|&v| v as f64).collect();
    let median = median_mut(&mut values);
    let (count, sum) = values
        .iter()
        .filter(|&&v| v < median)
        .fold((0usize, 0.0), |(n, s), &v| (n + 1, s + (median - v) * (median - v)));
    if count == 0 {
        return 0.0;
    }
    (sum / count as f64).sqrt()
}

/// Squared residuals of interior pixels against their 3x3 mean, sampling every
/// `step`-th row and column.
fn squared_residuals(data: &[f32], width: usize, height: usize, step: usize) -> Vec<f64> {
    if width < 3 || height < 3 {
        return Vec::new();
    }

    let mut squares = Vec::with_capacity(((width - 2) / step + 1) * ((height - 2) / step + 1));
    for y in (1..height - 1).step_by(step) {
        for x in (1..width - 1).step_by(step) {
            let mut sum = 0.0f64;
            for row in y - 1..=y + 1 {
                let start = row * width + x - 1;
                sum += data[start..start + 3].iter().map(|&v| v as f64).sum::<f64>();
            }
            let residual = data[y * width + x] as f64 - sum / 9.0;
            squares.push(residual * residual);
        }
    }
    squares
}

fn residual_sigma(squares: &mut [f64], method: NoiseMethod) -> f64 {
    match method {
        NoiseMethod::ResidualsLeastMedianOfSquares
        | NoiseMethod::QuickResidualsLeastMedianOfSquares => {
            MAD_TO_SIGMA * median_mut(squares).sqrt()
        }
        NoiseMethod::ResidualsLeastTrimmedSquares => {
            let count = squares.len().div_ceil(2);
            (lowest_mean_mut(squares, count) / TRIMMED_SQUARE_CONSISTENCY).sqrt()
        }
        NoiseMethod::ResidualsLeastMeanSquare => {
            (squares.iter().sum::<f64>() / squares.len() as f64).sqrt()
        }
        NoiseMethod::AllPixels | NoiseMethod::LowestPixels => {
            unreachable!("not a residual method")
        }
    }
}

#[cfg(test)]
mod tests;
