//! Spot candidate ranking.
//!
//! A [`SpotFilter`] preprocesses a frame and returns local maxima ordered by
//! descending intensity. The workers share one filter across threads.

use serde::{Deserialize, Serialize};

/// A candidate peak: integer pixel position and its ranking intensity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    pub x: usize,
    pub y: usize,
    pub intensity: f32,
}

impl Spot {
    pub fn new(x: usize, y: usize, intensity: f32) -> Self {
        Self { x, y, intensity }
    }
}

/// Candidate finder. Must be shareable between fit workers.
pub trait SpotFilter: Send + Sync {
    /// Candidates sorted by descending intensity.
    fn rank(&self, data: &[f32], width: usize, height: usize) -> Vec<Spot>;

    /// The smoothed image the candidates were picked from.
    fn preprocess_data(&self, data: &[f32], width: usize, height: usize) -> Vec<f32>;

    /// Pixels at the frame edge that never produce candidates.
    fn border(&self) -> usize;

    /// Whether spot intensities are on the same scale as the raw pixels.
    /// Difference filters report relative intensities.
    fn is_absolute_intensity(&self) -> bool;
}

/// Image preprocessing applied before maxima detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DataProcessor {
    Raw,
    /// Mean over a `(2r+1)²` box, clipped at the frame edge.
    Average { radius: usize },
    Gaussian { sigma: f64 },
    /// `Average(inner) - Average(outer)`; suppresses local background.
    Difference { inner: usize, outer: usize },
}

impl Default for DataProcessor {
    fn default() -> Self {
        DataProcessor::Average { radius: 1 }
    }
}

impl DataProcessor {
    pub fn process(&self, data: &[f32], width: usize, height: usize) -> Vec<f32> {
        debug_assert_eq!(data.len(), width * height);

        match *self {
            DataProcessor::Raw => data.to_vec(),
            DataProcessor::Average { radius } => {
                let kernel = vec![1.0; 2 * radius + 1];
                separable_filter(data, width, height, &kernel)
            }
            DataProcessor::Gaussian { sigma } => {
                if sigma <= 0.0 {
                    return data.to_vec();
                }
                separable_filter(data, width, height, &gaussian_kernel(sigma))
            }
            DataProcessor::Difference { inner, outer } => {
                let a = DataProcessor::Average { radius: inner }.process(data, width, height);
                let b = DataProcessor::Average { radius: outer }.process(data, width, height);
                a.iter().zip(&b).map(|(&a, &b)| a - b).collect()
            }
        }
    }

    pub fn is_absolute_intensity(&self) -> bool {
        !matches!(self, DataProcessor::Difference { .. })
    }
}

/// Unnormalised 1D Gaussian kernel truncated at 3σ.
fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (3.0 * sigma).ceil() as isize;
    (-radius..=radius)
        .map(|i| (-(i * i) as f64 / (2.0 * sigma * sigma)).exp())
        .collect()
}

/// Row then column pass of an odd-length kernel. Taps falling outside the
/// frame are dropped and the remaining weights renormalised.
fn separable_filter(data: &[f32], width: usize, height: usize, kernel: &[f64]) -> Vec<f32> {
    debug_assert!(kernel.len() % 2 == 1);
    let radius = kernel.len() / 2;

    let mut rows = vec![0.0f64; data.len()];
    for y in 0..height {
        let row = &data[y * width..(y + 1) * width];
        for x in 0..width {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius).min(width - 1);
            let (mut sum, mut weight) = (0.0, 0.0);
            for (xi, &v) in row.iter().enumerate().take(hi + 1).skip(lo) {
                let k = kernel[xi + radius - x];
                sum += k * v as f64;
                weight += k;
            }
            rows[y * width + x] = sum / weight;
        }
    }

    let mut out = vec![0.0f32; data.len()];
    for x in 0..width {
        for y in 0..height {
            let lo = y.saturating_sub(radius);
            let hi = (y + radius).min(height - 1);
            let (mut sum, mut weight) = (0.0, 0.0);
            for yi in lo..=hi {
                let k = kernel[yi + radius - y];
                sum += k * rows[yi * width + x];
                weight += k;
            }
            out[y * width + x] = (sum / weight) as f32;
        }
    }
    out
}

// ============================================================================
// Maxima filter
// ============================================================================

/// Non-maximum suppression over a preprocessed frame.
///
/// A pixel is a candidate if no pixel within `search` is brighter; on ties the
/// first pixel in row-major order wins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaximaSpotFilter {
    pub processor: DataProcessor,
    pub search: usize,
    pub border: usize,
}

impl Default for MaximaSpotFilter {
    fn default() -> Self {
        Self {
            processor: DataProcessor::default(),
            search: 1,
            border: 1,
        }
    }
}

impl MaximaSpotFilter {
    pub fn new(processor: DataProcessor, search: usize, border: usize) -> Self {
        Self {
            processor,
            search,
            border,
        }
    }

    fn is_maximum(&self, data: &[f32], width: usize, height: usize, x: usize, y: usize) -> bool {
        let index = y * width + x;
        let v = data[index];
        let y_hi = (y + self.search).min(height - 1);
        let x_hi = (x + self.search).min(width - 1);
        for ny in y.saturating_sub(self.search)..=y_hi {
            for nx in x.saturating_sub(self.search)..=x_hi {
                let n = ny * width + nx;
                let nv = data[n];
                if nv > v || (nv == v && n < index) {
                    return false;
                }
            }
        }
        true
    }
}

impl SpotFilter for MaximaSpotFilter {
    fn rank(&self, data: &[f32], width: usize, height: usize) -> Vec<Spot> {
        if width <= 2 * self.border || height <= 2 * self.border {
            return Vec::new();
        }

        let processed = self.preprocess_data(data, width, height);
        let mut spots = Vec::new();
        for y in self.border..height - self.border {
            for x in self.border..width - self.border {
                if self.is_maximum(&processed, width, height, x, y) {
                    spots.push(Spot::new(x, y, processed[y * width + x]));
                }
            }
        }

        // Stable: equal intensities keep row-major order.
        spots.sort_by(|a, b| b.intensity.total_cmp(&a.intensity));
        spots
    }

    fn preprocess_data(&self, data: &[f32], width: usize, height: usize) -> Vec<f32> {
        self.processor.process(data, width, height)
    }

    fn border(&self) -> usize {
        self.border
    }

    fn is_absolute_intensity(&self) -> bool {
        self.processor.is_absolute_intensity()
    }
}

#[cfg(test)]
mod tests;
