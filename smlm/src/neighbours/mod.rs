//! Neighbour lookup for multi-peak fitting.
//!
//! Lower-ranked candidates bright enough to distort a fit, and peaks already
//! accepted earlier in the frame, are fitted together with the primary
//! candidate. Index buffers are per-worker scratch reused across frames.

use crate::frame::Rect;
use crate::gaussian::{PARAMETERS_PER_PEAK, X_POSITION, Y_POSITION};
use crate::spot_filter::Spot;

/// A peak accepted earlier in the current frame.
///
/// Positions are frame pixels (pixel centres on integers), angle in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedPeak {
    pub background: f64,
    pub params: [f64; PARAMETERS_PER_PEAK],
}

impl FittedPeak {
    #[inline]
    pub fn x(&self) -> f64 {
        self.params[X_POSITION]
    }

    #[inline]
    pub fn y(&self) -> f64 {
        self.params[Y_POSITION]
    }
}

/// Thresholds applied when looking for neighbours.
#[derive(Debug, Clone, Copy)]
pub struct NeighbourCriteria {
    /// Fraction of the candidate's height a neighbour must exceed.
    pub height_threshold: f64,
    /// Spot intensities share the pixel scale, so the background is removed
    /// before comparing heights.
    pub absolute_intensity: bool,
    pub background: f64,
    /// Margin added around the region when matching fitted peaks.
    pub sd_expansion: f64,
}

impl NeighbourCriteria {
    /// Minimum intensity for a neighbour of a candidate with `intensity`.
    #[inline]
    pub fn intensity_threshold(&self, intensity: f64) -> f64 {
        if self.absolute_intensity {
            self.background + (intensity - self.background) * self.height_threshold
        } else {
            intensity * self.height_threshold
        }
    }
}

#[derive(Debug, Default)]
pub struct NeighbourResolver {
    neighbours: Vec<usize>,
    fitted_neighbours: Vec<usize>,
}

impl NeighbourResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare for a frame with `n_candidates` spots.
    ///
    /// Fitted peaks can reach twice the candidate count when doublets split.
    pub fn reset(&mut self, n_candidates: usize) {
        self.neighbours.clear();
        self.fitted_neighbours.clear();
        self.neighbours.reserve(n_candidates);
        self.fitted_neighbours.reserve(2 * n_candidates);
    }

    /// Collect neighbours of `spots[candidate]` inside `bounds`.
    ///
    /// Returns `(neighbours, fitted_neighbours)`; the indices are available
    /// from [`neighbours`](Self::neighbours) and
    /// [`fitted_neighbours`](Self::fitted_neighbours) until the next call.
    pub fn find(
        &mut self,
        bounds: &Rect,
        candidate: usize,
        spots: &[Spot],
        fitted: &[FittedPeak],
        criteria: &NeighbourCriteria,
    ) -> (usize, usize) {
        self.neighbours.clear();
        self.fitted_neighbours.clear();

        let threshold = criteria.intensity_threshold(spots[candidate].intensity as f64);
        for (j, spot) in spots.iter().enumerate().skip(candidate + 1) {
            if bounds.contains(spot.x, spot.y) && spot.intensity as f64 > threshold {
                self.neighbours.push(j);
            }
        }

        let margin = 0.5 + criteria.sd_expansion;
        let (x0, x1) = (bounds.x as f64 - margin, bounds.right() as f64 - 1.0 + margin);
        let (y0, y1) = (bounds.y as f64 - margin, bounds.bottom() as f64 - 1.0 + margin);
        for (j, peak) in fitted.iter().enumerate() {
            let (x, y) = (peak.x(), peak.y());
            if x >= x0 && x < x1 && y >= y0 && y < y1 {
                self.fitted_neighbours.push(j);
            }
        }

        (self.neighbours.len(), self.fitted_neighbours.len())
    }

    #[inline]
    pub fn neighbours(&self) -> &[usize] {
        &self.neighbours
    }

    #[inline]
    pub fn fitted_neighbours(&self) -> &[usize] {
        &self.fitted_neighbours
    }
}

#[cfg(test)]
mod tests;
