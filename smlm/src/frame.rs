//! Frame and rectangle types.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Axis-aligned pixel rectangle. `x`/`y` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    #[inline]
    pub fn right(&self) -> usize {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    #[inline]
    pub fn bottom(&self) -> usize {
        self.y + self.height
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}

/// One captured image frame.
///
/// Pixels are row-major with `bounds.width * bounds.height` values. `bounds`
/// places the frame inside the full camera image; results are reported in
/// that full-image coordinate frame.
#[derive(Debug, Clone)]
pub struct Frame {
    index: u32,
    bounds: Rect,
    data: Vec<f32>,
}

impl Frame {
    /// Frame covering a full image starting at the origin.
    pub fn new(index: u32, width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        Self::with_bounds(index, Rect::new(0, 0, width, height), data)
    }

    /// Frame cropped from a larger image at `bounds`.
    pub fn with_bounds(index: u32, bounds: Rect, data: Vec<f32>) -> Result<Self> {
        if data.len() != bounds.area() {
            return Err(Error::InvalidFrame {
                expected: bounds.area(),
                actual: data.len(),
            });
        }
        Ok(Self {
            index,
            bounds,
            data,
        })
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn bounds(&self) -> &Rect {
        &self.bounds
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.bounds.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.bounds.height
    }

    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        debug_assert!(x < self.width() && y < self.height());
        self.data[y * self.bounds.width + x]
    }
}
