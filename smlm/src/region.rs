//! Fit region extraction.
//!
//! Regions are square windows around a candidate, clipped to the frame, and
//! copied into a reusable buffer owned by the caller.

use crate::frame::Rect;

/// Square window of half-width `radius` centred on `(x, y)`, clipped to a
/// `width x height` frame.
pub fn region_bounds(x: usize, y: usize, radius: usize, width: usize, height: usize) -> Rect {
    debug_assert!(x < width && y < height);

    let x0 = x.saturating_sub(radius);
    let y0 = y.saturating_sub(radius);
    let x1 = (x + radius + 1).min(width);
    let y1 = (y + radius + 1).min(height);
    Rect::new(x0, y0, x1 - x0, y1 - y0)
}

/// Copy `bounds` out of row-major `data` into `out` (cleared first).
pub fn crop_into(data: &[f32], width: usize, bounds: &Rect, out: &mut Vec<f32>) {
    debug_assert!(bounds.right() <= width);
    debug_assert!(bounds.bottom() * width <= data.len());

    out.clear();
    out.reserve(bounds.area());
    for row in bounds.y..bounds.bottom() {
        let start = row * width + bounds.x;
        out.extend_from_slice(&data[start..start + bounds.width]);
    }
}

/// Mean of the outermost ring of a region.
pub fn perimeter_mean(region: &[f32], width: usize, height: usize) -> f64 {
    debug_assert_eq!(region.len(), width * height);

    if width == 0 || height == 0 {
        return 0.0;
    }
    if width <= 2 || height <= 2 {
        return region.iter().map(|&v| v as f64).sum::<f64>() / region.len() as f64;
    }

    let last = (height - 1) * width;
    let mut sum: f64 = region[..width]
        .iter()
        .chain(&region[last..last + width])
        .map(|&v| v as f64)
        .sum();
    for row in 1..height - 1 {
        sum += region[row * width] as f64 + region[row * width + width - 1] as f64;
    }
    sum / (2 * width + 2 * (height - 2)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_bounds_interior() {
        assert_eq!(region_bounds(10, 10, 3, 32, 32), Rect::new(7, 7, 7, 7));
    }

    #[test]
    fn test_region_bounds_clipped_at_edges() {
        assert_eq!(region_bounds(1, 30, 3, 32, 32), Rect::new(0, 27, 5, 5));
        assert_eq!(region_bounds(31, 0, 2, 32, 10), Rect::new(29, 0, 3, 3));
    }

    #[test]
    fn test_crop_reuses_buffer() {
        let data: Vec<f32> = (0..25).map(|v| v as f32).collect();
        let mut out = vec![99.0; 40];
        crop_into(&data, 5, &Rect::new(1, 2, 3, 2), &mut out);
        assert_eq!(out, vec![11.0, 12.0, 13.0, 16.0, 17.0, 18.0]);
    }

    #[test]
    fn test_perimeter_mean() {
        // 3x3 with a bright centre: perimeter is all ones.
        let region = [1.0, 1.0, 1.0, 1.0, 50.0, 1.0, 1.0, 1.0, 1.0];
        assert_eq!(perimeter_mean(&region, 3, 3), 1.0);

        // 4x3: centre pixels (1,1) and (2,1) excluded.
        let region = [1.0, 2.0, 3.0, 4.0, 5.0, 100.0, 100.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert_eq!(perimeter_mean(&region, 4, 3), 55.0 / 10.0);

        assert_eq!(perimeter_mean(&[2.0, 4.0], 2, 1), 3.0);
    }
}
