//! Order statistics over scratch buffers.

/// MAD (Median Absolute Deviation) to standard deviation conversion factor.
///
/// For a normal distribution, σ ≈ 1.4826 × MAD.
pub const MAD_TO_SIGMA: f64 = 1.482_602_218_505_602;

/// Calculate the median of f64 values in-place.
///
/// Mutates the input buffer (partial sort via quickselect).
#[inline]
pub fn median_mut(data: &mut [f64]) -> f64 {
    debug_assert!(!data.is_empty());

    let len = data.len();
    let mid = len / 2;

    if len & 1 == 1 {
        let (_, median, _) = data.select_nth_unstable_by(mid, f64::total_cmp);
        *median
    } else {
        let (left_part, right_median, _) = data.select_nth_unstable_by(mid, f64::total_cmp);
        let right = *right_median;
        let left = left_part.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (left + right) * 0.5
    }
}

/// Mean of the `count` smallest values. Mutates the input buffer.
pub fn lowest_mean_mut(data: &mut [f64], count: usize) -> f64 {
    debug_assert!(count > 0 && count <= data.len());

    if count < data.len() {
        data.select_nth_unstable_by(count - 1, f64::total_cmp);
    }
    data[..count].iter().sum::<f64>() / count as f64
}

/// Arithmetic mean and population standard deviation.
pub fn mean_and_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let (count, sum) = values.clone().fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f64;
    let variance = values.map(|v| (v - mean) * (v - mean)).sum::<f64>() / count as f64;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median_mut(&mut [5.0, 1.0, 3.0]), 3.0);
        assert_eq!(median_mut(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn test_lowest_mean() {
        let mut data = [9.0, 1.0, 7.0, 3.0, 5.0];
        assert_eq!(lowest_mean_mut(&mut data, 2), 2.0);
        let mut data = [2.0, 4.0];
        assert_eq!(lowest_mean_mut(&mut data, 2), 3.0);
    }

    #[test]
    fn test_mean_and_std() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let (mean, std) = mean_and_std(values.iter().copied());
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((std - 2.0).abs() < 1e-12);
        assert_eq!(mean_and_std(std::iter::empty()), (0.0, 0.0));
    }
}
