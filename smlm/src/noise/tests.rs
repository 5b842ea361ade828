use strum::IntoEnumIterator;

use super::*;
use crate::testing::{TestPeak, add_gaussian_noise, render_gaussians};

const SIZE: usize = 64;
const SIGMA: f64 = 5.0;

fn noisy_frame(seed: u64) -> Vec<f32> {
    let mut data = vec![100.0f32; SIZE * SIZE];
    add_gaussian_noise(&mut data, SIGMA, seed);
    data
}

#[test]
fn test_flat_frame_has_zero_noise() {
    let data = vec![42.0f32; 16 * 16];
    for method in NoiseMethod::iter() {
        assert_eq!(estimate_noise(&data, 16, 16, method), 0.0, "{method}");
    }
}

#[test]
fn test_every_method_recovers_gaussian_sigma() {
    let data = noisy_frame(7);
    for method in NoiseMethod::iter() {
        let noise = estimate_noise(&data, SIZE, SIZE, method) as f64;
        assert!(
            (noise - SIGMA).abs() < 0.15 * SIGMA,
            "{method}: estimated {noise}, expected {SIGMA}"
        );
    }
}

#[test]
fn test_residual_methods_ignore_background_gradient() {
    let mut data = noisy_frame(11);
    for y in 0..SIZE {
        for x in 0..SIZE {
            data[y * SIZE + x] += (x + y) as f32 * 2.0;
        }
    }

    let all = estimate_noise(&data, SIZE, SIZE, NoiseMethod::AllPixels) as f64;
    let residual =
        estimate_noise(&data, SIZE, SIZE, NoiseMethod::ResidualsLeastMedianOfSquares) as f64;
    assert!(all > 3.0 * SIGMA, "gradient should dominate, got {all}");
    assert!((residual - SIGMA).abs() < 0.15 * SIGMA, "got {residual}");
}

#[test]
fn test_robust_methods_ignore_spots() {
    let peaks: Vec<TestPeak> = (0..4)
        .map(|i| TestPeak::new(12.0 + 13.0 * i as f64, 32.0, 400.0, 1.3))
        .collect();
    let mut data = render_gaussians(SIZE, SIZE, 100.0, &peaks);
    add_gaussian_noise(&mut data, SIGMA, 3);

    let noise =
        estimate_noise(&data, SIZE, SIZE, NoiseMethod::QuickResidualsLeastMedianOfSquares) as f64;
    assert!((noise - SIGMA).abs() < 0.2 * SIGMA, "got {noise}");
    let all = estimate_noise(&data, SIZE, SIZE, NoiseMethod::AllPixels) as f64;
    assert!(all > noise);
}

#[test]
fn test_tiny_frame_falls_back_to_all_pixels() {
    let data = [1.0f32, 3.0, 1.0, 3.0];
    let residual = estimate_noise(&data, 2, 2, NoiseMethod::ResidualsLeastMeanSquare);
    let all = estimate_noise(&data, 2, 2, NoiseMethod::AllPixels);
    assert_eq!(residual, all);
    assert_eq!(all, 1.0);
}

#[test]
fn test_background_is_frame_mean() {
    assert_eq!(estimate_background(&[1.0, 2.0, 3.0, 6.0]), 3.0);
    assert_eq!(estimate_background(&[]), 0.0);
}
