use super::*;
use crate::testing::{TestPeak, render_gaussians};

#[test]
fn test_rank_orders_by_intensity() {
    let peaks = [
        TestPeak::new(8.0, 8.0, 100.0, 1.2),
        TestPeak::new(24.0, 10.0, 300.0, 1.2),
        TestPeak::new(16.0, 24.0, 200.0, 1.2),
    ];
    let data = render_gaussians(32, 32, 10.0, &peaks);
    let filter = MaximaSpotFilter::new(DataProcessor::Raw, 2, 2);

    // Quantised background tails can form shallow plateaus; keep real peaks.
    let spots: Vec<Spot> = filter
        .rank(&data, 32, 32)
        .into_iter()
        .filter(|s| s.intensity > 50.0)
        .collect();
    assert_eq!(spots.len(), 3);
    assert_eq!((spots[0].x, spots[0].y), (24, 10));
    assert_eq!((spots[1].x, spots[1].y), (16, 24));
    assert_eq!((spots[2].x, spots[2].y), (8, 8));
    assert!((spots[0].intensity - 310.0).abs() < 1e-3);
}

#[test]
fn test_rank_respects_border() {
    let data = render_gaussians(16, 16, 0.0, &[TestPeak::new(1.0, 8.0, 50.0, 1.0)]);
    let filter = MaximaSpotFilter::new(DataProcessor::Raw, 1, 2);
    assert!(filter.rank(&data, 16, 16).iter().all(|s| s.x >= 2));

    let filter = MaximaSpotFilter::new(DataProcessor::Raw, 1, 0);
    let spots = filter.rank(&data, 16, 16);
    assert_eq!((spots[0].x, spots[0].y), (1, 8));
}

#[test]
fn test_plateau_yields_single_candidate() {
    let mut data = vec![0.0f32; 8 * 8];
    data[3 * 8 + 3] = 5.0;
    data[3 * 8 + 4] = 5.0;
    let filter = MaximaSpotFilter::new(DataProcessor::Raw, 1, 1);
    let spots: Vec<Spot> = filter
        .rank(&data, 8, 8)
        .into_iter()
        .filter(|s| s.intensity > 0.0)
        .collect();
    assert_eq!(spots, vec![Spot::new(3, 3, 5.0)]);
}

#[test]
fn test_frame_smaller_than_border_has_no_candidates() {
    let data = vec![1.0f32; 4 * 4];
    let filter = MaximaSpotFilter::new(DataProcessor::Raw, 1, 2);
    assert!(filter.rank(&data, 4, 4).is_empty());
}

#[test]
fn test_average_preserves_flat_image_at_edges() {
    let data = vec![7.0f32; 5 * 4];
    let out = DataProcessor::Average { radius: 2 }.process(&data, 5, 4);
    assert!(out.iter().all(|&v| (v - 7.0).abs() < 1e-6));
}

#[test]
fn test_average_box_mean() {
    let mut data = vec![0.0f32; 5 * 5];
    data[2 * 5 + 2] = 9.0;
    let out = DataProcessor::Average { radius: 1 }.process(&data, 5, 5);
    assert!((out[2 * 5 + 2] - 1.0).abs() < 1e-6);
    assert!((out[5 + 1] - 1.0).abs() < 1e-6);
    assert_eq!(out[0], 0.0);
}

#[test]
fn test_gaussian_smoothing_keeps_maximum_position() {
    let data = render_gaussians(21, 21, 5.0, &[TestPeak::new(12.0, 9.0, 80.0, 1.5)]);
    let filter = MaximaSpotFilter::new(DataProcessor::Gaussian { sigma: 1.0 }, 2, 1);
    let spots = filter.rank(&data, 21, 21);
    assert_eq!((spots[0].x, spots[0].y), (12, 9));
    assert!(filter.is_absolute_intensity());
}

#[test]
fn test_difference_is_relative() {
    let processor = DataProcessor::Difference { inner: 0, outer: 2 };
    assert!(!processor.is_absolute_intensity());

    let data = vec![30.0f32; 9 * 9];
    let out = processor.process(&data, 9, 9);
    assert!(out.iter().all(|&v| v.abs() < 1e-5));
}
