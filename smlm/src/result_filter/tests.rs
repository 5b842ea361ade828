use super::*;
use crate::fit_result::FitStatus;

fn fit(status: FitStatus) -> FitResult {
    let mut fit = FitResult::failure(FitStatus::BadParameters, &[0.0; 7], 1, None);
    fit.status = status;
    fit
}

fn peak(x: f32, y: f32) -> PeakResult {
    PeakResult {
        frame: 1,
        end_frame: 1,
        orig_x: x as usize,
        orig_y: y as usize,
        orig_value: 50.0,
        error: 0.0,
        noise: 1.0,
        params: [0.0, 100.0, 0.0, x, y, 1.0, 1.0],
        param_devs: None,
    }
}

fn targets() -> Vec<DVec2> {
    vec![DVec2::new(10.0, 10.0), DVec2::new(30.0, 30.0)]
}

#[test]
fn test_distance_filter_keeps_peaks_near_targets() {
    let mut filter = DistanceResultFilter::new(targets(), 1.0);
    filter.filter(0, &fit(FitStatus::Ok), &[peak(10.5, 10.5), peak(20.0, 20.0)]);
    filter.filter(1, &fit(FitStatus::Ok), &[peak(25.0, 25.0)]);
    filter.pass_fail(2, &fit(FitStatus::FailedToConverge), DVec2::new(30.2, 29.9));
    filter.pass_fail(3, &fit(FitStatus::FailedToConverge), DVec2::new(1.0, 1.0));
    filter.finalise();

    assert_eq!(filter.results().len(), 1);
    assert_eq!(filter.results()[0].x(), 10.5);
    let candidates: Vec<usize> = filter.fit_results().iter().map(|f| f.candidate).collect();
    assert_eq!(candidates, vec![0, 2]);
}

#[test]
fn test_optimum_filter_keeps_closest_per_target() {
    let mut filter = OptimumDistanceResultFilter::new(targets(), 1.0);
    filter.filter(0, &fit(FitStatus::Ok), &[peak(10.8, 10.0)]);
    filter.filter(1, &fit(FitStatus::Ok), &[peak(10.1, 10.0), peak(30.5, 30.0)]);
    filter.filter(2, &fit(FitStatus::Ok), &[peak(10.3, 10.0)]);
    filter.pass_fail(3, &fit(FitStatus::CoordinatesMoved), DVec2::new(29.5, 30.0));
    filter.finalise();

    let xs: Vec<f32> = filter.results().iter().map(|p| p.x()).collect();
    assert_eq!(xs, vec![10.1, 30.5]);
    // Candidate 1 matched both targets but is reported once.
    let candidates: Vec<usize> = filter.fit_results().iter().map(|f| f.candidate).collect();
    assert_eq!(candidates, vec![1, 3]);
}

#[test]
fn test_spec_builds_matching_filter() {
    let spec = ResultFilterSpec::Distance {
        targets: targets(),
        distance: 2.0,
    };
    let mut filter = spec.build();
    filter.filter(0, &fit(FitStatus::Ok), &[peak(31.0, 31.0)]);
    filter.finalise();
    assert_eq!(filter.results().len(), 1);
}
