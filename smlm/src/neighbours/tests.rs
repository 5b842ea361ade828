use super::*;

fn peak_at(x: f64, y: f64) -> FittedPeak {
    FittedPeak {
        background: 10.0,
        params: [500.0, 0.0, x, y, 1.3, 1.3],
    }
}

fn criteria(absolute: bool) -> NeighbourCriteria {
    NeighbourCriteria {
        height_threshold: 0.3,
        absolute_intensity: absolute,
        background: 10.0,
        sd_expansion: 1.0,
    }
}

#[test]
fn test_only_lower_ranked_spots_inside_region() {
    let spots = [
        Spot::new(20, 20, 300.0), // higher ranked, ignored
        Spot::new(10, 10, 200.0), // candidate
        Spot::new(12, 11, 150.0), // inside
        Spot::new(30, 30, 140.0), // outside
        Spot::new(8, 13, 120.0),  // inside
    ];
    let bounds = Rect::new(6, 6, 9, 9);
    let mut resolver = NeighbourResolver::new();
    resolver.reset(spots.len());

    let counts = resolver.find(&bounds, 1, &spots, &[], &criteria(true));
    assert_eq!(counts, (2, 0));
    assert_eq!(resolver.neighbours(), &[2, 4]);
}

#[test]
fn test_absolute_threshold_removes_background() {
    // Threshold: 10 + (200 - 10) * 0.3 = 67
    let spots = [
        Spot::new(10, 10, 200.0),
        Spot::new(11, 10, 68.0),
        Spot::new(9, 10, 66.0),
    ];
    let bounds = Rect::new(6, 6, 9, 9);
    let mut resolver = NeighbourResolver::new();

    assert_eq!(resolver.find(&bounds, 0, &spots, &[], &criteria(true)).0, 1);
    assert_eq!(resolver.neighbours(), &[1]);

    // Relative threshold: 200 * 0.3 = 60, both pass.
    assert_eq!(resolver.find(&bounds, 0, &spots, &[], &criteria(false)).0, 2);
}

#[test]
fn test_fitted_peaks_match_expanded_region() {
    let spots = [Spot::new(10, 10, 200.0)];
    let bounds = Rect::new(6, 6, 9, 9); // pixel centres 6..=14
    let fitted = [
        peak_at(5.0, 10.0),  // left of region, within expansion
        peak_at(4.0, 10.0),  // beyond expansion (edge at 4.5)
        peak_at(15.4, 14.0), // right margin ends at 15.5
        peak_at(10.0, 16.0), // below
    ];
    let mut resolver = NeighbourResolver::new();

    let counts = resolver.find(&bounds, 0, &spots, &fitted, &criteria(true));
    assert_eq!(counts, (0, 2));
    assert_eq!(resolver.fitted_neighbours(), &[0, 2]);
}

#[test]
fn test_find_clears_previous_indices() {
    let spots = [Spot::new(10, 10, 200.0), Spot::new(11, 11, 150.0)];
    let mut resolver = NeighbourResolver::new();
    resolver.find(&Rect::new(6, 6, 9, 9), 0, &spots, &[], &criteria(true));
    assert_eq!(resolver.neighbours().len(), 1);

    let counts = resolver.find(&Rect::new(7, 7, 9, 9), 1, &spots, &[], &criteria(true));
    assert_eq!(counts, (0, 0));
    assert!(resolver.neighbours().is_empty());
}
