use approx::assert_relative_eq;
use ndarray::Array2;

use kratky_core::average::ErrorPropagation;
use kratky_core::error::KratkyError;
use kratky_core::geometry::Geometry;
use kratky_core::integrate::{azimuthal_average, fast_radial_average, radial_average, Curve};
use kratky_core::transform::AbscissaKind;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn geometry(beam_row: f64, beam_col: f64) -> Geometry {
    Geometry {
        beam_row,
        beam_row_sigma: 0.0,
        beam_col,
        beam_col_sigma: 0.0,
        distance: 1000.0,
        distance_sigma: 0.0,
        pixel_size: 0.172,
        wavelength: 0.154,
        wavelength_sigma: 0.0,
    }
}

fn all_valid(h: usize, w: usize) -> Array2<u8> {
    Array2::from_elem((h, w), 1)
}

/// Three pixels in a single row at radii 10, 11 and 12 from the beam center,
/// all landing in one wide bin. Small enough to check every mode by hand.
fn one_bin_setup() -> (Array2<f64>, Array2<f64>, Array2<u8>, Geometry) {
    let image = Array2::from_shape_vec((1, 3), vec![1.0, 2.0, 3.0]).unwrap();
    let errors = Array2::from_shape_vec((1, 3), vec![0.5, 0.5, 1.0]).unwrap();
    (image, errors, all_valid(1, 3), geometry(0.0, -10.0))
}

fn bits(values: &[f64]) -> Vec<u64> {
    values.iter().map(|v| v.to_bits()).collect()
}

fn assert_bit_identical(a: &Curve, b: &Curve) {
    assert_eq!(bits(&a.abscissa), bits(&b.abscissa));
    assert_eq!(bits(&a.abscissa_sigma), bits(&b.abscissa_sigma));
    assert_eq!(bits(&a.intensity), bits(&b.intensity));
    assert_eq!(bits(&a.intensity_sigma), bits(&b.intensity_sigma));
    assert_eq!(a.area, b.area);
    assert_eq!(a.tally, b.tally);
}

// ---------------------------------------------------------------------------
// Binning
// ---------------------------------------------------------------------------

#[test]
fn test_unit_image_binning() {
    // 4x4 all-ones image, uniform unit errors, beam center between pixels.
    // Pixel radii are sqrt(0.5) (x4), sqrt(2.5) (x8) and sqrt(4.5) (x4), so
    // bin 0 (up to 0.5) stays empty and every pixel lands in exactly one bin.
    let image = Array2::<f64>::from_elem((4, 4), 1.0);
    let errors = Array2::<f64>::from_elem((4, 4), 1.0);
    let curve = radial_average(
        &image,
        Some(&errors),
        &all_valid(4, 4),
        &geometry(1.5, 1.5),
        &[0.0, 1.0, 2.0, 3.0],
        ErrorPropagation::Gaussian,
        ErrorPropagation::Gaussian,
        AbscissaKind::Pixel,
    )
    .unwrap();

    assert_eq!(curve.area, vec![0, 4, 12, 0]);
    assert_eq!(curve.tally.binned, 16);
    assert_eq!(curve.tally.total(), 16);

    assert_relative_eq!(curve.intensity[1], 1.0, max_relative = 1e-12);
    assert_relative_eq!(curve.intensity_sigma[1], 0.5, max_relative = 1e-12);
    assert_relative_eq!(
        curve.intensity_sigma[2],
        12.0f64.sqrt() / 12.0,
        max_relative = 1e-12
    );
    assert_relative_eq!(curve.abscissa[1], 0.5f64.sqrt(), max_relative = 1e-12);

    // Empty bins carry the nominal center, NaN statistics and zero area.
    assert_eq!(curve.abscissa[0], 0.0);
    assert!(curve.intensity[0].is_nan());
    assert!(curve.intensity_sigma[0].is_nan());
    assert!(curve.abscissa_sigma[0].is_nan());
    assert_eq!(curve.abscissa[3], 3.0);
}

#[test]
fn test_under_and_overflow() {
    let (image, errors, mask, g) = one_bin_setup();
    let curve = radial_average(
        &image,
        Some(&errors),
        &mask,
        &g,
        &[10.5, 11.5],
        ErrorPropagation::Gaussian,
        ErrorPropagation::Gaussian,
        AbscissaKind::Pixel,
    )
    .unwrap();
    assert_eq!(curve.tally.underflow, 1);
    assert_eq!(curve.tally.overflow, 1);
    assert_eq!(curve.tally.binned, 1);
    assert_eq!(curve.area, vec![1, 0]);
    assert_relative_eq!(curve.intensity[0], 2.0, max_relative = 1e-12);
    assert_eq!(curve.abscissa[1], 11.5);
    assert!(curve.intensity[1].is_nan());
}

#[test]
fn test_pixel_classification_partitions_image() {
    let mut image = Array2::<f64>::from_elem((8, 8), 2.0);
    image[[0, 0]] = f64::NAN;
    let mut errors = Array2::<f64>::from_elem((8, 8), 0.1);
    errors[[0, 2]] = f64::INFINITY;
    let mut mask = all_valid(8, 8);
    mask[[0, 1]] = 0;

    let curve = radial_average(
        &image,
        Some(&errors),
        &mask,
        &geometry(3.5, 3.5),
        &[0.0, 1.0, 2.0],
        ErrorPropagation::Gaussian,
        ErrorPropagation::Gaussian,
        AbscissaKind::Pixel,
    )
    .unwrap();

    assert_eq!(curve.tally.masked, 1);
    assert_eq!(curve.tally.invalid_intensity, 1);
    assert_eq!(curve.tally.invalid_error, 1);
    assert!(curve.tally.overflow > 0);
    assert_eq!(curve.tally.total(), 64);
    assert_eq!(curve.area.iter().sum::<usize>(), curve.tally.binned);
}

// ---------------------------------------------------------------------------
// Error propagation modes
// ---------------------------------------------------------------------------

#[test]
fn test_weighted_mode() {
    let (image, errors, mask, g) = one_bin_setup();
    let curve = radial_average(
        &image,
        Some(&errors),
        &mask,
        &g,
        &[0.0, 100.0],
        ErrorPropagation::Weighted,
        ErrorPropagation::Gaussian,
        AbscissaKind::Pixel,
    )
    .unwrap();
    // Weights 4, 4, 1: mean = 15/9, error = 1/sqrt(9).
    assert_relative_eq!(curve.intensity[0], 15.0 / 9.0, max_relative = 1e-12);
    assert_relative_eq!(curve.intensity_sigma[0], 1.0 / 3.0, max_relative = 1e-12);
    // Abscissa under Gaussian: plain mean of the radii.
    assert_relative_eq!(curve.abscissa[0], 11.0, max_relative = 1e-12);
}

#[test]
fn test_weighted_mode_zero_sigma_gets_unit_weight() {
    let (image, _, mask, g) = one_bin_setup();
    let zeros = Array2::<f64>::zeros((1, 3));
    let curve = radial_average(
        &image,
        Some(&zeros),
        &mask,
        &g,
        &[0.0, 100.0],
        ErrorPropagation::Weighted,
        ErrorPropagation::Gaussian,
        AbscissaKind::Pixel,
    )
    .unwrap();
    assert_eq!(curve.area, vec![3, 0]);
    assert_relative_eq!(curve.intensity[0], 2.0, max_relative = 1e-12);
    assert_relative_eq!(
        curve.intensity_sigma[0],
        1.0 / 3.0f64.sqrt(),
        max_relative = 1e-12
    );
}

#[test]
fn test_gaussian_mode() {
    let (image, errors, mask, g) = one_bin_setup();
    let curve = radial_average(
        &image,
        Some(&errors),
        &mask,
        &g,
        &[0.0, 100.0],
        ErrorPropagation::Gaussian,
        ErrorPropagation::Gaussian,
        AbscissaKind::Pixel,
    )
    .unwrap();
    assert_relative_eq!(curve.intensity[0], 2.0, max_relative = 1e-12);
    assert_relative_eq!(
        curve.intensity_sigma[0],
        1.5f64.sqrt() / 3.0,
        max_relative = 1e-12
    );
}

#[test]
fn test_average_mode() {
    let (image, errors, mask, g) = one_bin_setup();
    let curve = radial_average(
        &image,
        Some(&errors),
        &mask,
        &g,
        &[0.0, 100.0],
        ErrorPropagation::Average,
        ErrorPropagation::Average,
        AbscissaKind::Pixel,
    )
    .unwrap();
    assert_relative_eq!(curve.intensity[0], 2.0, max_relative = 1e-12);
    assert_relative_eq!(curve.intensity_sigma[0], 2.0 / 3.0, max_relative = 1e-12);
}

#[test]
fn test_conservative_mode_takes_larger_error() {
    let (image, errors, mask, g) = one_bin_setup();
    let curve = radial_average(
        &image,
        Some(&errors),
        &mask,
        &g,
        &[0.0, 100.0],
        ErrorPropagation::Conservative,
        ErrorPropagation::Gaussian,
        AbscissaKind::Pixel,
    )
    .unwrap();
    assert_relative_eq!(curve.intensity[0], 2.0, max_relative = 1e-12);
    // Empirical standard error 1/sqrt(3) beats the propagated sqrt(1.5)/3.
    assert_relative_eq!(
        curve.intensity_sigma[0],
        1.0 / 3.0f64.sqrt(),
        max_relative = 1e-12
    );
}

#[test]
fn test_missing_error_image_means_unit_sigma() {
    let (image, _, mask, g) = one_bin_setup();
    let curve = radial_average(
        &image,
        None,
        &mask,
        &g,
        &[0.0, 100.0],
        ErrorPropagation::Gaussian,
        ErrorPropagation::Gaussian,
        AbscissaKind::Pixel,
    )
    .unwrap();
    assert_relative_eq!(
        curve.intensity_sigma[0],
        3.0f64.sqrt() / 3.0,
        max_relative = 1e-12
    );
}

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

#[test]
fn test_shape_mismatches_rejected() {
    let image = Array2::<f64>::zeros((3, 4));
    let bad_mask = Array2::<u8>::ones((3, 3));
    assert!(matches!(
        radial_average(
            &image,
            None,
            &bad_mask,
            &geometry(1.0, 1.0),
            &[0.0, 1.0],
            ErrorPropagation::Gaussian,
            ErrorPropagation::Gaussian,
            AbscissaKind::Pixel,
        ),
        Err(KratkyError::ShapeMismatch { .. })
    ));

    let bad_errors = Array2::<f64>::zeros((4, 4));
    assert!(matches!(
        radial_average(
            &image,
            Some(&bad_errors),
            &Array2::<u8>::ones((3, 4)),
            &geometry(1.0, 1.0),
            &[0.0, 1.0],
            ErrorPropagation::Gaussian,
            ErrorPropagation::Gaussian,
            AbscissaKind::Pixel,
        ),
        Err(KratkyError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_malformed_bins_rejected() {
    let image = Array2::<f64>::zeros((3, 3));
    let mask = all_valid(3, 3);
    assert!(matches!(
        radial_average(
            &image,
            None,
            &mask,
            &geometry(1.0, 1.0),
            &[],
            ErrorPropagation::Gaussian,
            ErrorPropagation::Gaussian,
            AbscissaKind::Pixel,
        ),
        Err(KratkyError::EmptyBins)
    ));
    assert!(matches!(
        radial_average(
            &image,
            None,
            &mask,
            &geometry(1.0, 1.0),
            &[0.0, 2.0, 1.0],
            ErrorPropagation::Gaussian,
            ErrorPropagation::Gaussian,
            AbscissaKind::Pixel,
        ),
        Err(KratkyError::NonAscendingBins { index: 2 })
    ));
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[test]
fn test_repeated_calls_are_bit_identical() {
    let (image, errors, mask, g) = one_bin_setup();
    let run = || {
        radial_average(
            &image,
            Some(&errors),
            &mask,
            &g,
            &[0.0, 5.0, 11.0, 100.0],
            ErrorPropagation::Conservative,
            ErrorPropagation::Weighted,
            AbscissaKind::MomentumTransfer,
        )
        .unwrap()
    };
    assert_bit_identical(&run(), &run());
}

#[test]
fn test_parallel_path_is_deterministic() {
    // 300x300 crosses the parallel threshold.
    let h = 300;
    let w = 300;
    let image = Array2::from_shape_fn((h, w), |(r, c)| ((r * 31 + c * 17) % 97) as f64 / 7.0);
    let errors = Array2::from_shape_fn((h, w), |(r, c)| 0.1 + ((r + c) % 5) as f64 * 0.05);
    let mask = all_valid(h, w);
    let g = geometry(150.0, 150.0);
    let centers = [0.0, 40.0, 80.0, 120.0, 160.0, 250.0];
    let run = || {
        radial_average(
            &image,
            Some(&errors),
            &mask,
            &g,
            &centers,
            ErrorPropagation::Conservative,
            ErrorPropagation::Gaussian,
            AbscissaKind::Pixel,
        )
        .unwrap()
    };
    let first = run();
    assert_eq!(first.tally.total(), h * w);
    assert_eq!(
        first.area.iter().sum::<usize>() + first.tally.overflow + first.tally.underflow,
        h * w
    );
    assert_bit_identical(&first, &run());
}

// ---------------------------------------------------------------------------
// fast_radial_average
// ---------------------------------------------------------------------------

#[test]
fn test_fast_average_ring_counts() {
    let image = Array2::<f64>::from_elem((7, 7), 1.0);
    let (radius, intensity, area) =
        fast_radial_average(&image, &all_valid(7, 7), 3.0, 3.0, 0.0, 3.0, 3).unwrap();
    assert_eq!(area, vec![1, 8, 20]);
    assert_relative_eq!(radius[0], 0.0, epsilon = 1e-12);
    assert_relative_eq!(
        radius[1],
        (4.0 + 4.0 * 2.0f64.sqrt()) / 8.0,
        max_relative = 1e-12
    );
    for v in &intensity {
        assert_relative_eq!(*v, 1.0, max_relative = 1e-12);
    }
}

#[test]
fn test_fast_average_empty_bin_is_nan() {
    // Mask everything beyond radius 1, leaving the last bin empty.
    let mut mask = all_valid(7, 7);
    for r in 0..7 {
        for c in 0..7 {
            let d2 = (r as f64 - 3.0).powi(2) + (c as f64 - 3.0).powi(2);
            if d2 > 1.0 {
                mask[[r, c]] = 0;
            }
        }
    }
    let image = Array2::<f64>::from_elem((7, 7), 1.0);
    let (radius, intensity, area) =
        fast_radial_average(&image, &mask, 3.0, 3.0, 0.0, 3.0, 3).unwrap();
    assert_eq!(area, vec![1, 4, 0]);
    assert_relative_eq!(radius[1], 1.0, max_relative = 1e-12);
    assert!(radius[2].is_nan());
    assert!(intensity[2].is_nan());
}

#[test]
fn test_fast_average_degenerate_inputs_rejected() {
    let image = Array2::<f64>::zeros((4, 4));
    let mask = all_valid(4, 4);
    assert!(fast_radial_average(&image, &mask, 2.0, 2.0, 0.0, 3.0, 0).is_err());
    assert!(fast_radial_average(&image, &mask, 2.0, 2.0, 3.0, 3.0, 5).is_err());
}

// ---------------------------------------------------------------------------
// azimuthal_average
// ---------------------------------------------------------------------------

#[test]
fn test_azimuthal_partitions_all_pixels() {
    let image = Array2::<f64>::from_elem((5, 5), 1.0);
    let curve = azimuthal_average(
        &image,
        None,
        &all_valid(5, 5),
        &geometry(2.0, 2.0),
        4,
        ErrorPropagation::Gaussian,
        ErrorPropagation::Gaussian,
    )
    .unwrap();
    assert_eq!(curve.tally.binned, 25);
    assert_eq!(curve.tally.total(), 25);
    assert_eq!(curve.area.iter().sum::<usize>(), 25);
    for (i, &area) in curve.area.iter().enumerate() {
        if area > 0 {
            assert_relative_eq!(curve.intensity[i], 1.0, max_relative = 1e-12);
        }
    }
}

#[test]
fn test_azimuthal_empty_sectors() {
    let image = Array2::<f64>::from_elem((5, 5), 2.0);
    let mut mask = Array2::<u8>::zeros((5, 5));
    mask[[2, 4]] = 1; // due east of the beam center, azimuth 0
    let curve = azimuthal_average(
        &image,
        None,
        &mask,
        &geometry(2.0, 2.0),
        4,
        ErrorPropagation::Gaussian,
        ErrorPropagation::Gaussian,
    )
    .unwrap();
    assert_eq!(curve.area, vec![1, 0, 0, 0]);
    assert_relative_eq!(curve.intensity[0], 2.0, max_relative = 1e-12);
    assert_relative_eq!(curve.phi[0], 0.0, epsilon = 1e-12);
    assert!(curve.q_mean[0].is_finite());
    assert_relative_eq!(curve.q_sigma[0], 0.0, epsilon = 1e-12);
    for bin in 1..4 {
        assert!(curve.intensity[bin].is_nan());
        let sector = std::f64::consts::TAU / 4.0;
        assert_relative_eq!(
            curve.phi[bin],
            (bin as f64 + 0.5) * sector,
            max_relative = 1e-12
        );
    }
}

#[test]
fn test_azimuthal_rejects_zero_bins() {
    let image = Array2::<f64>::zeros((3, 3));
    assert!(azimuthal_average(
        &image,
        None,
        &all_valid(3, 3),
        &geometry(1.0, 1.0),
        0,
        ErrorPropagation::Gaussian,
        ErrorPropagation::Gaussian,
    )
    .is_err());
}
