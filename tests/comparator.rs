//! Coverage comparison behavior over synthetic in-memory images.

use std::collections::BTreeMap;

use mattecheck::{
    MattecheckError, Raster, Tolerances, assert_coverage_within, assert_non_crypto_channels_match,
    measure_coverage,
};

/// A 1x1 image with one cryptomatte stream of two rank pairs, plus a beauty
/// `R` channel. `pairs` are the stored (ID, coverage) values of each pair.
fn one_pixel(pairs: [(f32, f32); 2], beauty: f32) -> Raster {
    let metadata = BTreeMap::from([
        (
            "cryptomatte/f893a45/name".to_string(),
            "crypto_object".to_string(),
        ),
        (
            "cryptomatte/f893a45/manifest".to_string(),
            r#"{"ball": "1"}"#.to_string(),
        ),
    ]);

    Raster::from_channels(
        "mem.exr",
        1,
        1,
        vec![
            ("R".to_string(), vec![beauty]),
            ("crypto_object00.R".to_string(), vec![pairs[0].0]),
            ("crypto_object00.G".to_string(), vec![pairs[0].1]),
            ("crypto_object00.B".to_string(), vec![pairs[1].0]),
            ("crypto_object00.A".to_string(), vec![pairs[1].1]),
        ],
        metadata,
    )
    .unwrap()
}

#[test]
fn self_comparison_is_exact() {
    let img = one_pixel([(1.0, 0.75), (2.0, 0.25)], 0.5);
    let stats = measure_coverage(&img, &img).unwrap();
    assert_eq!(stats.rms(), 0.0);
    assert_eq!(stats.very_different, 0);
    assert_eq!(stats.total_samples, 2);

    assert_coverage_within(&img, &img, &Tolerances::default()).unwrap();
    assert_non_crypto_channels_match(&img, &img, 0.01).unwrap();
}

#[test]
fn very_different_threshold_is_strict() {
    let reference = one_pixel([(1.0, 0.5), (0.0, 0.0)], 0.0);

    let slightly_off = one_pixel([(1.0, 0.5 - 0.299), (0.0, 0.0)], 0.0);
    let stats = measure_coverage(&slightly_off, &reference).unwrap();
    assert_eq!(stats.very_different, 0);

    let very_off = one_pixel([(1.0, 0.5 - 0.301), (0.0, 0.0)], 0.0);
    let stats = measure_coverage(&very_off, &reference).unwrap();
    assert_eq!(stats.very_different, 1);
}

#[test]
fn zero_zero_pairs_are_empty_slots() {
    let img = one_pixel([(1.0, 1.0), (0.0, 0.0)], 0.0);
    let stats = measure_coverage(&img, &img).unwrap();
    // Only the populated pair counts; the (0,0) slot is not a sample.
    assert_eq!(stats.total_samples, 1);
}

#[test]
fn all_empty_slots_is_a_failure() {
    let img = one_pixel([(0.0, 0.0), (0.0, 0.0)], 0.0);
    let err = measure_coverage(&img, &img).unwrap_err();
    assert!(err.to_string().contains("no coverage values"));
}

#[test]
fn candidate_only_id_counts_as_full_error() {
    let reference = one_pixel([(1.0, 0.4), (0.0, 0.0)], 0.0);
    let candidate = one_pixel([(1.0, 0.4), (2.0, 0.25)], 0.0);

    let stats = measure_coverage(&candidate, &reference).unwrap();
    assert_eq!(stats.total_samples, 2);
    // The extra ID is diffed against an implicit reference coverage of zero.
    assert!((stats.squared_error - 0.25 * 0.25).abs() < 1e-9);
}

#[test]
fn coverage_out_of_tolerance_reports_rms() {
    let reference = one_pixel([(1.0, 0.9), (0.0, 0.0)], 0.0);
    let candidate = one_pixel([(1.0, 0.1), (0.0, 0.0)], 0.0);

    let err = assert_coverage_within(&candidate, &reference, &Tolerances::default()).unwrap_err();
    assert!(matches!(err, MattecheckError::Tolerance(_)));
    assert!(err.to_string().contains("very different"));
}

#[test]
fn reshuffled_ranks_still_match_by_id() {
    // Same two IDs, swapped between the rank pairs. A positional diff would
    // see a large error; the ID-keyed diff must see none.
    let reference = one_pixel([(1.0, 0.75), (2.0, 0.25)], 0.0);
    let candidate = one_pixel([(2.0, 0.25), (1.0, 0.75)], 0.0);

    let stats = measure_coverage(&candidate, &reference).unwrap();
    assert_eq!(stats.rms(), 0.0);
    assert_eq!(stats.very_different, 0);
}

#[test]
fn non_crypto_channels_are_compared_independently() {
    let a = one_pixel([(1.0, 1.0), (0.0, 0.0)], 0.5);
    let b = one_pixel([(1.0, 1.0), (0.0, 0.0)], 0.9);

    assert_non_crypto_channels_match(&a, &b, 0.5).unwrap();
    let err = assert_non_crypto_channels_match(&a, &b, 0.01).unwrap_err();
    assert!(err.to_string().contains("channel: R"));
}

#[test]
fn missing_reference_stream_is_a_mismatch() {
    let reference = Raster::from_channels(
        "mem.exr",
        1,
        1,
        vec![("R".to_string(), vec![0.0])],
        BTreeMap::from([
            (
                "cryptomatte/other/name".to_string(),
                "crypto_material".to_string(),
            ),
            (
                "cryptomatte/other/manifest".to_string(),
                r#"{"ball": "1"}"#.to_string(),
            ),
        ]),
    )
    .unwrap();
    let candidate = one_pixel([(1.0, 1.0), (0.0, 0.0)], 0.0);

    let err = measure_coverage(&candidate, &reference).unwrap_err();
    assert!(err.to_string().contains("no cryptomatte stream 'crypto_object'"));
}
