use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    error::{MattecheckError, MattecheckResult},
    manifest::assert_manifests_match,
    metadata::{CryptoKey, StreamField, crypto_metadata},
    raster::Raster,
    streams::group_streams,
};

/// Side length of the pixel window the comparators walk. Test fixtures are
/// rendered at exactly this resolution; smaller images are clamped to their
/// own bounds so the constant stays a policy, not a crash.
pub const COMPARE_WINDOW: usize = 128;

/// A per-sample coverage delta beyond this counts as "very different".
pub const VERY_DIFFERENT_DELTA: f64 = 0.3;

/// Compression methods allowed for cryptomatte exr output.
pub const ALLOWED_COMPRESSION: [&str; 3] = ["none", "zip", "zips"];

/// Failure thresholds for the coverage comparison.
#[derive(Clone, Copy, Debug)]
pub struct Tolerances {
    /// Maximum acceptable root-mean-square coverage error.
    pub rms: f64,
    /// Number of very-different samples at which the comparison fails.
    pub max_very_different: usize,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            rms: 0.01,
            max_very_different: 4,
        }
    }
}

/// Accumulated coverage comparison scalars.
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct CoverageStats {
    pub total_samples: u64,
    pub very_different: usize,
    pub squared_error: f64,
}

impl CoverageStats {
    pub fn rms(&self) -> f64 {
        if self.total_samples == 0 {
            return 0.0;
        }
        (self.squared_error / self.total_samples as f64).sqrt()
    }
}

/// Plain per-sample comparison scalars (non-cryptomatte outputs).
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct PlainStats {
    pub total_samples: u64,
    pub failing_samples: u64,
    pub mean_error: f64,
    pub rms: f64,
    pub max_error: f64,
}

/// Assert both images expose the same set of channel names.
pub fn assert_same_channels(result: &Raster, reference: &Raster) -> MattecheckResult<()> {
    let result_channels: BTreeSet<&str> =
        result.channel_names.iter().map(String::as_str).collect();
    let reference_channels: BTreeSet<&str> =
        reference.channel_names.iter().map(String::as_str).collect();
    if result_channels != reference_channels {
        return Err(MattecheckError::mismatch(format!(
            "channels mismatch between result and reference: {result_channels:?} vs {reference_channels:?}"
        )));
    }
    Ok(())
}

/// Assert the exr compression of both images matches and is allowed.
pub fn assert_compression_valid(result: &Raster, reference: &Raster) -> MattecheckResult<()> {
    let compression_of = |raster: &Raster| -> MattecheckResult<String> {
        raster.metadata.get("compression").cloned().ok_or_else(|| {
            MattecheckError::mismatch(format!(
                "'{}' has no compression attribute",
                raster.path.display()
            ))
        })
    };

    let result_compression = compression_of(result)?;
    let reference_compression = compression_of(reference)?;
    if result_compression != reference_compression {
        return Err(MattecheckError::mismatch(format!(
            "compression of result does not match: {result_compression} vs {reference_compression}"
        )));
    }
    if !ALLOWED_COMPRESSION.contains(&result_compression.as_str()) {
        return Err(MattecheckError::mismatch(format!(
            "compression not of an allowed type: {result_compression}"
        )));
    }
    Ok(())
}

/// Assert cryptomatte metadata is structurally equal: identical key sets,
/// equal values for non-manifest keys, and matching manifests. At least one
/// manifest must exist.
pub fn assert_crypto_metadata_matches(result: &Raster, reference: &Raster) -> MattecheckResult<()> {
    let result_md = crypto_metadata(result)?;
    let reference_md = crypto_metadata(reference)?;

    for key in reference_md.keys() {
        if !result_md.contains_key(key) {
            return Err(MattecheckError::mismatch(format!(
                "result missing metadata key: {key}"
            )));
        }
    }
    for key in result_md.keys() {
        if !reference_md.contains_key(key) {
            return Err(MattecheckError::mismatch(format!(
                "result has extra metadata key: {key}"
            )));
        }
    }

    let mut found_manifest = false;
    for (key, reference_value) in &reference_md {
        let is_manifest = CryptoKey::parse(key)?
            .is_some_and(|parsed| parsed.field == StreamField::Manifest);
        if is_manifest {
            assert_manifests_match(&result_md, &reference_md, key)?;
            found_manifest = true;
        } else if result_md[key] != *reference_value {
            return Err(MattecheckError::mismatch(format!(
                "metadata '{key}' doesn't match: {} vs {reference_value}",
                result_md[key]
            )));
        }
    }

    if !found_manifest {
        return Err(MattecheckError::mismatch(format!(
            "no manifest found in '{}'",
            reference.path.display()
        )));
    }

    Ok(())
}

/// Measure coverage error between two cryptomatte images.
///
/// A per-pixel image diff is useless here: different sampling reshuffles which
/// ID lands in which channel slot, producing giant errors for identical
/// mattes. Instead each pixel's (ID, coverage) pairs are collected into a map
/// per stream and diffed by ID value. Pairs storing (0.0, 0.0) are empty
/// slots and never count as samples.
#[tracing::instrument(skip_all, fields(image = %result.path.display()))]
pub fn measure_coverage(result: &Raster, reference: &Raster) -> MattecheckResult<CoverageStats> {
    let result_streams = group_streams(result)?;
    let reference_streams = group_streams(reference)?;

    let window_w = compare_width(result, reference);
    let window_h = compare_height(result, reference);

    let mut stats = CoverageStats::default();
    for y in 0..window_h {
        for x in 0..window_w {
            for (name, result_stream) in &result_streams {
                let reference_stream = reference_streams.get(name).ok_or_else(|| {
                    MattecheckError::mismatch(format!(
                        "reference '{}' has no cryptomatte stream '{name}'",
                        reference.path.display()
                    ))
                })?;

                let result_cov = id_coverage(result, &result_stream.channel_pairs, x, y);
                let reference_cov = id_coverage(reference, &reference_stream.channel_pairs, x, y);

                for (id, coverage) in &reference_cov {
                    let delta =
                        (coverage - result_cov.get(id).copied().unwrap_or(0.0)).abs();
                    stats.total_samples += 1;
                    stats.squared_error += delta * delta;
                    if delta > VERY_DIFFERENT_DELTA {
                        stats.very_different += 1;
                    }
                }
                for (id, coverage) in &result_cov {
                    if reference_cov.contains_key(id) {
                        continue;
                    }
                    // Reference is implicitly zero for an ID it never saw.
                    stats.total_samples += 1;
                    stats.squared_error += coverage * coverage;
                    if *coverage > VERY_DIFFERENT_DELTA {
                        stats.very_different += 1;
                    }
                }
            }
        }
    }

    if stats.total_samples == 0 {
        return Err(MattecheckError::mismatch(format!(
            "no coverage values in '{}'",
            result.path.display()
        )));
    }

    tracing::debug!(
        rms = stats.rms(),
        very_different = stats.very_different,
        total_samples = stats.total_samples,
        "coverage measured"
    );
    Ok(stats)
}

/// Assert cryptomatte coverage matches within tolerances.
pub fn assert_coverage_within(
    result: &Raster,
    reference: &Raster,
    tolerances: &Tolerances,
) -> MattecheckResult<CoverageStats> {
    let stats = measure_coverage(result, reference)?;

    if stats.very_different >= tolerances.max_very_different {
        return Err(MattecheckError::tolerance(format!(
            "{} matte samples were very different (max tolerated: {}), rms: {}",
            stats.very_different,
            tolerances.max_very_different,
            stats.rms()
        )));
    }
    if stats.rms() >= tolerances.rms {
        return Err(MattecheckError::tolerance(format!(
            "root mean square error {} was not below {} ({} very different samples)",
            stats.rms(),
            tolerances.rms,
            stats.very_different
        )));
    }
    Ok(stats)
}

/// Assert all channels not claimed by any cryptomatte stream match within a
/// simple per-channel RMS tolerance.
#[tracing::instrument(skip_all, fields(image = %result.path.display()))]
pub fn assert_non_crypto_channels_match(
    result: &Raster,
    reference: &Raster,
    rms_tolerance: f64,
) -> MattecheckResult<()> {
    let result_claimed = claimed_channel_indices(result)?;
    let reference_claimed = claimed_channel_indices(reference)?;
    if result_claimed != reference_claimed {
        return Err(MattecheckError::mismatch(format!(
            "cryptomatte channel layout doesn't match: {result_claimed:?} vs {reference_claimed:?}"
        )));
    }

    let claimed: BTreeSet<usize> = result_claimed.into_iter().collect();
    let window_w = compare_width(result, reference);
    let window_h = compare_height(result, reference);
    let sample_count = (window_w * window_h) as f64;

    for (index, name) in result.channel_names.iter().enumerate() {
        if claimed.contains(&index) {
            continue;
        }
        let reference_index = reference
            .channel_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| {
                MattecheckError::mismatch(format!(
                    "reference '{}' has no channel '{name}'",
                    reference.path.display()
                ))
            })?;

        let mut squared_error = 0.0f64;
        for y in 0..window_h {
            for x in 0..window_w {
                let delta = f64::from(
                    result.value(index, x, y) - reference.value(reference_index, x, y),
                )
                .abs();
                squared_error += delta * delta;
            }
        }

        let rms = (squared_error / sample_count).sqrt();
        tracing::debug!(channel = %name, rms, "non-cryptomatte channel measured");
        if rms >= rms_tolerance {
            return Err(MattecheckError::tolerance(format!(
                "root mean square error {rms} was not below {rms_tolerance} (channel: {name})"
            )));
        }
    }

    Ok(())
}

/// Measure a plain per-sample comparison between two images, channel by
/// channel matched by name, over the shared area. Used for outputs without
/// cryptomatte semantics (preview images, jpeg drivers).
pub fn measure_plain(
    result: &Raster,
    reference: &Raster,
    threshold: f32,
) -> MattecheckResult<PlainStats> {
    assert_same_channels(result, reference)?;

    let width = result.width.min(reference.width);
    let height = result.height.min(reference.height);

    let reference_index: HashMap<&str, usize> = reference
        .channel_names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.as_str(), i))
        .collect();

    let mut stats = PlainStats::default();
    let mut error_sum = 0.0f64;
    let mut squared_sum = 0.0f64;
    for (index, name) in result.channel_names.iter().enumerate() {
        let reference_idx = reference_index[name.as_str()];
        for y in 0..height {
            for x in 0..width {
                let delta =
                    f64::from(result.value(index, x, y) - reference.value(reference_idx, x, y))
                        .abs();
                stats.total_samples += 1;
                error_sum += delta;
                squared_sum += delta * delta;
                if delta > stats.max_error {
                    stats.max_error = delta;
                }
                if delta > f64::from(threshold) {
                    stats.failing_samples += 1;
                }
            }
        }
    }

    if stats.total_samples > 0 {
        stats.mean_error = error_sum / stats.total_samples as f64;
        stats.rms = (squared_sum / stats.total_samples as f64).sqrt();
    }
    Ok(stats)
}

/// Assert a plain comparison has no samples beyond `threshold`.
pub fn assert_images_equal(
    result: &Raster,
    reference: &Raster,
    threshold: f32,
) -> MattecheckResult<PlainStats> {
    let stats = measure_plain(result, reference, threshold)?;
    if stats.failing_samples != 0 {
        return Err(MattecheckError::tolerance(format!(
            "'{}' did not match within threshold {threshold}: {} failing samples, mean error {}, rms {}, max error {}",
            result.path.display(),
            stats.failing_samples,
            stats.mean_error,
            stats.rms,
            stats.max_error
        )));
    }
    Ok(stats)
}

fn compare_width(a: &Raster, b: &Raster) -> usize {
    COMPARE_WINDOW.min(a.width).min(b.width)
}

fn compare_height(a: &Raster, b: &Raster) -> usize {
    COMPARE_WINDOW.min(a.height).min(b.height)
}

/// Coverage keyed by the exact bit pattern of the ID sample (with -0.0
/// normalized), matching the original's exact float-equality dictionary.
fn id_coverage(
    raster: &Raster,
    channel_pairs: &[(usize, usize)],
    x: usize,
    y: usize,
) -> BTreeMap<u32, f64> {
    let mut coverage = BTreeMap::new();
    for &(id_channel, coverage_channel) in channel_pairs {
        let id = raster.value(id_channel, x, y);
        let cov = raster.value(coverage_channel, x, y);
        if id == 0.0 && cov == 0.0 {
            continue;
        }
        let key = if id == 0.0 { 0.0f32 } else { id }.to_bits();
        coverage.insert(key, f64::from(cov));
    }
    coverage
}

/// Flat list of claimed channel indices in stream-name order, for positional
/// comparison between two images.
fn claimed_channel_indices(raster: &Raster) -> MattecheckResult<Vec<usize>> {
    let mut indices = Vec::new();
    for stream in group_streams(raster)?.values() {
        for &(id_channel, coverage_channel) in &stream.channel_pairs {
            indices.push(id_channel);
            indices.push(coverage_channel);
        }
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn raster(metadata: &[(&str, &str)], channels: &[(&str, Vec<f32>)]) -> Raster {
        Raster::from_channels(
            PathBuf::from("mem.exr"),
            1,
            1,
            channels
                .iter()
                .map(|(name, plane)| (name.to_string(), plane.clone()))
                .collect(),
            metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn compression_must_match_and_be_allowed() {
        let zip = raster(&[("compression", "zip")], &[]);
        let zips = raster(&[("compression", "zips")], &[]);
        let piz = raster(&[("compression", "piz")], &[]);

        assert_compression_valid(&zip, &zip).unwrap();
        let err = assert_compression_valid(&zip, &zips).unwrap_err();
        assert!(err.to_string().contains("does not match"));
        let err = assert_compression_valid(&piz, &piz).unwrap_err();
        assert!(err.to_string().contains("not of an allowed type"));
    }

    #[test]
    fn channel_sets_compare_as_sets() {
        let a = raster(&[], &[("R", vec![0.0]), ("G", vec![0.0])]);
        let b = raster(&[], &[("G", vec![0.0]), ("R", vec![0.0])]);
        let c = raster(&[], &[("R", vec![0.0])]);

        assert_same_channels(&a, &b).unwrap();
        assert!(assert_same_channels(&a, &c).is_err());
    }

    #[test]
    fn metadata_equality_requires_a_manifest() {
        let md = &[
            ("cryptomatte/abc/name", "crypto_object"),
            ("cryptomatte/abc/hash", "MurmurHash3_32"),
        ];
        let a = raster(md, &[]);
        let err = assert_crypto_metadata_matches(&a, &a).unwrap_err();
        assert!(err.to_string().contains("no manifest found"));
    }

    #[test]
    fn metadata_equality_checks_both_directions_and_values() {
        let base = &[
            ("cryptomatte/abc/name", "crypto_object"),
            ("cryptomatte/abc/hash", "MurmurHash3_32"),
            ("cryptomatte/abc/manifest", r#"{"ball": "1"}"#),
        ];
        let reference = raster(base, &[]);
        assert_crypto_metadata_matches(&reference, &reference).unwrap();

        let missing = raster(
            &[
                ("cryptomatte/abc/name", "crypto_object"),
                ("cryptomatte/abc/manifest", r#"{"ball": "1"}"#),
            ],
            &[],
        );
        let err = assert_crypto_metadata_matches(&missing, &reference).unwrap_err();
        assert!(err.to_string().contains("result missing metadata key"));

        let err = assert_crypto_metadata_matches(&reference, &missing).unwrap_err();
        assert!(err.to_string().contains("result has extra metadata key"));

        let different = raster(
            &[
                ("cryptomatte/abc/name", "crypto_object"),
                ("cryptomatte/abc/hash", "MurmurHash2"),
                ("cryptomatte/abc/manifest", r#"{"ball": "1"}"#),
            ],
            &[],
        );
        let err = assert_crypto_metadata_matches(&different, &reference).unwrap_err();
        assert!(err.to_string().contains("doesn't match"));
    }

    #[test]
    fn plain_comparison_reports_failing_samples() {
        let a = raster(&[], &[("R", vec![0.5])]);
        let b = raster(&[], &[("R", vec![0.8])]);

        assert_images_equal(&a, &b, 0.5).unwrap();
        let err = assert_images_equal(&a, &b, 0.1).unwrap_err();
        assert!(matches!(err, MattecheckError::Tolerance(_)));

        let stats = measure_plain(&a, &b, 0.1).unwrap();
        assert_eq!(stats.failing_samples, 1);
        assert!((stats.max_error - 0.3).abs() < 1e-6);
    }
}
