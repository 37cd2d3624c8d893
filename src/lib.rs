#![forbid(unsafe_code)]

pub mod compare;
pub mod error;
pub mod harness;
pub mod manifest;
pub mod metadata;
pub mod raster;
pub mod streams;

pub use compare::{
    ALLOWED_COMPRESSION, COMPARE_WINDOW, CoverageStats, PlainStats, Tolerances,
    VERY_DIFFERENT_DELTA, assert_compression_valid, assert_coverage_within,
    assert_crypto_metadata_matches, assert_images_equal, assert_non_crypto_channels_match,
    assert_same_channels, measure_coverage, measure_plain,
};
pub use error::{MattecheckError, MattecheckResult};
pub use harness::{
    CompareReport, FileReport, RunConfig, assert_all_result_files_present, assert_log_contains,
    compare_all, load_image_pair,
};
pub use manifest::assert_manifests_match;
pub use metadata::{CryptoKey, METADATA_PREFIX, StreamField, crypto_metadata};
pub use raster::{ALLOWED_EXTENSIONS, Raster};
pub use streams::{StreamDescriptor, group_streams};
