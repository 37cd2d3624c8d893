use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::Context as _;

use crate::{
    compare::{
        CoverageStats, PlainStats, Tolerances, assert_compression_valid,
        assert_coverage_within, assert_crypto_metadata_matches, assert_images_equal,
        assert_non_crypto_channels_match, assert_same_channels,
    },
    error::{MattecheckError, MattecheckResult},
    metadata::crypto_metadata,
    raster::Raster,
};

/// Immutable configuration of one kick-and-compare run, derived once from the
/// scene file path by convention and passed to every assertion.
///
/// Convention: for a scene `tests/cryptomatte/010_htoa_instances.ass`, results
/// are rendered into `tests/cryptomatte/010_result/` and compared against the
/// known-good `tests/cryptomatte/010_correct/`, with the render log at
/// `010_result/log.txt`.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub scene_file: PathBuf,
    pub test_dir: PathBuf,
    /// Plugin build directory, prepended to `ARNOLD_PLUGIN_PATH` for the render.
    pub build_dir: Option<PathBuf>,
    pub result_dir: PathBuf,
    pub reference_dir: PathBuf,
    pub log_path: PathBuf,
    pub verbosity: u32,
    pub threads: u32,
}

impl RunConfig {
    /// Derive a configuration from the scene file path.
    pub fn for_scene(scene_file: &Path) -> MattecheckResult<RunConfig> {
        let file_name = scene_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                MattecheckError::setup(format!(
                    "scene path '{}' has no usable file name",
                    scene_file.display()
                ))
            })?;
        let prefix: String = file_name.chars().take(3).collect();

        let test_dir = scene_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let result_dir = test_dir.join(format!("{prefix}_result"));
        let reference_dir = test_dir.join(format!("{prefix}_correct"));
        let log_path = result_dir.join("log.txt");

        Ok(RunConfig {
            scene_file: scene_file.to_path_buf(),
            test_dir,
            build_dir: None,
            result_dir,
            reference_dir,
            log_path,
            verbosity: 1,
            threads: 4,
        })
    }

    pub fn with_build_dir(mut self, build_dir: impl Into<PathBuf>) -> Self {
        self.build_dir = Some(build_dir.into());
        self
    }

    pub fn with_verbosity(mut self, verbosity: u32) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    /// Verify the on-disk layout and empty the result directory of stale
    /// files. Any problem here is fatal before a render is attempted.
    ///
    /// Existence is confirmed before anything is deleted, to mitigate the
    /// odds of cleaning out the wrong directory.
    pub fn prepare(&self) -> MattecheckResult<()> {
        if !self.scene_file.is_file() {
            return Err(MattecheckError::setup(format!(
                "no scene file found: {}",
                self.scene_file.display()
            )));
        }
        if !self.reference_dir.is_dir() {
            return Err(MattecheckError::setup(format!(
                "no reference result dir found: {}",
                self.reference_dir.display()
            )));
        }
        if let Some(build_dir) = &self.build_dir
            && !build_dir.is_dir()
        {
            return Err(MattecheckError::setup(format!(
                "no build dir found: {}",
                build_dir.display()
            )));
        }

        if self.result_dir.exists() {
            if !self.result_dir.is_dir() {
                return Err(MattecheckError::setup(format!(
                    "result path is not a directory: {}",
                    self.result_dir.display()
                )));
            }
        } else {
            std::fs::create_dir_all(&self.result_dir).map_err(|e| {
                MattecheckError::setup(format!(
                    "could not create result dir '{}': {e}",
                    self.result_dir.display()
                ))
            })?;
        }

        for name in file_names(&self.result_dir)? {
            let stale = self.result_dir.join(&name);
            std::fs::remove_file(&stale).map_err(|e| {
                MattecheckError::setup(format!(
                    "could not clean stale result file '{}': {e}",
                    stale.display()
                ))
            })?;
        }

        let remaining = file_names(&self.result_dir)?;
        if !remaining.is_empty() {
            return Err(MattecheckError::setup(format!(
                "result files were not cleaned up: {remaining:?}"
            )));
        }

        Ok(())
    }

    /// Invoke the renderer and block until it exits. A non-zero exit code is
    /// a setup failure, not a comparison failure.
    pub fn render(&self) -> MattecheckResult<()> {
        let scene_name = self
            .scene_file
            .file_name()
            .ok_or_else(|| MattecheckError::setup("scene path has no file name"))?;

        let mut cmd = Command::new("kick");
        cmd.arg("-v")
            .arg(self.verbosity.to_string())
            .arg("-t")
            .arg(self.threads.to_string())
            .args(["-dp", "-dw", "-sl", "-nostdin", "-logfile"])
            .arg(&self.log_path)
            .arg("-i")
            .arg(scene_name)
            .current_dir(&self.test_dir);

        if let Some(build_dir) = &self.build_dir {
            let mut paths = vec![build_dir.clone()];
            if let Some(existing) = std::env::var_os("ARNOLD_PLUGIN_PATH") {
                paths.extend(std::env::split_paths(&existing));
            }
            let joined = std::env::join_paths(paths)
                .context("join ARNOLD_PLUGIN_PATH entries")?;
            cmd.env("ARNOLD_PLUGIN_PATH", joined);
        }

        tracing::info!(scene = %self.scene_file.display(), "invoking kick");
        let status = cmd.status().map_err(|e| {
            MattecheckError::setup(format!("failed to spawn kick (is it on PATH?): {e}"))
        })?;
        if !status.success() {
            return Err(MattecheckError::setup(format!(
                "render return code indicates a failure: {status}"
            )));
        }
        Ok(())
    }
}

/// Names of the regular files directly inside `dir`.
pub fn file_names(dir: &Path) -> MattecheckResult<BTreeSet<String>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("list directory '{}'", dir.display()))?;

    let mut names = BTreeSet::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry of '{}'", dir.display()))?;
        if entry.path().is_file()
            && let Some(name) = entry.file_name().to_str()
        {
            names.insert(name.to_string());
        }
    }
    Ok(names)
}

/// Assert the result and reference directories contain exactly the same file
/// names, in both directions.
pub fn assert_all_result_files_present(
    result_dir: &Path,
    reference_dir: &Path,
) -> MattecheckResult<()> {
    let result_names = file_names(result_dir)?;
    let reference_names = file_names(reference_dir)?;

    for name in &reference_names {
        if !result_names.contains(name) {
            return Err(MattecheckError::mismatch(format!(
                "result file '{name}' not found for reference file in {}",
                result_dir.display()
            )));
        }
    }
    for name in &result_names {
        if !reference_names.contains(name) {
            return Err(MattecheckError::mismatch(format!(
                "reference file '{name}' not found for result file in {}",
                reference_dir.display()
            )));
        }
    }
    Ok(())
}

/// Load the result/reference images for one file name. Returns `Ok(None)`
/// when the extension is not a comparable image container.
pub fn load_image_pair(
    result_dir: &Path,
    reference_dir: &Path,
    file_name: &str,
) -> MattecheckResult<Option<(Raster, Raster)>> {
    let Some(result) = Raster::load(&result_dir.join(file_name))? else {
        return Ok(None);
    };
    let Some(reference) = Raster::load(&reference_dir.join(file_name))? else {
        return Ok(None);
    };
    Ok(Some((result, reference)))
}

/// Assert the render log contains a substring (e.g. proof that in-plugin unit
/// tests ran to completion).
pub fn assert_log_contains(log_path: &Path, needle: &str) -> MattecheckResult<()> {
    let content = std::fs::read_to_string(log_path)
        .with_context(|| format!("read render log '{}'", log_path.display()))?;
    if !content.contains(needle) {
        return Err(MattecheckError::mismatch(format!(
            "render log '{}' does not contain '{needle}'",
            log_path.display()
        )));
    }
    Ok(())
}

/// Outcome of comparing one file of a run.
#[derive(Clone, Debug, serde::Serialize)]
pub struct FileReport {
    pub file: String,
    /// Present for cryptomatte exr comparisons.
    pub coverage: Option<CoverageStats>,
    /// Present for plain image comparisons.
    pub plain: Option<PlainStats>,
    /// True for files whose extension is not a comparable image container.
    pub skipped: bool,
}

/// Successful comparison summary for a whole run. A failing assertion aborts
/// the run with an error instead.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct CompareReport {
    pub files: Vec<FileReport>,
}

/// Run every check over a rendered result directory: file-set completeness,
/// then per comparable image pair channel sets, and for every exr pair equal
/// and allowed compression. Pairs with cryptomatte metadata on the reference
/// side get the metadata, coverage, and non-cryptomatte channel checks;
/// everything else gets a plain comparison with `plain_threshold`.
#[tracing::instrument(skip_all, fields(result_dir = %config.result_dir.display()))]
pub fn compare_all(
    config: &RunConfig,
    tolerances: &Tolerances,
    plain_threshold: f32,
) -> MattecheckResult<CompareReport> {
    assert_all_result_files_present(&config.result_dir, &config.reference_dir)?;

    let mut report = CompareReport::default();
    for file_name in file_names(&config.reference_dir)? {
        let Some((result, reference)) =
            load_image_pair(&config.result_dir, &config.reference_dir, &file_name)?
        else {
            report.files.push(FileReport {
                file: file_name,
                coverage: None,
                plain: None,
                skipped: true,
            });
            continue;
        };

        assert_same_channels(&result, &reference)?;
        if reference.is_exr() {
            assert_compression_valid(&result, &reference)?;
        }

        let has_crypto = !crypto_metadata(&reference)?.is_empty();
        let (coverage, plain) = if reference.is_exr() && has_crypto {
            assert_crypto_metadata_matches(&result, &reference)?;
            let stats = assert_coverage_within(&result, &reference, tolerances)?;
            assert_non_crypto_channels_match(&result, &reference, tolerances.rms)?;
            (Some(stats), None)
        } else {
            let stats = assert_images_equal(&result, &reference, plain_threshold)?;
            (None, Some(stats))
        };

        tracing::info!(file = %file_name, "compared");
        report.files.push(FileReport {
            file: file_name,
            coverage,
            plain,
            skipped: false,
        });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_convention_uses_scene_prefix() {
        let config = RunConfig::for_scene(Path::new("tests/cryptomatte/010_htoa.ass")).unwrap();
        assert_eq!(config.test_dir, Path::new("tests/cryptomatte"));
        assert_eq!(config.result_dir, Path::new("tests/cryptomatte/010_result"));
        assert_eq!(
            config.reference_dir,
            Path::new("tests/cryptomatte/010_correct")
        );
        assert_eq!(
            config.log_path,
            Path::new("tests/cryptomatte/010_result/log.txt")
        );
    }

    #[test]
    fn missing_reference_file_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let result_dir = root.path().join("result");
        let reference_dir = root.path().join("correct");
        std::fs::create_dir_all(&result_dir).unwrap();
        std::fs::create_dir_all(&reference_dir).unwrap();
        std::fs::write(result_dir.join("a.exr"), b"x").unwrap();
        std::fs::write(reference_dir.join("a.exr"), b"x").unwrap();
        std::fs::write(reference_dir.join("b.exr"), b"x").unwrap();

        let err = assert_all_result_files_present(&result_dir, &reference_dir).unwrap_err();
        assert!(err.to_string().contains("result file 'b.exr' not found"));
    }

    #[test]
    fn extra_result_file_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let result_dir = root.path().join("result");
        let reference_dir = root.path().join("correct");
        std::fs::create_dir_all(&result_dir).unwrap();
        std::fs::create_dir_all(&reference_dir).unwrap();
        std::fs::write(result_dir.join("a.exr"), b"x").unwrap();
        std::fs::write(result_dir.join("c.exr"), b"x").unwrap();
        std::fs::write(reference_dir.join("a.exr"), b"x").unwrap();

        let err = assert_all_result_files_present(&result_dir, &reference_dir).unwrap_err();
        assert!(err.to_string().contains("reference file 'c.exr' not found"));
    }

    #[test]
    fn prepare_cleans_stale_result_files() {
        let root = tempfile::tempdir().unwrap();
        let scene = root.path().join("000_scene.ass");
        std::fs::write(&scene, b"options {}").unwrap();
        std::fs::create_dir_all(root.path().join("000_correct")).unwrap();

        let config = RunConfig::for_scene(&scene).unwrap();
        std::fs::create_dir_all(&config.result_dir).unwrap();
        std::fs::write(config.result_dir.join("stale.exr"), b"old").unwrap();

        config.prepare().unwrap();
        assert!(file_names(&config.result_dir).unwrap().is_empty());
    }

    #[test]
    fn prepare_fails_without_reference_dir() {
        let root = tempfile::tempdir().unwrap();
        let scene = root.path().join("000_scene.ass");
        std::fs::write(&scene, b"options {}").unwrap();

        let err = RunConfig::for_scene(&scene).unwrap().prepare().unwrap_err();
        assert!(matches!(err, MattecheckError::Setup(_)));
    }

    #[test]
    fn log_content_check() {
        let root = tempfile::tempdir().unwrap();
        let log = root.path().join("log.txt");
        std::fs::write(&log, "Cryptomatte unit tests: Complete\n").unwrap();

        assert_log_contains(&log, "Cryptomatte unit tests: Complete").unwrap();
        let err = assert_log_contains(&log, "Cryptomatte unit tests: Running").unwrap_err();
        assert!(matches!(err, MattecheckError::Mismatch(_)));
    }
}
