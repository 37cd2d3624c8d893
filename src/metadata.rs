use std::collections::BTreeMap;

use crate::{
    error::{MattecheckError, MattecheckResult},
    raster::Raster,
};

/// Domain prefix of all cryptomatte metadata keys.
pub const METADATA_PREFIX: &str = "cryptomatte/";

/// The `<field>` component of a `cryptomatte/<stream-id>/<field>` key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamField {
    /// Human-readable stream name, e.g. `crypto_object`.
    Name,
    /// Name of the hash function used to produce ID values.
    Hash,
    /// Float conversion convention.
    Conversion,
    /// Embedded manifest JSON.
    Manifest,
    /// Relative path of a sidecar file containing the manifest JSON.
    ManifestFile,
}

impl StreamField {
    pub fn parse(s: &str) -> MattecheckResult<StreamField> {
        match s {
            "name" => Ok(StreamField::Name),
            "hash" => Ok(StreamField::Hash),
            "conv" => Ok(StreamField::Conversion),
            "manifest" => Ok(StreamField::Manifest),
            "manif_file" => Ok(StreamField::ManifestFile),
            other => Err(MattecheckError::mismatch(format!(
                "unrecognized cryptomatte metadata field '{other}'"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamField::Name => "name",
            StreamField::Hash => "hash",
            StreamField::Conversion => "conv",
            StreamField::Manifest => "manifest",
            StreamField::ManifestFile => "manif_file",
        }
    }
}

/// A cryptomatte metadata key, parsed once at ingestion instead of being
/// re-split wherever it is consumed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CryptoKey {
    pub stream_id: String,
    pub field: StreamField,
}

impl CryptoKey {
    /// Parse a metadata key. Keys outside the cryptomatte domain return
    /// `Ok(None)`; malformed cryptomatte keys are an error.
    pub fn parse(key: &str) -> MattecheckResult<Option<CryptoKey>> {
        let Some(rest) = key.strip_prefix(METADATA_PREFIX) else {
            return Ok(None);
        };

        let mut parts = rest.splitn(2, '/');
        let stream_id = parts.next().unwrap_or_default();
        let field = parts.next();
        let (Some(field), false) = (field, stream_id.is_empty()) else {
            return Err(MattecheckError::mismatch(format!(
                "malformed cryptomatte metadata key '{key}' (expected cryptomatte/<stream-id>/<field>)"
            )));
        };
        if field.contains('/') {
            return Err(MattecheckError::mismatch(format!(
                "malformed cryptomatte metadata key '{key}' (too many components)"
            )));
        }

        Ok(Some(CryptoKey {
            stream_id: stream_id.to_string(),
            field: StreamField::parse(field)?,
        }))
    }

    /// Full metadata key string.
    pub fn to_key(&self) -> String {
        format!("{METADATA_PREFIX}{}/{}", self.stream_id, self.field.as_str())
    }

    pub fn with_field(&self, field: StreamField) -> CryptoKey {
        CryptoKey {
            stream_id: self.stream_id.clone(),
            field,
        }
    }
}

/// All cryptomatte metadata of an image, keyed by the full metadata key.
///
/// Every `manif_file` entry is resolved relative to the image's directory and
/// its content inserted under the corresponding `manifest` key (the
/// `manif_file` entry itself is kept, so metadata key sets stay comparable
/// between sidecar and embedded outputs of the same kind). A missing sidecar
/// file is fatal for the current comparison.
pub fn crypto_metadata(raster: &Raster) -> MattecheckResult<BTreeMap<String, String>> {
    let mut metadata = BTreeMap::new();
    let mut sidecars = Vec::new();

    for (key, value) in &raster.metadata {
        let Some(parsed) = CryptoKey::parse(key)? else {
            continue;
        };
        if parsed.field == StreamField::ManifestFile {
            sidecars.push((parsed.clone(), value.clone()));
        }
        metadata.insert(key.clone(), value.clone());
    }

    for (key, file_name) in sidecars {
        let sidecar_path = raster.directory().join(&file_name);
        let content = std::fs::read_to_string(&sidecar_path).map_err(|e| {
            MattecheckError::load(format!(
                "failed to read sidecar manifest '{}': {e}",
                sidecar_path.display()
            ))
        })?;
        metadata.insert(key.with_field(StreamField::Manifest).to_key(), content);
    }

    Ok(metadata)
}
