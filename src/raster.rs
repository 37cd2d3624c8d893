use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::error::{MattecheckError, MattecheckResult};

/// Image container extensions the comparator understands. Anything else is
/// skipped as "not comparable" rather than rejected.
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["exr", "tif", "png", "jpg"];

/// A decoded raster: an ordered list of named planar `f32` channels plus a
/// flat string metadata map. Read-only once loaded.
///
/// EXR files keep their custom attributes (this is where cryptomatte metadata
/// lives) and gain a synthesized `compression` entry using the OIIO-style
/// lowercase name. Low-dynamic-range files decode to `R`/`G`/`B`/`A` channels
/// in `0..=1` and carry no metadata.
#[derive(Clone, Debug)]
pub struct Raster {
    pub path: PathBuf,
    pub width: usize,
    pub height: usize,
    pub channel_names: Vec<String>,
    samples: Vec<Vec<f32>>,
    pub metadata: BTreeMap<String, String>,
}

impl Raster {
    /// Load an image from disk, dispatching on the file extension.
    ///
    /// Returns `Ok(None)` for extensions outside [`ALLOWED_EXTENSIONS`].
    pub fn load(path: &Path) -> MattecheckResult<Option<Raster>> {
        let Some(ext) = comparable_extension(path) else {
            return Ok(None);
        };

        let raster = if ext == "exr" {
            load_exr(path)?
        } else {
            load_ldr(path)?
        };
        Ok(Some(raster))
    }

    /// Build a raster from in-memory planes. Channel lengths must all equal
    /// `width * height`.
    pub fn from_channels(
        path: impl Into<PathBuf>,
        width: usize,
        height: usize,
        channels: Vec<(String, Vec<f32>)>,
        metadata: BTreeMap<String, String>,
    ) -> MattecheckResult<Raster> {
        let mut channel_names = Vec::with_capacity(channels.len());
        let mut samples = Vec::with_capacity(channels.len());
        for (name, plane) in channels {
            if plane.len() != width * height {
                return Err(MattecheckError::load(format!(
                    "channel '{name}' has {} samples, expected {}",
                    plane.len(),
                    width * height
                )));
            }
            channel_names.push(name);
            samples.push(plane);
        }

        Ok(Raster {
            path: path.into(),
            width,
            height,
            channel_names,
            samples,
            metadata,
        })
    }

    /// Sample value of one channel at `(x, y)`, row-major.
    pub fn value(&self, channel: usize, x: usize, y: usize) -> f32 {
        self.samples[channel][y * self.width + x]
    }

    pub fn channel_count(&self) -> usize {
        self.channel_names.len()
    }

    pub fn is_exr(&self) -> bool {
        comparable_extension(&self.path).is_some_and(|ext| ext == "exr")
    }

    /// Directory the image was loaded from; sidecar files resolve against it.
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Lowercased extension if it is one the comparator accepts.
pub fn comparable_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

fn load_exr(path: &Path) -> MattecheckResult<Raster> {
    use exr::prelude::*;

    let image = read()
        .no_deep_data()
        .largest_resolution_level()
        .all_channels()
        .all_layers()
        .all_attributes()
        .from_file(path)
        .map_err(|e| {
            MattecheckError::load(format!("failed to read exr '{}': {e}", path.display()))
        })?;

    let mut metadata = BTreeMap::new();
    for (name, value) in &image.attributes.other {
        if let Some(text) = attribute_to_string(value) {
            metadata.insert(name.to_string(), text);
        }
    }

    let layer = image.layer_data.first().ok_or_else(|| {
        MattecheckError::load(format!("exr '{}' contains no layers", path.display()))
    })?;

    // Cryptomatte metadata is written as plain header attributes, which the
    // reader surfaces on the layer for single-part files.
    for layer in &image.layer_data {
        for (name, value) in &layer.attributes.other {
            if let Some(text) = attribute_to_string(value) {
                metadata.insert(name.to_string(), text);
            }
        }
    }

    metadata.insert(
        "compression".to_string(),
        compression_name(layer.encoding.compression).to_string(),
    );

    let width = layer.size.width();
    let height = layer.size.height();

    let mut channel_names = Vec::new();
    let mut samples = Vec::new();
    for channel in &layer.channel_data.list {
        let plane: Vec<f32> = channel.sample_data.values_as_f32().collect();
        if plane.len() != width * height {
            return Err(MattecheckError::load(format!(
                "channel '{}' of '{}' has {} samples for a {width}x{height} layer",
                channel.name,
                path.display(),
                plane.len()
            )));
        }
        channel_names.push(channel.name.to_string());
        samples.push(plane);
    }

    Ok(Raster {
        path: path.to_path_buf(),
        width,
        height,
        channel_names,
        samples,
        metadata,
    })
}

fn load_ldr(path: &Path) -> MattecheckResult<Raster> {
    let dyn_img = image::open(path).map_err(|e| {
        MattecheckError::load(format!("failed to decode '{}': {e}", path.display()))
    })?;
    let rgba = dyn_img.to_rgba32f();
    let (width, height) = rgba.dimensions();

    let mut planes: Vec<Vec<f32>> = vec![Vec::with_capacity((width * height) as usize); 4];
    for px in rgba.pixels() {
        for (plane, value) in planes.iter_mut().zip(px.0) {
            plane.push(value);
        }
    }

    let mut channel_names = Vec::with_capacity(4);
    let mut samples = Vec::with_capacity(4);
    for (name, plane) in ["R", "G", "B", "A"].into_iter().zip(planes) {
        channel_names.push(name.to_string());
        samples.push(plane);
    }

    Ok(Raster {
        path: path.to_path_buf(),
        width: width as usize,
        height: height as usize,
        channel_names,
        samples,
        metadata: BTreeMap::new(),
    })
}

/// OIIO-style compression attribute value for an exr encoding.
pub fn compression_name(compression: exr::compression::Compression) -> &'static str {
    use exr::compression::Compression;
    match compression {
        Compression::Uncompressed => "none",
        Compression::RLE => "rle",
        Compression::ZIP1 => "zips",
        Compression::ZIP16 => "zip",
        Compression::PIZ => "piz",
        Compression::PXR24 => "pxr24",
        Compression::B44 => "b44",
        Compression::B44A => "b44a",
        Compression::DWAA(_) => "dwaa",
        Compression::DWAB(_) => "dwab",
        Compression::HTJ2K32 => "htj2k32",
        Compression::HTJ2K256 => "htj2k256",
    }
}

fn attribute_to_string(value: &exr::meta::attribute::AttributeValue) -> Option<String> {
    use exr::meta::attribute::AttributeValue;
    match value {
        AttributeValue::Text(text) => Some(text.to_string()),
        AttributeValue::F32(v) => Some(v.to_string()),
        AttributeValue::F64(v) => Some(v.to_string()),
        AttributeValue::I32(v) => Some(v.to_string()),
        _ => None,
    }
}
