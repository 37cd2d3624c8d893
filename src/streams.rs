use std::collections::{BTreeMap, HashMap};

use crate::{
    error::{MattecheckError, MattecheckResult},
    metadata::{CryptoKey, StreamField, crypto_metadata},
    raster::Raster,
};

/// One cryptomatte stream of an image: its metadata fields and the ordered
/// (ID-channel, coverage-channel) index pairs carrying its rank data.
#[derive(Clone, Debug)]
pub struct StreamDescriptor {
    pub stream_id: String,
    /// Display name from the `name` field, e.g. `crypto_object`.
    pub name: String,
    pub fields: BTreeMap<StreamField, String>,
    /// Interleaved (R,G) and (B,A) channel index pairs, in channel-list order.
    pub channel_pairs: Vec<(usize, usize)>,
}

/// Group an image's cryptomatte metadata into per-stream descriptors, keyed by
/// stream name, and scan the channel list for each stream's ID/coverage pairs.
///
/// A rank channel `X.R` pairs with `X.G` as one ID/coverage pair and `X.B`
/// with `X.A` as a second. A channel belongs to a stream when its name starts
/// with the stream name but not with `"<stream>."` (which would be a
/// sub-property channel such as the preview). Note this prefix test cannot
/// distinguish a stream whose name is a strict prefix of a sibling stream's
/// rank channels; fixture naming avoids that collision today.
pub fn group_streams(raster: &Raster) -> MattecheckResult<BTreeMap<String, StreamDescriptor>> {
    let metadata = crypto_metadata(raster)?;

    let mut by_id: BTreeMap<String, BTreeMap<StreamField, String>> = BTreeMap::new();
    for (key, value) in &metadata {
        let Some(parsed) = CryptoKey::parse(key)? else {
            continue;
        };
        by_id
            .entry(parsed.stream_id)
            .or_default()
            .insert(parsed.field, value.clone());
    }

    let channel_index: HashMap<&str, usize> = raster
        .channel_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let mut streams = BTreeMap::new();
    for (stream_id, fields) in by_id {
        let name = fields.get(&StreamField::Name).cloned().ok_or_else(|| {
            MattecheckError::mismatch(format!(
                "cryptomatte stream '{stream_id}' of '{}' has no name field",
                raster.path.display()
            ))
        })?;

        let channel_pairs = scan_channel_pairs(raster, &channel_index, &name)?;

        streams.insert(
            name.clone(),
            StreamDescriptor {
                stream_id,
                name,
                fields,
                channel_pairs,
            },
        );
    }

    Ok(streams)
}

fn scan_channel_pairs(
    raster: &Raster,
    channel_index: &HashMap<&str, usize>,
    stream_name: &str,
) -> MattecheckResult<Vec<(usize, usize)>> {
    let sub_property_prefix = format!("{stream_name}.");
    let mut pairs = Vec::new();

    for (red_idx, channel) in raster.channel_names.iter().enumerate() {
        if !channel.starts_with(stream_name) || channel.starts_with(&sub_property_prefix) {
            continue;
        }
        let Some(base) = channel.strip_suffix(".R") else {
            continue;
        };

        let mut sibling = |suffix: &str| -> MattecheckResult<usize> {
            let sibling_name = format!("{base}.{suffix}");
            channel_index.get(sibling_name.as_str()).copied().ok_or_else(|| {
                MattecheckError::mismatch(format!(
                    "'{}' has channel '{channel}' but no '{sibling_name}'",
                    raster.path.display()
                ))
            })
        };

        let green_idx = sibling("G")?;
        let blue_idx = sibling("B")?;
        let alpha_idx = sibling("A")?;

        pairs.push((red_idx, green_idx));
        pairs.push((blue_idx, alpha_idx));
    }

    Ok(pairs)
}
