use std::collections::{BTreeMap, BTreeSet};

use crate::error::{MattecheckError, MattecheckResult};

/// Compare the manifests stored under `key` in two metadata mappings.
///
/// Order of names does not matter, contents do: both sides must parse as JSON
/// objects, the candidate manifest must be non-empty, and the name sets must
/// match exactly. Numeric ID hash values are not semantically validated.
///
/// A reference-side parse failure is a [`MattecheckError::Reference`]: the
/// known-good data is assumed trustworthy, so that is corrupt fixtures rather
/// than a regression in the candidate.
pub fn assert_manifests_match(
    result_md: &BTreeMap<String, String>,
    reference_md: &BTreeMap<String, String>,
    key: &str,
) -> MattecheckResult<()> {
    let reference_text = reference_md.get(key).ok_or_else(|| {
        MattecheckError::reference(format!("reference metadata has no manifest under '{key}'"))
    })?;
    let result_text = result_md
        .get(key)
        .ok_or_else(|| MattecheckError::mismatch(format!("result metadata is missing '{key}'")))?;

    let reference_names = parse_manifest_names(reference_text)
        .map_err(|e| MattecheckError::reference(format!("{key} - {e}")))?;
    let result_names = parse_manifest_names(result_text)
        .map_err(|e| MattecheckError::mismatch(format!("{key} - result manifest: {e}")))?;

    if result_names.is_empty() {
        return Err(MattecheckError::mismatch(format!(
            "{key} - result manifest is empty"
        )));
    }

    let missing: Vec<&String> = reference_names.difference(&result_names).collect();
    let extra: Vec<&String> = result_names.difference(&reference_names).collect();
    if !missing.is_empty() || !extra.is_empty() {
        return Err(MattecheckError::mismatch(format!(
            "{key} - missing manifest names: {missing:?}, extra manifest names: {extra:?}"
        )));
    }

    Ok(())
}

fn parse_manifest_names(text: &str) -> Result<BTreeSet<String>, String> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("could not be loaded: {e}"))?;
    let object = value
        .as_object()
        .ok_or_else(|| "is not a JSON object".to_string())?;
    Ok(object.keys().cloned().collect())
}
