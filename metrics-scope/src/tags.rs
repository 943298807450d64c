use std::collections::BTreeMap;

/// A set of tags.
///
/// Tags are kept ordered by key, which makes rendering them into an identity key deterministic.
pub type Tags = BTreeMap<String, String>;

/// Merges `overrides` on top of `base`.
///
/// Every tag from `base` is kept unless `overrides` has a tag with the same key, in which case the
/// value from `overrides` wins. When either side is missing or empty, the other side is returned
/// as-is, and merging two missing/empty sets returns `None`.
///
/// Neither input is modified.
pub fn merge_tags(base: Option<&Tags>, overrides: Option<&Tags>) -> Option<Tags> {
    let base = base.filter(|tags| !tags.is_empty());
    let overrides = overrides.filter(|tags| !tags.is_empty());

    match (base, overrides) {
        (None, None) => None,
        (Some(tags), None) | (None, Some(tags)) => Some(tags.clone()),
        (Some(base), Some(overrides)) => {
            let mut merged = base.clone();
            merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
            Some(merged)
        }
    }
}
