//! Identity keys.
//!
//! An identity key is the canonical string form of a metric name plus its tags, and is what the
//! registry uses to decide whether two lookups refer to the same metric. Tags are rendered sorted
//! by key, so the insertion order of the tags never matters.
//!
//! The format is `<name>+<k1>=<v1>,<k2>=<v2>,...`.
use crate::Tags;

/// Separates the name from the rendered tags.
pub const KEY_NAME_SEPARATOR: char = '+';

/// Separates one rendered tag from the next.
pub const KEY_PAIR_SEPARATOR: char = ',';

/// Separates a tag key from its value.
pub const KEY_PAIR_SPLITTER: char = '=';

/// Generates the identity key for `name` and `tags`.
pub fn key_for_prefixed_string_map(name: &str, tags: &Tags) -> String {
    let tags_len = tags.iter().map(|(k, v)| k.len() + v.len() + 2).sum::<usize>();
    let mut key = String::with_capacity(name.len() + 1 + tags_len);
    key.push_str(name);
    key.push(KEY_NAME_SEPARATOR);
    write_tags(&mut key, tags);
    key
}

/// Generates the identity key for a set of tags on their own.
pub fn key_for_string_map(tags: &Tags) -> String {
    let mut key = String::new();
    write_tags(&mut key, tags);
    key
}

/// Extracts the metric name from an identity key.
///
/// Reporters that surface metrics by name use this to fold keys that differ only by tags back
/// into their shared name.
pub fn name_from_key(key: &str) -> &str {
    key.split_once(KEY_NAME_SEPARATOR).map_or(key, |(name, _)| name)
}

fn write_tags(key: &mut String, tags: &Tags) {
    // `Tags` iterates in key order already.
    for (i, (k, v)) in tags.iter().enumerate() {
        if i > 0 {
            key.push(KEY_PAIR_SEPARATOR);
        }
        key.push_str(k);
        key.push(KEY_PAIR_SPLITTER);
        key.push_str(v);
    }
}
