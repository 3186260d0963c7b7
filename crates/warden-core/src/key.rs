//! Node key arithmetic.
//!
//! Node keys are colon-delimited paths of numeric segments, e.g. `"1:4:9"`.
//! A single-segment key is a tenant root. The parent of a node is the node
//! whose key equals all but the last segment; parent keys are always derived,
//! never stored.
//!
//! Everything here is a pure function over strings. Malformed keys are
//! rejected when a node is inserted into a snapshot, not here.

/// The parent key of `key`, or `None` for a root (single-segment) key.
pub fn parent_key_of(key: &str) -> Option<&str> {
    key.rfind(':').map(|idx| &key[..idx])
}

/// Whether `child` sits strictly below `ancestor` in the tree.
///
/// A key is never a descendant of itself.
pub fn is_descendant(child: &str, ancestor: &str) -> bool {
    child.len() > ancestor.len()
        && child.as_bytes()[ancestor.len()] == b':'
        && child.starts_with(ancestor)
}

/// All ancestor keys of `key`, nearest first. With `with_self`, the key
/// itself comes before its ancestors.
pub fn ancestor_keys_of(key: &str, with_self: bool) -> Vec<String> {
    let mut keys = Vec::new();
    let mut current = key;
    if with_self {
        keys.push(current.to_string());
    }
    while let Some(parent) = parent_key_of(current) {
        keys.push(parent.to_string());
        current = parent;
    }
    keys
}

/// Number of segments in `key`. A root key has depth 1.
pub fn depth_of(key: &str) -> usize {
    key.split(':').count()
}

/// Sort keys so that every parent precedes its children, numerically by
/// segment ("1:2" before "1:10").
pub fn sort_for_load(keys: &mut [String]) {
    keys.sort_by_cached_key(|k| segments_of(k));
}

fn segments_of(key: &str) -> Vec<u64> {
    key.split(':')
        .map(|seg| seg.parse::<u64>().unwrap_or(u64::MAX))
        .collect()
}

/// Drop keys that are descendants of other keys in the set, leaving only
/// the topmost covering keys. Input order is not preserved.
pub fn clean_children_keys<I>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut sorted: Vec<String> = keys.into_iter().collect();
    sort_for_load(&mut sorted);

    let mut cleaned: Vec<String> = Vec::new();
    for key in sorted {
        if cleaned
            .last()
            .is_some_and(|base| is_descendant(&key, base) || *base == key)
        {
            continue;
        }
        cleaned.push(key);
    }
    cleaned
}
