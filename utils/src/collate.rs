//! Path collation used by every sorted, persisted structure (the tree's
//! sorted index and the hash cache). The order must be total and identical on
//! every platform, since binary searches run against data written elsewhere.

use std::cmp::Ordering;

/// Compares two storage paths: case-folded comparison first, raw characters as
/// the tiebreak so that distinct strings never compare equal.
pub fn collate_paths(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    match folded {
        Ordering::Equal => a.cmp(b),
        other => other,
    }
}

/// Normalizes a storage path: backslashes become slashes and a leading slash
/// is stripped. Keys are always stored in this form.
pub fn normalize_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    match normalized.strip_prefix('/') {
        Some(stripped) => stripped.to_owned(),
        None => normalized,
    }
}
