//! Deletion planning for targets whose source rows disappeared.

use std::collections::BTreeSet;

/// Target keys absent from the source, sorted.
///
/// An empty source snapshot plans nothing: an empty read is far more likely
/// to be an outage or a wrong filter than a genuinely emptied table.
pub fn plan_deletions(source_keys: &[String], target_keys: &[String]) -> Vec<String> {
    if source_keys.is_empty() {
        return Vec::new();
    }
    let source: BTreeSet<&str> = source_keys.iter().map(String::as_str).collect();
    let missing: BTreeSet<&str> = target_keys
        .iter()
        .map(String::as_str)
        .filter(|key| !source.contains(key))
        .collect();
    missing.into_iter().map(str::to_string).collect()
}
