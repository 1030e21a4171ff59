use fxhash::FxBuildHasher;
use std::hash::Hash;

/// Hash map used for resource maps and lookup tables.
///
/// Iteration order is unspecified, use [`sorted_entries`] whenever the order is observable
/// (command arguments, printed tables).
pub type Map<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;

pub type Set<T> = hashbrown::HashSet<T, FxBuildHasher>;

/// Returns the entries of `map` ordered by key.
pub fn sorted_entries<K: Ord + Eq + Hash, V>(map: &Map<K, V>) -> Vec<(&K, &V)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
    entries
}
