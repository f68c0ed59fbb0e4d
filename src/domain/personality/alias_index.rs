use std::collections::{BTreeMap, BTreeSet};

use super::repository::PersonalityRecord;
use super::value_objects::Alias;

// ============================================================================
// Alias Index - lower-cased alias -> personality id
// ============================================================================
//
// Derived from each personality's own alias list and never authoritative.
// Across personalities the first writer keeps a key; a later claim is a
// conflict, reported to the caller and skipped.
//
// ============================================================================

pub type AliasIndex = BTreeMap<String, String>;

/// An alias that could not be indexed because another personality holds it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasConflict {
    pub alias: String,
    pub claimed_by: String,
    pub held_by: String,
}

/// Bring the index in line with one personality's current alias list.
///
/// Entries pointing at `id` that are no longer on the list are dropped, new
/// aliases are added unless another personality already holds the key.
pub fn reindex(index: &mut AliasIndex, id: &str, aliases: &[Alias]) -> Vec<AliasConflict> {
    let current: BTreeSet<&str> = aliases.iter().map(|a| a.value.as_str()).collect();
    index.retain(|key, owner| owner != id || current.contains(key.as_str()));

    let mut conflicts = Vec::new();
    for alias in aliases {
        match index.get(&alias.value) {
            Some(owner) if owner != id => conflicts.push(AliasConflict {
                alias: alias.value.clone(),
                claimed_by: id.to_string(),
                held_by: owner.clone(),
            }),
            Some(_) => {}
            None => {
                index.insert(alias.value.clone(), id.to_string());
            }
        }
    }
    conflicts
}

/// Drop every entry pointing at `id`; returns how many were removed
pub fn remove_owner(index: &mut AliasIndex, id: &str) -> usize {
    let before = index.len();
    index.retain(|_, owner| owner != id);
    before - index.len()
}

/// Additive repair: re-add aliases found on records but missing from the
/// index. Existing entries, stale or not, are left alone.
pub fn repair_missing(
    index: &mut AliasIndex,
    records: &BTreeMap<String, PersonalityRecord>,
) -> usize {
    let mut added = 0;
    for record in by_creation(records) {
        for alias in &record.aliases {
            if !index.contains_key(&alias.value) {
                index.insert(alias.value.clone(), record.id.clone());
                added += 1;
            }
        }
    }
    added
}

/// Full reconstruction from the records, oldest personality first
pub fn rebuild(records: &BTreeMap<String, PersonalityRecord>) -> (AliasIndex, Vec<AliasConflict>) {
    let mut index = AliasIndex::new();
    let mut conflicts = Vec::new();
    for record in by_creation(records) {
        conflicts.extend(reindex(&mut index, &record.id, &record.aliases));
    }
    (index, conflicts)
}

fn by_creation(records: &BTreeMap<String, PersonalityRecord>) -> Vec<&PersonalityRecord> {
    let mut ordered: Vec<&PersonalityRecord> = records.values().collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases(raw: &[&str]) -> Vec<Alias> {
        raw.iter().map(|a| Alias::new(a).unwrap()).collect()
    }

    #[test]
    fn test_reindex_tracks_current_list() {
        let mut index = AliasIndex::new();

        reindex(&mut index, "aria", &aliases(&["Muse", "Bard"]));
        assert_eq!(index.len(), 2);

        reindex(&mut index, "aria", &aliases(&["Bard", "Poet"]));
        assert_eq!(index.get("bard").map(String::as_str), Some("aria"));
        assert_eq!(index.get("poet").map(String::as_str), Some("aria"));
        assert!(!index.contains_key("muse"));
    }

    #[test]
    fn test_first_writer_wins() {
        let mut index = AliasIndex::new();
        reindex(&mut index, "b", &aliases(&["x"]));

        let conflicts = reindex(&mut index, "a", &aliases(&["X", "y"]));

        assert_eq!(index.get("x").map(String::as_str), Some("b"));
        assert_eq!(index.get("y").map(String::as_str), Some("a"));
        assert_eq!(
            conflicts,
            vec![AliasConflict { alias: "x".into(), claimed_by: "a".into(), held_by: "b".into() }]
        );
    }

    #[test]
    fn test_reindex_leaves_other_owners_alone() {
        let mut index = AliasIndex::new();
        reindex(&mut index, "b", &aliases(&["x"]));
        reindex(&mut index, "a", &[]);

        assert_eq!(index.get("x").map(String::as_str), Some("b"));
    }

    #[test]
    fn test_remove_owner() {
        let mut index = AliasIndex::new();
        reindex(&mut index, "a", &aliases(&["x", "y"]));
        reindex(&mut index, "b", &aliases(&["z"]));

        assert_eq!(remove_owner(&mut index, "a"), 2);
        assert_eq!(index.len(), 1);
    }
}
