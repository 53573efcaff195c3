//! Delta codec.
//!
//! Computes the sparse difference between two state trees and merges such a
//! difference back onto a base tree. Both operations are pure: inputs are
//! borrowed and never mutated.
//!
//! Only additions and overwrites are encoded. A key that disappears from the
//! new tree is not flagged, so a client keeps the last value it saw for it.
//!
//! Laws:
//! - `apply_delta(T, compute_delta(T, T')) == T'` when `T'` only adds or
//!   overwrites keys of `T`.
//! - `compute_delta(T, T) == None`.
//! - `apply_delta(T, {}) == T`.

use crate::tree::{StateTree, Value};

/// Computes the changes needed to turn `old` into `new`.
///
/// Returns `None` when nothing changed, so callers can tell "no delta" apart
/// from a delta that happens to be an empty mapping. A missing `old` means
/// everything in `new` is new.
pub fn compute_delta(old: Option<&StateTree>, new: Option<&StateTree>) -> Option<StateTree> {
    let new = new?;
    let delta = match old {
        Some(old) => diff_maps(old, new),
        None => new.clone(),
    };
    if delta.is_empty() {
        None
    } else {
        Some(delta)
    }
}

fn diff_maps(old: &StateTree, new: &StateTree) -> StateTree {
    let mut out = StateTree::new();
    for (key, new_value) in new {
        match (old.get(key), new_value) {
            (Some(Value::Map(old_child)), Value::Map(new_child)) => {
                let child = diff_maps(old_child, new_child);
                if !child.is_empty() {
                    out.insert(key.clone(), Value::Map(child));
                }
            }
            // Added subtree, or a scalar replaced by a subtree.
            (_, Value::Map(_)) => {
                out.insert(key.clone(), new_value.clone());
            }
            (Some(old_value), _) if old_value == new_value => {}
            _ => {
                out.insert(key.clone(), new_value.clone());
            }
        }
    }
    out
}

/// Merges `delta` onto `base`, producing a new tree.
///
/// Missing inputs are treated as empty trees.
pub fn apply_delta(base: Option<&StateTree>, delta: Option<&StateTree>) -> StateTree {
    let mut out = base.cloned().unwrap_or_default();
    if let Some(delta) = delta {
        merge_into(&mut out, delta);
    }
    out
}

fn merge_into(target: &mut StateTree, delta: &StateTree) {
    for (key, value) in delta {
        match value {
            Value::Map(child_delta) => {
                let slot = target.entry(key.clone()).or_default();
                merge_into(slot.ensure_map(), child_delta);
            }
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tree_from_json;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use serde_json::json;

    fn world() -> StateTree {
        tree_from_json(json!({
            "players": {
                "p1": { "x": 0, "y": 0, "z": 0, "username": "ann", "health": 100,
                        "appearance": { "hat": "red", "scale": 1 } }
            },
            "vehicles": {
                "v1": { "x": 5, "rpm": 800, "gears": [1, 2, 3] }
            }
        }))
    }

    #[test]
    fn identical_trees_yield_no_delta() {
        let t = world();
        assert_eq!(compute_delta(Some(&t), Some(&t.clone())), None);
    }

    #[test]
    fn scalar_change_is_sparse() {
        let old = world();
        let new = apply_delta(Some(&old), Some(&tree_from_json(json!({ "players": { "p1": { "x": 1 } } }))));

        let delta = compute_delta(Some(&old), Some(&new)).unwrap();
        assert_eq!(delta, tree_from_json(json!({ "players": { "p1": { "x": 1 } } })));
    }

    #[test]
    fn added_entity_ships_whole_subtree() {
        let old = world();
        let mut new = old.clone();
        if let Some(Value::Map(players)) = new.get_mut("players") {
            players.insert(
                "p2".into(),
                Value::Map(tree_from_json(json!({ "x": 3, "appearance": { "hat": "blue" } }))),
            );
        }
        let delta = compute_delta(Some(&old), Some(&new)).unwrap();
        assert_eq!(
            delta,
            tree_from_json(json!({ "players": { "p2": { "x": 3, "appearance": { "hat": "blue" } } } }))
        );
    }

    #[test]
    fn list_change_replaces_whole_list() {
        let old = world();
        let new = apply_delta(
            Some(&old),
            Some(&tree_from_json(json!({ "vehicles": { "v1": { "gears": [1, 2, 3, 4] } } }))),
        );
        let delta = compute_delta(Some(&old), Some(&new)).unwrap();
        assert_eq!(delta, tree_from_json(json!({ "vehicles": { "v1": { "gears": [1, 2, 3, 4] } } })));
    }

    #[test]
    fn removed_keys_are_not_encoded() {
        let old = world();
        let mut new = old.clone();
        new.remove("vehicles");
        assert_eq!(compute_delta(Some(&old), Some(&new)), None);
    }

    #[test]
    fn missing_old_returns_whole_tree() {
        let new = world();
        assert_eq!(compute_delta(None, Some(&new)), Some(new.clone()));
        assert_eq!(compute_delta(Some(&new), None), None);
        assert_eq!(compute_delta(None, None), None);
    }

    #[test]
    fn empty_delta_is_stable() {
        let t = world();
        assert_eq!(apply_delta(Some(&t), Some(&StateTree::new())), t);
        assert_eq!(apply_delta(Some(&t), None), t);
        assert_eq!(apply_delta(None, Some(&t)), t);
    }

    #[test]
    fn apply_does_not_mutate_inputs() {
        let base = world();
        let delta = tree_from_json(json!({ "players": { "p1": { "x": 9 } } }));
        let before = (base.clone(), delta.clone());
        let merged = apply_delta(Some(&base), Some(&delta));
        assert_eq!((base, delta), before);
        assert_ne!(merged, before.0);
    }

    #[test]
    fn subtree_replaces_scalar_both_ways() {
        let old = tree_from_json(json!({ "players": { "p1": { "mount": null } } }));
        let new = tree_from_json(json!({ "players": { "p1": { "mount": { "vehicle": "v1", "seat": 0 } } } }));
        let delta = compute_delta(Some(&old), Some(&new)).unwrap();
        assert_eq!(apply_delta(Some(&old), Some(&delta)), new);

        let back = compute_delta(Some(&new), Some(&old)).unwrap();
        assert_eq!(apply_delta(Some(&new), Some(&back)), old);
    }

    fn random_value(rng: &mut StdRng, depth: u32) -> Value {
        match rng.gen_range(0..if depth == 0 { 4 } else { 5 }) {
            0 => Value::Number(rng.gen_range(-50..50) as f64),
            1 => Value::Bool(rng.gen()),
            2 => Value::Text(format!("s{}", rng.gen_range(0..4))),
            3 => Value::List((0..rng.gen_range(0..3)).map(|i| Value::Number(i as f64)).collect()),
            _ => Value::Map(random_tree(rng, depth - 1)),
        }
    }

    fn random_tree(rng: &mut StdRng, depth: u32) -> StateTree {
        (0..rng.gen_range(0..5))
            .map(|_| (format!("k{}", rng.gen_range(0..6)), random_value(rng, depth)))
            .collect()
    }

    /// Mutates `tree` with additions and overwrites only.
    fn grow(rng: &mut StdRng, tree: &StateTree, depth: u32) -> StateTree {
        let mut out = tree.clone();
        for value in out.values_mut() {
            match value {
                // Swapping one mapping for another would drop keys.
                Value::Map(child) => {
                    if rng.gen_bool(0.5) {
                        *child = grow(rng, child, depth.saturating_sub(1));
                    }
                }
                _ => {
                    if rng.gen_bool(0.3) {
                        *value = random_value(rng, depth);
                    }
                }
            }
        }
        for (k, v) in random_tree(rng, depth) {
            out.entry(format!("new_{k}")).or_insert(v);
        }
        out
    }

    #[test]
    fn round_trip_law_holds_on_random_trees() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..500 {
            let base = random_tree(&mut rng, 3);
            let next = grow(&mut rng, &base, 3);
            let delta = compute_delta(Some(&base), Some(&next));
            assert_eq!(apply_delta(Some(&base), delta.as_ref()), next);
            assert_eq!(compute_delta(Some(&next), Some(&next)), None);
        }
    }
}
