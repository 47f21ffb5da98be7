//! Keyed, last-writer-wins change-sets for the structural resource kinds
//! (`note.peers`, `folio`, `profile`).
//!
//! Unlike `note.text`, these values have no natural linear order to diff
//! against — they're closer to a small record or set. A [`StructuralDelta`]
//! is a map from element key to the change that key should undergo; keys not
//! mentioned are left untouched. Changes to distinct keys commute, so the
//! server can apply a delta field-by-field without worrying about ordering
//! within the delta itself — only the arrival order of distinct deltas from
//! distinct sessions matters, and that's last-writer-wins by server arrival
//! order, not by anything encoded in the delta.
//!
//! The editor broker this crate grew out of had no analogous "small keyed
//! record" sync primitive — its document model is text-only — so this one is
//! new, but it follows the same typed-enum, `thiserror`-backed shape as
//! [`crate::text`] for consistency.

use std::collections::BTreeMap;

/// A single field's change within a [`StructuralDelta`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange<V> {
	/// Set (or upsert) the field/element to this value.
	Set(V),
	/// Remove the field/element entirely.
	Remove,
}

/// A keyed change-set: maps element key to the change it should undergo.
///
/// Ordering is irrelevant; stored as a `BTreeMap` purely so two equal
/// change-sets compare and serialize deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StructuralDelta<V>(pub BTreeMap<String, FieldChange<V>>);

impl<V> StructuralDelta<V> {
	/// A change-set with no changes: a valid ack-only message.
	#[must_use]
	pub fn empty() -> Self {
		Self(BTreeMap::new())
	}

	/// Whether this change-set changes anything at all.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

/// Computes the minimal [`StructuralDelta`] transforming `old` into `new`.
///
/// A key present in both but with a different value becomes `Set(new_value)`.
/// A key only in `old` becomes `Remove`. A key only in `new` becomes
/// `Set(new_value)`. Keys equal in both are omitted.
pub fn diff<V>(old: &BTreeMap<String, V>, new: &BTreeMap<String, V>) -> StructuralDelta<V>
where
	V: Clone + PartialEq,
{
	let mut changes = BTreeMap::new();

	for (key, old_value) in old {
		match new.get(key) {
			Some(new_value) if new_value == old_value => {}
			Some(new_value) => {
				changes.insert(key.clone(), FieldChange::Set(new_value.clone()));
			}
			None => {
				changes.insert(key.clone(), FieldChange::Remove);
			}
		}
	}

	for (key, new_value) in new {
		if !old.contains_key(key) {
			changes.insert(key.clone(), FieldChange::Set(new_value.clone()));
		}
	}

	StructuralDelta(changes)
}

/// Applies `delta` to `value` in place. Total: every change in the delta is
/// applied unconditionally, last writer (the caller) wins per key.
pub fn patch<V>(value: &mut BTreeMap<String, V>, delta: &StructuralDelta<V>)
where
	V: Clone,
{
	for (key, change) in &delta.0 {
		match change {
			FieldChange::Set(new_value) => {
				value.insert(key.clone(), new_value.clone());
			}
			FieldChange::Remove => {
				value.remove(key);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
		pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect()
	}

	#[test]
	fn diff_then_patch_round_trips() {
		let old = map(&[("a", "1"), ("b", "2")]);
		let new = map(&[("a", "1"), ("b", "3"), ("c", "4")]);

		let delta = diff(&old, &new);
		let mut applied = old.clone();
		patch(&mut applied, &delta);
		assert_eq!(applied, new);
	}

	#[test]
	fn equal_maps_yield_empty_delta() {
		let m = map(&[("a", "1")]);
		assert!(diff(&m, &m).is_empty());
	}

	#[test]
	fn removed_key_becomes_remove_change() {
		let old = map(&[("a", "1"), ("b", "2")]);
		let new = map(&[("a", "1")]);
		let delta = diff(&old, &new);
		assert_eq!(delta.0.get("b"), Some(&FieldChange::Remove));
		assert_eq!(delta.0.get("a"), None);
	}

	#[test]
	fn distinct_keys_commute() {
		let mut base = map(&[("a", "1")]);
		let d1 = StructuralDelta(BTreeMap::from([(
			"b".to_string(),
			FieldChange::Set("2".to_string()),
		)]));
		let d2 = StructuralDelta(BTreeMap::from([(
			"c".to_string(),
			FieldChange::Set("3".to_string()),
		)]));

		let mut order_ab = base.clone();
		patch(&mut order_ab, &d1);
		patch(&mut order_ab, &d2);

		patch(&mut base, &d2);
		patch(&mut base, &d1);

		assert_eq!(order_ab, base);
	}

	#[test]
	fn last_writer_wins_on_same_key() {
		let mut base = map(&[("a", "1")]);
		let first = StructuralDelta(BTreeMap::from([(
			"a".to_string(),
			FieldChange::Set("2".to_string()),
		)]));
		let second = StructuralDelta(BTreeMap::from([(
			"a".to_string(),
			FieldChange::Set("3".to_string()),
		)]));

		patch(&mut base, &first);
		patch(&mut base, &second);
		assert_eq!(base.get("a"), Some(&"3".to_string()));
	}
}
