//! Dispatches the delta algebra by resource kind and carries it across the
//! JSON wire boundary.
//!
//! A wire delta is always a JSON object mapping field name to either a new
//! value (`set`) or `null` (`remove`). Two fields get different treatment
//! from a plain whole-value `set`: they need element-level commutativity
//! within them rather than whole-field last-writer-wins, so each is diffed
//! one level deeper, keyed by element id:
//!
//! - `note`'s `text` field carries the tab-separated character-run delta
//!   from [`hync_delta::text`] instead of the whole new string, so a single
//!   keystroke costs a few bytes instead of the whole document.
//! - `note`'s `peers` field and `profile`'s `contacts` field are themselves
//!   keyed collections (by peer uid, by contact id); their wire value is a
//!   *nested* change-set (the same `{field: set-or-null}` shape, one level
//!   down) rather than a replacement of the whole map. Two sessions editing
//!   different peers' cursor positions (or different contacts) this way
//!   commute instead of one clobbering the other's concurrent change.
//!
//! `folio` needs no such nesting: a folio's value *is* already a flat map
//! keyed by note id, so the top-level change-set already gives element-level
//! granularity for free.

use std::collections::BTreeMap;

use hync_delta::structural::{self, FieldChange, StructuralDelta};
use hync_delta::text::{self, TextDelta};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::resource::{ContactRecord, FolioValue, NoteValue, PeerRecord, ProfileValue, ResourceValue};

/// Computes the wire delta transforming `old` into `new`. Both must be the
/// same resource kind.
///
/// # Panics
///
/// Panics if `old` and `new` are different kinds — a shadow's value and its
/// resource's master value are always built from the same kind, so this
/// indicates a bug in the caller, not a reachable runtime condition.
#[must_use]
pub fn diff(old: &ResourceValue, new: &ResourceValue) -> Value {
	match (old, new) {
		(ResourceValue::Note(o), ResourceValue::Note(n)) => diff_note(o, n),
		(ResourceValue::Folio(o), ResourceValue::Folio(n)) => encode(&structural::diff(&to_value_map(&o.0), &to_value_map(&n.0))),
		(ResourceValue::Profile(o), ResourceValue::Profile(n)) => diff_profile(o, n),
		_ => panic!("diff across mismatched resource kinds"),
	}
}

/// Applies a wire `delta` to `base`, returning the new value. Total: a
/// malformed or partially-stale delta degrades instead of failing, mirroring
/// [`hync_delta::text::patch`]'s never-fail contract. Fields or elements the
/// decoder can't make sense of are left untouched rather than rejecting the
/// whole delta.
#[must_use]
pub fn patch(base: &ResourceValue, delta: &Value) -> ResourceValue {
	match base {
		ResourceValue::Note(o) => ResourceValue::Note(patch_note(o, delta)),
		ResourceValue::Folio(o) => {
			let mut map = to_value_map(&o.0);
			structural::patch(&mut map, &decode(delta));
			ResourceValue::Folio(FolioValue(from_value_map(map)))
		}
		ResourceValue::Profile(o) => ResourceValue::Profile(patch_profile(o, delta)),
	}
}

fn diff_note(o: &NoteValue, n: &NoteValue) -> Value {
	let mut obj = Map::new();

	if o.created_at != n.created_at {
		obj.insert("created-at".to_string(), Value::from(n.created_at));
	}

	if o.text != n.text {
		obj.insert("text".to_string(), Value::String(text::diff(&o.text, &n.text).to_wire()));
	}

	let peers_delta = structural::diff(&to_value_map(&o.peers), &to_value_map(&n.peers));
	if !peers_delta.is_empty() {
		obj.insert("peers".to_string(), encode(&peers_delta));
	}

	Value::Object(obj)
}

fn patch_note(base: &NoteValue, delta: &Value) -> NoteValue {
	let mut out = base.clone();
	let Some(obj) = delta.as_object() else {
		return out;
	};

	if let Some(v) = obj.get("created-at").and_then(Value::as_i64) {
		out.created_at = v;
	}

	if let Some(Value::String(wire)) = obj.get("text") {
		if let Ok(text_delta) = TextDelta::from_wire(wire) {
			out.text = text::patch(&base.text, &text_delta).text;
		}
	}

	if let Some(peers_wire) = obj.get("peers") {
		let mut map = to_value_map(&base.peers);
		structural::patch(&mut map, &decode(peers_wire));
		out.peers = from_value_map(map);
	}

	out
}

fn diff_profile(o: &ProfileValue, n: &ProfileValue) -> Value {
	let mut obj = Map::new();

	if o.uid != n.uid {
		obj.insert("uid".to_string(), Value::String(n.uid.clone()));
	}
	if o.name != n.name {
		obj.insert("name".to_string(), Value::String(n.name.clone()));
	}
	if o.email != n.email {
		obj.insert("email".to_string(), Value::String(n.email.clone()));
	}
	if o.phone != n.phone {
		obj.insert("phone".to_string(), Value::String(n.phone.clone()));
	}

	let contacts_delta = structural::diff(&to_value_map(&o.contacts), &to_value_map(&n.contacts));
	if !contacts_delta.is_empty() {
		obj.insert("contacts".to_string(), encode(&contacts_delta));
	}

	Value::Object(obj)
}

fn patch_profile(base: &ProfileValue, delta: &Value) -> ProfileValue {
	let mut out = base.clone();
	let Some(obj) = delta.as_object() else {
		return out;
	};

	if let Some(Value::String(v)) = obj.get("uid") {
		out.uid = v.clone();
	}
	if let Some(Value::String(v)) = obj.get("name") {
		out.name = v.clone();
	}
	if let Some(Value::String(v)) = obj.get("email") {
		out.email = v.clone();
	}
	if let Some(Value::String(v)) = obj.get("phone") {
		out.phone = v.clone();
	}

	if let Some(contacts_wire) = obj.get("contacts") {
		let mut map = to_value_map(&base.contacts);
		structural::patch(&mut map, &decode(contacts_wire));
		out.contacts = from_value_map(map);
	}

	out
}

/// Converts a typed keyed collection (`peers`, `contacts`, a folio's
/// entries) into the `BTreeMap<String, Value>` the generic structural
/// algebra operates over.
fn to_value_map<V: Serialize>(map: &BTreeMap<String, V>) -> BTreeMap<String, Value> {
	map.iter()
		.map(|(k, v)| (k.clone(), serde_json::to_value(v).expect("element serializes infallibly")))
		.collect()
}

/// The inverse of [`to_value_map`], for types with infallible, total
/// decoding like `Value -> PeerRecord`. Entries that don't decode cleanly
/// (a hand-crafted malformed delta) are dropped rather than failing the
/// whole patch, matching every other degrade-don't-fail path in this
/// module.
fn from_value_map<V: DeserializeOwned>(map: BTreeMap<String, Value>) -> BTreeMap<String, V> {
	map.into_iter()
		.filter_map(|(k, v)| serde_json::from_value(v).ok().map(|v| (k, v)))
		.collect()
}

fn encode(delta: &StructuralDelta<Value>) -> Value {
	let obj: Map<String, Value> = delta
		.0
		.iter()
		.map(|(k, change)| {
			let v = match change {
				FieldChange::Set(value) => value.clone(),
				FieldChange::Remove => Value::Null,
			};
			(k.clone(), v)
		})
		.collect();
	Value::Object(obj)
}

fn decode(value: &Value) -> StructuralDelta<Value> {
	let Some(obj) = value.as_object() else {
		return StructuralDelta::empty();
	};
	let map = obj
		.iter()
		.map(|(k, v)| {
			let change = if v.is_null() {
				FieldChange::Remove
			} else {
				FieldChange::Set(v.clone())
			};
			(k.clone(), change)
		})
		.collect();
	StructuralDelta(map)
}
