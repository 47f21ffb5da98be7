//! Typed resource values for the three resource kinds.

use std::collections::BTreeMap;

use hync_proto::ResourceKind;
use serde::{Deserialize, Serialize};

/// A peer's presence within a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeerRole {
	/// The peer created the note.
	Owner,
	/// The peer currently holds a live shadow for this note.
	Active,
	/// The peer has been invited but hasn't opened the note yet.
	Invited,
}

/// One peer's entry in a note's peer list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
	/// The peer's user id.
	pub uid: String,
	/// The peer's last known cursor position, in characters.
	pub cursor: usize,
	/// Unix timestamp of the peer's last activity.
	pub last_seen: i64,
	/// Unix timestamp of the peer's last accepted edit.
	pub last_edit: i64,
	/// The peer's role on this note.
	pub role: PeerRole,
}

/// A note's text body, peer list, and creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteValue {
	/// The note's text body.
	pub text: String,
	/// Peers keyed by user id.
	#[serde(default)]
	pub peers: BTreeMap<String, PeerRecord>,
	/// Unix timestamp the note was created.
	pub created_at: i64,
}

/// Whether a folio entry is active or archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FolioStatus {
	/// The note is active in the folio.
	Active,
	/// The note has been archived.
	Archive,
}

/// One entry in a folio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolioEntry {
	/// Whether the note is active or archived.
	pub status: FolioStatus,
}

/// A user's folio: the set of notes they hold, keyed by note id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FolioValue(pub BTreeMap<String, FolioEntry>);

/// One contact in a profile's address book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
	/// The contact's display name.
	pub name: String,
	/// The contact's email, if known.
	#[serde(default)]
	pub email: String,
	/// The contact's phone number, if known.
	#[serde(default)]
	pub phone: String,
}

/// A user's profile.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProfileValue {
	/// The profile's owning user id.
	pub uid: String,
	/// Display name.
	pub name: String,
	/// Email address.
	pub email: String,
	/// Phone number.
	pub phone: String,
	/// Contacts keyed by an opaque contact id.
	#[serde(default)]
	pub contacts: BTreeMap<String, ContactRecord>,
}

/// A resource value tagged by its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceValue {
	/// A `note` value.
	Note(NoteValue),
	/// A `folio` value.
	Folio(FolioValue),
	/// A `profile` value.
	Profile(ProfileValue),
}

impl ResourceValue {
	/// The kind this value belongs to.
	#[must_use]
	pub fn kind(&self) -> ResourceKind {
		match self {
			Self::Note(_) => ResourceKind::Note,
			Self::Folio(_) => ResourceKind::Folio,
			Self::Profile(_) => ResourceKind::Profile,
		}
	}

	/// Renders this value as JSON, for seeding a client's initial shadow.
	#[must_use]
	pub fn to_json(&self) -> serde_json::Value {
		match self {
			Self::Note(v) => serde_json::to_value(v),
			Self::Folio(v) => serde_json::to_value(v),
			Self::Profile(v) => serde_json::to_value(v),
		}
		.expect("resource values serialize infallibly")
	}

	/// Decodes a value of the given `kind` from JSON.
	pub fn from_json(kind: ResourceKind, json: serde_json::Value) -> Result<Self, serde_json::Error> {
		Ok(match kind {
			ResourceKind::Note => Self::Note(serde_json::from_value(json)?),
			ResourceKind::Folio => Self::Folio(serde_json::from_value(json)?),
			ResourceKind::Profile => Self::Profile(serde_json::from_value(json)?),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn note_value_round_trips_through_json() {
		let note = NoteValue {
			text: "hello".to_string(),
			peers: BTreeMap::from([(
				"alice".to_string(),
				PeerRecord {
					uid: "alice".to_string(),
					cursor: 3,
					last_seen: 100,
					last_edit: 99,
					role: PeerRole::Owner,
				},
			)]),
			created_at: 1,
		};
		let value = ResourceValue::Note(note);

		let json = value.to_json();
		let decoded = ResourceValue::from_json(ResourceKind::Note, json).unwrap();
		assert_eq!(decoded, value);
	}

	#[test]
	fn folio_value_round_trips_through_json() {
		let value = ResourceValue::Folio(FolioValue(BTreeMap::from([(
			"n1".to_string(),
			FolioEntry {
				status: FolioStatus::Active,
			},
		)])));

		let json = value.to_json();
		let decoded = ResourceValue::from_json(ResourceKind::Folio, json).unwrap();
		assert_eq!(decoded, value);
	}

	#[test]
	fn profile_value_round_trips_through_json() {
		let value = ResourceValue::Profile(ProfileValue {
			uid: "alice".to_string(),
			name: "Alice".to_string(),
			email: "alice@example.com".to_string(),
			phone: String::new(),
			contacts: BTreeMap::new(),
		});

		let json = value.to_json();
		let decoded = ResourceValue::from_json(ResourceKind::Profile, json).unwrap();
		assert_eq!(decoded, value);
	}

	#[test]
	fn from_json_rejects_mismatched_shape() {
		let json = serde_json::json!({ "not": "a note" });
		assert!(ResourceValue::from_json(ResourceKind::Note, json).is_err());
	}
}
