//! Wire types for the hync sync protocol.
//!
//! Identifiers (`SessionId`, `ResourceId`, `TokenKey`) wrap `Arc<str>` rather
//! than `String`: the session hub and notification bus clone these keys on
//! every fan-out, and the editor broker's own `SessionId`/`DocId` newtypes
//! were cheap `Copy` integers for the same reason — opaque string ids here
//! play the same "cheap to pass around" role `Arc<str>` gives for free.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
	($name:ident, $doc:literal) => {
		#[doc = $doc]
		#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
		pub struct $name(pub Arc<str>);

		impl $name {
			/// Builds an id from any string-like value.
			pub fn new(value: impl Into<Arc<str>>) -> Self {
				Self(value.into())
			}

			/// Borrows the id as a plain string slice.
			#[must_use]
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl From<&str> for $name {
			fn from(value: &str) -> Self {
				Self(Arc::from(value))
			}
		}

		impl From<String> for $name {
			fn from(value: String) -> Self {
				Self(Arc::from(value))
			}
		}

		impl Serialize for $name {
			fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
				serializer.serialize_str(&self.0)
			}
		}

		impl<'de> Deserialize<'de> for $name {
			fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
				let s = String::deserialize(deserializer)?;
				Ok(Self(Arc::from(s)))
			}
		}
	};
}

string_id!(SessionId, "Unique identifier for a live connected session.");
string_id!(ResourceId, "Opaque identifier for a resource value within its kind.");
string_id!(TokenKey, "Bearer key presented by a client on `session-create`.");
string_id!(UserId, "Identifier of the user a session or token is bound to.");

/// The kind of resource a shadow, subscription, or delta applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
	/// A note's text body, peer list, and creation time.
	Note,
	/// A user's set of note references and their status.
	Folio,
	/// A user's profile fields and contacts.
	Profile,
}

impl fmt::Display for ResourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::Note => "note",
			Self::Folio => "folio",
			Self::Profile => "profile",
		};
		f.write_str(s)
	}
}

/// Addresses a single resource value: its kind plus its id within that kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
	/// Which resource kind this id belongs to.
	pub kind: ResourceKind,
	/// The resource's id within its kind.
	pub id: ResourceId,
}

impl ResourceKey {
	/// Builds a resource key from its parts.
	#[must_use]
	pub fn new(kind: ResourceKind, id: ResourceId) -> Self {
		Self { kind, id }
	}
}

impl fmt::Display for ResourceKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.kind, self.id)
	}
}

/// Server-version counter: bumps each time the server accepts inbound
/// changes into a shadow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sv(pub u64);

impl Sv {
	/// Returns the next version.
	#[must_use]
	pub fn next(self) -> Self {
		Self(self.0 + 1)
	}
}

/// Client-version counter: bumps each time the server sends outbound changes
/// for a shadow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cv(pub u64);

impl Cv {
	/// Returns the next version.
	#[must_use]
	pub fn next(self) -> Self {
		Self(self.0 + 1)
	}
}

/// One outbound or inbound edit attached to a client version.
///
/// `delta` is the kind-specific wire encoding: the tab-separated text-op
/// string for `note.text`-bearing edits (see `hync_delta::text`), or a JSON
/// object of field changes for structural kinds (see `hync_delta::structural`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
	/// The client version this edit is attached to.
	pub cv: Cv,
	/// The kind-specific delta payload.
	pub delta: serde_json::Value,
}

/// A resource value plus the shadow versions it was snapshotted at, as sent
/// to a client right after `session-create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowSnapshot {
	/// Which resource this snapshot is for.
	pub kind: ResourceKind,
	/// The resource's id.
	pub id: ResourceId,
	/// The resource's current value, kind-specific JSON shape.
	pub value: serde_json::Value,
	/// Server-version at the time of the snapshot.
	pub sv: Sv,
	/// Client-version at the time of the snapshot.
	pub cv: Cv,
}

/// A single logical message exchanged between client and session.
///
/// Serializes as `{"name", "sid", "tag", "data"}`, matching the wire adapter's
/// compact-object shape: `sid` and `tag` sit beside `name` rather than nested
/// inside `data`, so a demuxed batch can be routed to the right session
/// without decoding each message's payload. `sid` is omitted for the one
/// frame that doesn't have one yet (the client's own `session-create`
/// request); `tag` is omitted whenever the sender didn't set one. See the
/// hand-written [`Serialize`]/[`Deserialize`] impls below — serde's derive
/// can't express "some fields flatten into a sibling object" on its own.
#[derive(Debug, Clone)]
pub enum Frame {
	/// Client → server: redeem a bearer token for a session.
	SessionCreate {
		/// The bearer token presented by the client.
		token: String,
		/// Opaque correlation tag echoed back on the response.
		tag: Option<String>,
	},
	/// Server → client: the session created (or upgraded) by `session-create`.
	SessionCreated {
		/// The new or upgraded session id.
		sid: SessionId,
		/// The user id the session is bound to; empty for anonymous sessions.
		uid: UserId,
		/// Initial shadow snapshots for every resource the token granted.
		shadows: Vec<ShadowSnapshot>,
		/// Correlation tag echoed from the originating `session-create`.
		tag: Option<String>,
	},
	/// Either direction: advance the shadow for one resource.
	ResSync {
		/// The session this sync applies to.
		sid: SessionId,
		/// Which resource.
		kind: ResourceKind,
		/// The resource's id.
		id: ResourceId,
		/// Server-version at the sender's side.
		sv: Sv,
		/// Client-version at the sender's side.
		cv: Cv,
		/// Edits carried in this message; may be empty (an ack-only message).
		edits: Vec<Edit>,
	},
	/// Client → server: start holding a shadow for a resource.
	ResSubscribe {
		/// The subscribing session.
		sid: SessionId,
		/// Which resource.
		kind: ResourceKind,
		/// The resource's id.
		id: ResourceId,
	},
	/// Client → server: stop holding a shadow for a resource.
	ResUnsubscribe {
		/// The unsubscribing session.
		sid: SessionId,
		/// Which resource.
		kind: ResourceKind,
		/// The resource's id.
		id: ResourceId,
	},
	/// Server → client: a recoverable protocol or backend error.
	Error {
		/// The session the error concerns, if known.
		sid: Option<SessionId>,
		/// Machine-readable error kind.
		reason: ErrorCode,
		/// Human-readable detail for logs and debugging UIs.
		detail: String,
	},
}

impl Serialize for Frame {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		use serde::ser::SerializeMap;

		let (name, sid, tag, data): (&str, Option<&SessionId>, Option<&String>, serde_json::Value) = match self {
			Self::SessionCreate { token, tag } => ("session-create", None, tag.as_ref(), serde_json::json!({ "token": token })),
			Self::SessionCreated { sid, uid, shadows, tag } => (
				"session-create",
				Some(sid),
				tag.as_ref(),
				serde_json::json!({ "uid": uid, "sid": sid, "shadows": shadows }),
			),
			Self::ResSync { sid, kind, id, sv, cv, edits } => (
				"res-sync",
				Some(sid),
				None,
				serde_json::json!({ "kind": kind, "id": id, "sv": sv, "cv": cv, "edits": edits }),
			),
			Self::ResSubscribe { sid, kind, id } => ("res-subscribe", Some(sid), None, serde_json::json!({ "kind": kind, "id": id })),
			Self::ResUnsubscribe { sid, kind, id } => ("res-unsubscribe", Some(sid), None, serde_json::json!({ "kind": kind, "id": id })),
			Self::Error { sid, reason, detail } => ("error", sid.as_ref(), None, serde_json::json!({ "reason": reason, "detail": detail })),
		};

		let len = 2 + usize::from(sid.is_some()) + usize::from(tag.is_some());
		let mut map = serializer.serialize_map(Some(len))?;
		map.serialize_entry("name", name)?;
		if let Some(sid) = sid {
			map.serialize_entry("sid", sid)?;
		}
		if let Some(tag) = tag {
			map.serialize_entry("tag", tag)?;
		}
		map.serialize_entry("data", &data)?;
		map.end()
	}
}

impl<'de> Deserialize<'de> for Frame {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		use serde::de::Error as _;

		#[derive(Deserialize)]
		struct Envelope {
			name: String,
			#[serde(default)]
			sid: Option<SessionId>,
			#[serde(default)]
			tag: Option<String>,
			#[serde(default)]
			data: serde_json::Value,
		}

		#[derive(Deserialize)]
		struct SessionCreateData {
			token: String,
		}
		#[derive(Deserialize)]
		struct SessionCreatedData {
			uid: UserId,
			shadows: Vec<ShadowSnapshot>,
		}
		#[derive(Deserialize)]
		struct ResSyncData {
			kind: ResourceKind,
			id: ResourceId,
			sv: Sv,
			cv: Cv,
			#[serde(default)]
			edits: Vec<Edit>,
		}
		#[derive(Deserialize)]
		struct ResKeyData {
			kind: ResourceKind,
			id: ResourceId,
		}
		#[derive(Deserialize)]
		struct ErrorData {
			reason: ErrorCode,
			detail: String,
		}

		let Envelope { name, sid, tag, data } = Envelope::deserialize(deserializer)?;

		match name.as_str() {
			"session-create" => match sid {
				Some(sid) => {
					let d: SessionCreatedData = serde_json::from_value(data).map_err(D::Error::custom)?;
					Ok(Self::SessionCreated { sid, uid: d.uid, shadows: d.shadows, tag })
				}
				None => {
					let d: SessionCreateData = serde_json::from_value(data).map_err(D::Error::custom)?;
					Ok(Self::SessionCreate { token: d.token, tag })
				}
			},
			"res-sync" => {
				let sid = sid.ok_or_else(|| D::Error::custom("res-sync frame is missing sid"))?;
				let d: ResSyncData = serde_json::from_value(data).map_err(D::Error::custom)?;
				Ok(Self::ResSync {
					sid,
					kind: d.kind,
					id: d.id,
					sv: d.sv,
					cv: d.cv,
					edits: d.edits,
				})
			}
			"res-subscribe" => {
				let sid = sid.ok_or_else(|| D::Error::custom("res-subscribe frame is missing sid"))?;
				let d: ResKeyData = serde_json::from_value(data).map_err(D::Error::custom)?;
				Ok(Self::ResSubscribe { sid, kind: d.kind, id: d.id })
			}
			"res-unsubscribe" => {
				let sid = sid.ok_or_else(|| D::Error::custom("res-unsubscribe frame is missing sid"))?;
				let d: ResKeyData = serde_json::from_value(data).map_err(D::Error::custom)?;
				Ok(Self::ResUnsubscribe { sid, kind: d.kind, id: d.id })
			}
			"error" => {
				let d: ErrorData = serde_json::from_value(data).map_err(D::Error::custom)?;
				Ok(Self::Error { sid, reason: d.reason, detail: d.detail })
			}
			other => Err(D::Error::custom(format!("unknown frame name {other}"))),
		}
	}
}

/// Machine-readable error kinds, per the engine's error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
	/// The frame could not be parsed or violated the protocol; fatal to the transport.
	#[error("malformed event")]
	MalformedEvent,
	/// `sid` did not name a live session.
	#[error("unknown session")]
	UnknownSession,
	/// The backend rejected a write; the inbound edit was dropped.
	#[error("store write conflict")]
	StoreConflict,
	/// A bounded wait (outbound sink, store commit) exceeded its deadline; fatal to the transport.
	#[error("request timed out")]
	RequestTimeout,
	/// The token key did not resolve to any known token.
	#[error("token is invalid")]
	TokenInvalid,
	/// The token had already been consumed.
	#[error("token already consumed")]
	TokenConsumed,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn frame_session_create_round_trips() {
		let frame = Frame::SessionCreate {
			token: "userlogin".into(),
			tag: Some("t1".into()),
		};
		let json = serde_json::to_string(&frame).expect("serialize");
		assert_eq!(json, r#"{"name":"session-create","tag":"t1","data":{"token":"userlogin"}}"#);
		let back: Frame = serde_json::from_str(&json).expect("deserialize");
		match back {
			Frame::SessionCreate { token, tag } => {
				assert_eq!(token, "userlogin");
				assert_eq!(tag.as_deref(), Some("t1"));
			}
			other => panic!("unexpected variant: {other:?}"),
		}
	}

	#[test]
	fn frame_session_created_puts_sid_beside_name_not_inside_data() {
		let frame = Frame::SessionCreated {
			sid: SessionId::from("sess-1"),
			uid: UserId::from("alice"),
			shadows: vec![],
			tag: None,
		};
		// `data`'s keys sort alphabetically: plain `serde_json::Value` (no
		// `preserve_order` feature) is a `BTreeMap` under the hood.
		let json = serde_json::to_string(&frame).expect("serialize");
		assert_eq!(json, r#"{"name":"session-create","sid":"sess-1","data":{"shadows":[],"sid":"sess-1","uid":"alice"}}"#);
		let back: Frame = serde_json::from_str(&json).expect("deserialize");
		match back {
			Frame::SessionCreated { sid, uid, shadows, tag } => {
				assert_eq!(sid, SessionId::from("sess-1"));
				assert_eq!(uid, UserId::from("alice"));
				assert!(shadows.is_empty());
				assert!(tag.is_none());
			}
			other => panic!("unexpected variant: {other:?}"),
		}
	}

	#[test]
	fn frame_res_sync_without_sid_fails_to_deserialize() {
		let json = r#"{"name":"res-sync","data":{"kind":"note","id":"n1","sv":0,"cv":0,"edits":[]}}"#;
		assert!(serde_json::from_str::<Frame>(json).is_err());
	}

	#[test]
	fn frame_error_omits_sid_when_absent() {
		let frame = Frame::Error {
			sid: None,
			reason: ErrorCode::UnknownSession,
			detail: "no such session".into(),
		};
		let json = serde_json::to_string(&frame).expect("serialize");
		assert_eq!(json, r#"{"name":"error","data":{"detail":"no such session","reason":"unknown-session"}}"#);
	}

	#[test]
	fn resource_key_displays_as_kind_slash_id() {
		let key = ResourceKey::new(ResourceKind::Note, ResourceId::from("aaaaa"));
		assert_eq!(key.to_string(), "note/aaaaa");
	}

	#[test]
	fn session_id_round_trips_through_json() {
		let id = SessionId::from("abc-123");
		let json = serde_json::to_string(&id).expect("serialize");
		assert_eq!(json, "\"abc-123\"");
		let back: SessionId = serde_json::from_str(&json).expect("deserialize");
		assert_eq!(back, id);
	}

	#[test]
	fn error_code_serializes_kebab_case() {
		let json = serde_json::to_string(&ErrorCode::UnknownSession).expect("serialize");
		assert_eq!(json, "\"unknown-session\"");
	}
}
