//! Engine-wide error type.
//!
//! Every fallible engine operation returns `Result<T, EngineError>`. The
//! session loop maps each variant onto the propagation policy fixed by the
//! error design: some are reported inline as an `error` frame, others are
//! fatal to the connection. See [`EngineError::terminates_transport`].

use hync_proto::ErrorCode;
use thiserror::Error;

/// Errors surfaced by the synchronization engine.
#[derive(Debug, Error)]
pub enum EngineError {
	/// An inbound frame violated the protocol (bad shape, unknown kind, ...).
	#[error("malformed event: {0}")]
	MalformedEvent(String),
	/// `sid` did not name a live session.
	#[error("unknown session {0}")]
	UnknownSession(String),
	/// The backend rejected a write.
	#[error("store write conflict for {0}")]
	StoreConflict(String),
	/// A bounded wait exceeded its deadline.
	#[error("request timed out: {0}")]
	RequestTimeout(String),
	/// The token key did not resolve to any known token.
	#[error("token is invalid")]
	TokenInvalid,
	/// The token had already been consumed.
	#[error("token already consumed")]
	TokenConsumed,
	/// A value failed to (de)serialize across the engine/wire boundary.
	#[error("(de)serialization failed: {0}")]
	Codec(#[from] serde_json::Error),
}

impl EngineError {
	/// Maps this error onto the wire-facing [`ErrorCode`].
	#[must_use]
	pub fn code(&self) -> ErrorCode {
		match self {
			Self::MalformedEvent(_) => ErrorCode::MalformedEvent,
			Self::UnknownSession(_) => ErrorCode::UnknownSession,
			Self::StoreConflict(_) => ErrorCode::StoreConflict,
			Self::RequestTimeout(_) => ErrorCode::RequestTimeout,
			Self::TokenInvalid => ErrorCode::TokenInvalid,
			Self::TokenConsumed => ErrorCode::TokenConsumed,
			Self::Codec(_) => ErrorCode::MalformedEvent,
		}
	}

	/// Whether this error is fatal to the connection it occurred on, per the
	/// engine's error propagation policy. `false` means it should instead be
	/// reported inline as an `error` frame and the connection kept open.
	#[must_use]
	pub fn terminates_transport(&self) -> bool {
		matches!(
			self,
			Self::MalformedEvent(_) | Self::RequestTimeout(_) | Self::Codec(_)
		)
	}
}
