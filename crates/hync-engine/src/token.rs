//! Token-gated session creation and upgrade.
//!
//! A token is a one-time bearer credential minted out-of-band (e.g. by an
//! invite flow) that names a user and the resources a session created from
//! it should subscribe to. Consuming it is atomic: either the token is
//! marked consumed and a session results, or neither happens.

use std::collections::HashMap;

use hync_proto::{ResourceKey, SessionId, TokenKey, UserId};
use tokio::sync::Mutex;

use crate::error::EngineError;

/// A token record, tombstoned rather than deleted once consumed.
///
/// Retaining consumed tokens (instead of dropping them from the map) lets a
/// support path answer "who used this token and when" without a separate
/// audit log — the record itself is the audit trail.
#[derive(Debug, Clone)]
pub struct Token {
	uid: UserId,
	resources: Vec<ResourceKey>,
	expires_at: Option<i64>,
	uses: u32,
	consumed_at: Option<i64>,
	consumed_by: Option<SessionId>,
}

impl Token {
	/// Mints an unconsumed token binding `uid` to `resources`, with no expiry.
	#[must_use]
	pub fn new(uid: UserId, resources: Vec<ResourceKey>) -> Self {
		Self {
			uid,
			resources,
			expires_at: None,
			uses: 0,
			consumed_at: None,
			consumed_by: None,
		}
	}

	/// Mints an unconsumed token that expires at the given unix timestamp.
	#[must_use]
	pub fn with_expiry(uid: UserId, resources: Vec<ResourceKey>, expires_at: i64) -> Self {
		Self {
			expires_at: Some(expires_at),
			..Self::new(uid, resources)
		}
	}

	/// Whether this token has already been consumed.
	#[must_use]
	pub fn is_consumed(&self) -> bool {
		self.consumed_at.is_some()
	}

	/// Whether `now` is at or past this token's expiry, if it has one.
	#[must_use]
	pub fn is_expired(&self, now: i64) -> bool {
		self.expires_at.is_some_and(|exp| now >= exp)
	}

	/// How many times this token has been successfully consumed. Bounded to
	/// 1 by the at-most-once invariant `consume` enforces; kept as a counter
	/// rather than a bool so the tombstoned record mirrors the wire shape's
	/// `usage-count` field.
	#[must_use]
	pub fn uses(&self) -> u32 {
		self.uses
	}
}

/// The outcome of successfully consuming a token.
#[derive(Debug, Clone)]
pub struct ConsumedToken {
	/// The user id the token was bound to.
	pub uid: UserId,
	/// Resources the resulting session should subscribe to.
	pub resources: Vec<ResourceKey>,
	/// Whether this consumption upgraded an already-attached session rather
	/// than seeding a brand new one.
	pub upgraded: bool,
}

/// Issues and consumes tokens.
///
/// A plain mutex-guarded map, not an actor: unlike the session hub, nothing
/// here needs ordered fan-out across other services, so the extra
/// message-passing machinery would add ceremony without buying anything —
/// the same judgment call `Store` makes for its backend map.
pub struct TokenConsumer {
	tokens: Mutex<HashMap<TokenKey, Token>>,
}

impl Default for TokenConsumer {
	fn default() -> Self {
		Self::new()
	}
}

impl TokenConsumer {
	/// Builds an empty token registry.
	#[must_use]
	pub fn new() -> Self {
		Self {
			tokens: Mutex::new(HashMap::new()),
		}
	}

	/// Registers a freshly minted, unconsumed token.
	pub async fn issue(&self, key: TokenKey, token: Token) {
		self.tokens.lock().await.insert(key, token);
	}

	/// Consumes `key`, binding it either to a new session or, if
	/// `existing_session` is given, upgrading that session's subscriptions
	/// and user id.
	///
	/// # Errors
	///
	/// Returns [`EngineError::TokenInvalid`] if `key` names no known token,
	/// or [`EngineError::TokenConsumed`] if it has already been consumed.
	pub async fn consume(
		&self,
		key: &TokenKey,
		existing_session: Option<SessionId>,
	) -> Result<ConsumedToken, EngineError> {
		let mut tokens = self.tokens.lock().await;
		let token = tokens.get_mut(key).ok_or(EngineError::TokenInvalid)?;

		if token.is_consumed() {
			return Err(EngineError::TokenConsumed);
		}
		let now = now_unix();
		if token.is_expired(now) {
			return Err(EngineError::TokenInvalid);
		}

		token.consumed_at = Some(now);
		token.consumed_by = existing_session.clone();
		token.uses += 1;

		Ok(ConsumedToken {
			uid: token.uid.clone(),
			resources: token.resources.clone(),
			upgraded: existing_session.is_some(),
		})
	}
}

fn now_unix() -> i64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs() as i64)
		.unwrap_or(0)
}
