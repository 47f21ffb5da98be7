//! Server-side pub/sub turning "resource X changed" into a list of sessions
//! to wake.
//!
//! The bus only tracks interest, not delivery — [`crate::hub::SessionHub`]
//! owns the actual sinks and pushes the resulting `res-sync` frames.
//! Keeping the two separate means the subscriber index can be read under a
//! shared lock for publication while directory mutation (join/leave) takes
//! an exclusive one, per the read/write split the concurrency model calls
//! for.

use std::collections::{HashMap, HashSet};

use hync_proto::{ResourceKey, SessionId};
use tokio::sync::RwLock;

/// The subscriber index: which sessions hold a shadow for which resource.
#[derive(Default)]
pub struct NotifyBus {
	index: RwLock<HashMap<ResourceKey, HashSet<SessionId>>>,
}

impl NotifyBus {
	/// Builds an empty index.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Records that `sid` now holds a shadow for `key`.
	pub async fn subscribe(&self, key: ResourceKey, sid: SessionId) {
		self.index.write().await.entry(key).or_default().insert(sid);
	}

	/// Drops `sid`'s interest in `key`. A no-op if it wasn't subscribed.
	pub async fn unsubscribe(&self, key: &ResourceKey, sid: &SessionId) {
		let mut index = self.index.write().await;
		if let Some(subscribers) = index.get_mut(key) {
			subscribers.remove(sid);
			if subscribers.is_empty() {
				index.remove(key);
			}
		}
	}

	/// Drops every subscription held by `sid`, across all resources.
	/// Called once, on session teardown, instead of per-resource unsubscribe
	/// calls.
	pub async fn drop_session(&self, sid: &SessionId) {
		let mut index = self.index.write().await;
		index.retain(|_, subscribers| {
			subscribers.remove(sid);
			!subscribers.is_empty()
		});
	}

	/// Returns the sessions to notify for a change to `key`, excluding the
	/// session that caused it. Takes only a shared lock: publication never
	/// blocks concurrent subscribe/unsubscribe calls on other keys, and the
	/// snapshot it returns is taken without holding the directory lock
	/// during fan-out.
	pub async fn subscribers_excluding(&self, key: &ResourceKey, source: &SessionId) -> Vec<SessionId> {
		self.index
			.read()
			.await
			.get(key)
			.into_iter()
			.flatten()
			.filter(|sid| *sid != source)
			.cloned()
			.collect()
	}
}
