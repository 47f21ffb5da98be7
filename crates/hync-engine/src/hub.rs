//! The session hub: the directory of every live session on this process.
//!
//! Grounded on the editor broker's `runtime.rs` (tiered startup wiring a
//! `SessionService` other services hold a handle to) and `services/sessions.rs`
//! (the handle/command/actor triple a live connection is represented by). The
//! directory itself only ever holds cheap, cloneable [`SessionHandle`]s, never
//! a session's actual state — a session's shadows are touched only from its
//! own task, per the concurrency discipline the whole engine follows.

use std::collections::HashMap;
use std::sync::Arc;

use hync_proto::{ResourceKey, SessionId};
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::notify_bus::NotifyBus;
use crate::session::{Session, SessionHandle, SessionPeer, SessionPeerRx, SESSION_MAILBOX_CAPACITY};
use crate::store::Store;
use crate::token::TokenConsumer;

/// Directory of every session currently attached to this process.
pub struct SessionHub {
	directory: RwLock<HashMap<SessionId, SessionHandle>>,
	store: Arc<Store>,
	bus: Arc<NotifyBus>,
	tokens: Arc<TokenConsumer>,
	config: EngineConfig,
}

impl SessionHub {
	/// Builds a hub wired to the given store, notification bus, token
	/// consumer, and configuration.
	#[must_use]
	pub fn new(store: Arc<Store>, bus: Arc<NotifyBus>, tokens: Arc<TokenConsumer>, config: EngineConfig) -> Self {
		Self {
			directory: RwLock::new(HashMap::new()),
			store,
			bus,
			tokens,
			config,
		}
	}

	/// The token consumer backing `session-create` redemption.
	#[must_use]
	pub fn tokens(&self) -> &Arc<TokenConsumer> {
		&self.tokens
	}

	/// The resource store every session's shadows read and write through.
	#[must_use]
	pub fn store(&self) -> &Arc<Store> {
		&self.store
	}

	/// The resolved engine configuration.
	#[must_use]
	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	/// Spawns a fresh, anonymous session shell with a freshly minted id and
	/// registers it in the directory. The caller then drives it with an
	/// initial `session-create` frame the same way it drives every later
	/// frame, via [`SessionHandle::handle_frame`] — there is no separate
	/// "first frame" code path in the hub. The returned [`SessionPeerRx`] is
	/// the connection task's half of this session's bounded outbound sink;
	/// it must be drained and written to the transport for taint-triggered
	/// pushes to ever reach the client.
	pub async fn spawn_session(self: &Arc<Self>) -> (SessionHandle, SessionPeerRx) {
		let id = SessionId::new(uuid::Uuid::new_v4().to_string());
		let (cmd_tx, cmd_rx) = mpsc::channel(SESSION_MAILBOX_CAPACITY);
		let taints = Arc::new(TaintSet::new());
		let (peer, peer_rx) = SessionPeer::channel();
		let permits = Arc::new(Semaphore::new(self.config.outbound_sink_capacity.max(1)));
		let session = Session::new(
			id.clone(),
			self.store.clone(),
			self.bus.clone(),
			Arc::downgrade(self),
			peer,
			permits,
			self.config.outbound_enqueue_timeout,
		);

		let handle = SessionHandle::new(id.clone(), cmd_tx, taints.clone());
		self.directory.write().await.insert(id.clone(), handle.clone());

		tokio::spawn(session.run(cmd_rx, taints, self.config.idle_lease));
		debug!(sid = %id, "session spawned");
		(handle, peer_rx)
	}

	/// Looks up a live session's handle by id.
	pub async fn lookup(&self, sid: &SessionId) -> Option<SessionHandle> {
		self.directory.read().await.get(sid).cloned()
	}

	/// Removes `sid` from the directory and drops its notify-bus subscriptions.
	/// Called once by a session's own task as its last act before exiting.
	pub async fn forget(&self, sid: &SessionId) {
		self.directory.write().await.remove(sid);
		self.bus.drop_session(sid).await;
		debug!(sid = %sid, "session forgotten");
	}

	/// Wakes every other session subscribed to `key` so each recomputes and
	/// pushes its own outbound `res-sync`. Reads the subscriber list under the
	/// notify bus's shared lock, then the directory under its own shared lock,
	/// holding neither while actually notifying — a slow or wedged session
	/// never blocks this fan-out for the others.
	pub async fn publish(&self, key: ResourceKey, source: SessionId) {
		let subscribers = self.bus.subscribers_excluding(&key, &source).await;
		if subscribers.is_empty() {
			return;
		}
		let directory = self.directory.read().await;
		for sid in subscribers {
			if let Some(handle) = directory.get(&sid) {
				trace!(sid = %sid, key = %key, "tainting subscriber");
				handle.taint(key.clone()).await;
			}
		}
	}
}

/// Coalescing queue of resource keys a session still needs to recompute and
/// push an outbound `res-sync` for.
///
/// Multiple taints for the same key arriving before the session's task gets
/// around to draining them collapse into one: the set dedupes by key, and
/// [`tokio::sync::Notify`] only needs to fire once to have the session drain
/// everything pending. This replaces the editor broker's fixed-interval idle
/// tick (`services/shared_state.rs`'s `IDLE_POLL_INTERVAL`) with an
/// event-driven wakeup, since taints here are sparse and bursty rather than a
/// steady poll.
#[derive(Default)]
pub struct TaintSet {
	pending: tokio::sync::Mutex<std::collections::HashSet<ResourceKey>>,
	notify: tokio::sync::Notify,
}

impl TaintSet {
	/// Builds an empty taint set.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Marks `key` dirty and wakes the draining task.
	pub async fn mark(&self, key: ResourceKey) {
		self.pending.lock().await.insert(key);
		self.notify.notify_one();
	}

	/// Drains every currently-pending key.
	pub async fn drain(&self) -> Vec<ResourceKey> {
		self.pending.lock().await.drain().collect()
	}

	/// Resolves once [`TaintSet::mark`] has been called at least once since
	/// the last resolution.
	pub async fn notified(&self) {
		self.notify.notified().await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::EngineConfig;
	use crate::resource::{NoteValue, ResourceValue};
	use crate::store::Store;
	use crate::token::Token;
	use hync_proto::{Edit, Frame, ResourceKind, TokenKey, UserId};
	use std::collections::BTreeMap;

	fn hub() -> Arc<SessionHub> {
		let store = Arc::new(Store::new(16));
		Arc::new(SessionHub::new(
			store,
			Arc::new(NotifyBus::new()),
			Arc::new(TokenConsumer::new()),
			EngineConfig::default(),
		))
	}

	#[tokio::test]
	async fn spawned_session_registers_and_can_be_looked_up() {
		let hub = hub();
		let (handle, _rx) = hub.spawn_session().await;
		assert!(hub.lookup(handle.id()).await.is_some());
	}

	#[tokio::test]
	async fn shutdown_removes_session_from_directory() {
		let hub = hub();
		let (handle, _rx) = hub.spawn_session().await;
		let sid = handle.id().clone();
		handle.shutdown().await;

		// give the actor task a chance to run its teardown
		for _ in 0..50 {
			if hub.lookup(&sid).await.is_none() {
				break;
			}
			tokio::task::yield_now().await;
		}
		assert!(hub.lookup(&sid).await.is_none());
	}

	#[tokio::test]
	async fn session_create_redeems_token_and_returns_shadows() {
		let hub = hub();
		let id = hub
			.store
			.create(
				ResourceKind::Note,
				ResourceValue::Note(NoteValue {
					text: "hi".into(),
					peers: BTreeMap::new(),
					created_at: 0,
				}),
			)
			.await;
		let key = ResourceKey::new(ResourceKind::Note, id);
		hub.tokens
			.issue(
				TokenKey::from("tok-1"),
				Token::new(UserId::from("alice"), vec![key]),
			)
			.await;

		let (handle, _rx) = hub.spawn_session().await;
		let reply = handle
			.handle_frame(Frame::SessionCreate {
				token: "tok-1".into(),
				tag: None,
			})
			.await
			.unwrap()
			.unwrap();

		match reply {
			Frame::SessionCreated { uid, shadows, .. } => {
				assert_eq!(uid, UserId::from("alice"));
				assert_eq!(shadows.len(), 1);
			}
			other => panic!("unexpected reply: {other:?}"),
		}
	}

	#[tokio::test]
	async fn committed_res_sync_wakes_other_subscribers() {
		let hub = hub();
		let id = hub
			.store
			.create(
				ResourceKind::Note,
				ResourceValue::Note(NoteValue {
					text: "hello".into(),
					peers: BTreeMap::new(),
					created_at: 0,
				}),
			)
			.await;
		let key = ResourceKey::new(ResourceKind::Note, id.clone());

		hub.tokens
			.issue(TokenKey::from("t-a"), Token::new(UserId::from("a"), vec![key.clone()]))
			.await;
		hub.tokens
			.issue(TokenKey::from("t-b"), Token::new(UserId::from("b"), vec![key.clone()]))
			.await;

		let (a, _a_rx) = hub.spawn_session().await;
		a.handle_frame(Frame::SessionCreate {
			token: "t-a".into(),
			tag: None,
		})
		.await
		.unwrap();
		let (b, _b_rx) = hub.spawn_session().await;
		b.handle_frame(Frame::SessionCreate {
			token: "t-b".into(),
			tag: None,
		})
		.await
		.unwrap();

		let old = ResourceValue::Note(NoteValue {
			text: "hello".into(),
			peers: BTreeMap::new(),
			created_at: 0,
		});
		let new = ResourceValue::Note(NoteValue {
			text: "hello world".into(),
			peers: BTreeMap::new(),
			created_at: 0,
		});
		let wire = crate::delta::diff(&old, &new);

		let reply = a
			.handle_frame(Frame::ResSync {
				sid: a.id().clone(),
				kind: ResourceKind::Note,
				id: id.clone(),
				sv: hync_proto::Sv(0),
				cv: hync_proto::Cv(0),
				edits: vec![Edit {
					cv: hync_proto::Cv(0),
					delta: wire,
				}],
			})
			.await
			.unwrap();
		assert!(reply.is_some());

		// b's taint set should now carry the key; draining it directly avoids
		// depending on scheduling order for the outbound push itself.
		let drained = b.drain_taints_for_test().await;
		assert!(drained.contains(&ResourceKey::new(ResourceKind::Note, id)));
	}
}
