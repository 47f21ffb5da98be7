//! A single client's session: its shadows, and the handlers for the four
//! frame kinds a session exchanges with its client.
//!
//! Grounded on the editor broker's `services/sessions.rs` handle/command/actor
//! triple, generalized from one LSP connection's request routing to this
//! protocol's four frame kinds, and on `services/shared_state.rs`'s
//! `tokio::select!` run loop (command channel plus a second wakeup source —
//! there an idle-poll `interval`, here the taint [`crate::hub::TaintSet`]).
//! A session's shadow map is mutated only from inside [`Session::run`]; every
//! other task reaches it exclusively through [`SessionHandle`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use hync_proto::{Edit, Frame, ResourceKey, ResourceKind, ShadowSnapshot, SessionId, UserId};
use hync_rpc::peer::{PeerSocket, PeerSocketRx};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::time;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::hub::{SessionHub, TaintSet};
use crate::notify_bus::NotifyBus;
use crate::shadow::Shadow;
use crate::store::Store;

/// An outbound frame paired with the sink permit that bounds it. Holding the
/// permit for the lifetime of the tuple, rather than releasing it the moment
/// the frame is dequeued, means capacity frees up only once the frame has
/// actually been written to the transport — true completion-based
/// backpressure rather than queue-depth backpressure.
pub type OutboundMsg = (Frame, tokio::sync::OwnedSemaphorePermit);

/// A session's out-of-band push handle, held by whatever else in the process
/// (today: [`SessionHub::publish`]) needs to hand a session a frame it didn't
/// directly ask for.
pub type SessionPeer = PeerSocket<OutboundMsg>;

/// The receiving half a connection task drains to learn what to write out.
pub type SessionPeerRx = PeerSocketRx<OutboundMsg>;

/// Depth of a session's inbound command mailbox. Unlike the outbound sink,
/// this capacity has no externally observable contract — it only needs to be
/// deep enough that a connection's read loop never stalls handing off a frame
/// it already parsed.
pub const SESSION_MAILBOX_CAPACITY: usize = 32;

/// A command delivered to a session's single-writer task.
pub enum SessionCmd {
	/// A frame received from this session's own connection.
	Frame(Frame, oneshot::Sender<Result<Option<Frame>, EngineError>>),
	/// Tear the session down: drop all shadows, leave the notify bus, exit.
	Shutdown,
}

/// A cheap, cloneable handle to a live session.
#[derive(Clone)]
pub struct SessionHandle {
	id: SessionId,
	cmd_tx: mpsc::Sender<SessionCmd>,
	taints: Arc<TaintSet>,
}

impl SessionHandle {
	pub(crate) fn new(id: SessionId, cmd_tx: mpsc::Sender<SessionCmd>, taints: Arc<TaintSet>) -> Self {
		Self { id, cmd_tx, taints }
	}

	/// This session's id.
	#[must_use]
	pub fn id(&self) -> &SessionId {
		&self.id
	}

	/// Hands `frame` to the session's own task and awaits its direct reply,
	/// if any. The caller (the connection's read loop) writes the reply to
	/// the transport itself, under the transport's own backpressure.
	///
	/// # Errors
	///
	/// Returns [`EngineError::UnknownSession`] if the session's task has
	/// already exited.
	pub async fn handle_frame(&self, frame: Frame) -> Result<Option<Frame>, EngineError> {
		let (tx, rx) = oneshot::channel();
		self.cmd_tx
			.send(SessionCmd::Frame(frame, tx))
			.await
			.map_err(|_| EngineError::UnknownSession(self.id.to_string()))?;
		rx.await.map_err(|_| EngineError::UnknownSession(self.id.to_string()))?
	}

	/// Marks `key` dirty for this session; its task will recompute and push
	/// an outbound `res-sync` the next time it drains its taint set.
	pub async fn taint(&self, key: ResourceKey) {
		self.taints.mark(key).await;
	}

	/// Requests an orderly shutdown. A no-op if the session is already gone.
	pub async fn shutdown(&self) {
		let _ = self.cmd_tx.send(SessionCmd::Shutdown).await;
	}

	#[cfg(test)]
	pub(crate) async fn drain_taints_for_test(&self) -> Vec<ResourceKey> {
		self.taints.drain().await
	}
}

/// A session's own state, touched only from inside [`Session::run`].
pub struct Session {
	id: SessionId,
	uid: UserId,
	shadows: HashMap<ResourceKey, Shadow>,
	store: Arc<Store>,
	bus: Arc<NotifyBus>,
	hub: Weak<SessionHub>,
	peer: SessionPeer,
	outbound_permits: Arc<Semaphore>,
	outbound_timeout: Duration,
	last_activity: Instant,
	terminating: bool,
}

impl Session {
	pub(crate) fn new(
		id: SessionId,
		store: Arc<Store>,
		bus: Arc<NotifyBus>,
		hub: Weak<SessionHub>,
		peer: SessionPeer,
		outbound_permits: Arc<Semaphore>,
		outbound_timeout: Duration,
	) -> Self {
		Self {
			id,
			uid: UserId::new(""),
			shadows: HashMap::new(),
			store,
			bus,
			hub,
			peer,
			outbound_permits,
			outbound_timeout,
			last_activity: Instant::now(),
			terminating: false,
		}
	}

	/// Drives this session until its mailbox closes, it's told to shut down,
	/// or its idle lease expires without a client-originated frame. Three
	/// wakeup sources share one `select!`, mirroring the editor broker's
	/// `SharedStateService::run`: the command mailbox, the taint set's
	/// `Notify`, and a sleep recomputed each iteration from the remaining
	/// idle budget (generalized from that service's fixed `interval` poll,
	/// since a per-session lease needs a deadline rather than a steady tick).
	pub(crate) async fn run(mut self, mut cmd_rx: mpsc::Receiver<SessionCmd>, taints: Arc<TaintSet>, idle_lease: Duration) {
		loop {
			let idle_remaining = idle_lease.saturating_sub(self.last_activity.elapsed());
			tokio::select! {
				biased;

				cmd = cmd_rx.recv() => {
					match cmd {
						None | Some(SessionCmd::Shutdown) => break,
						Some(SessionCmd::Frame(frame, reply)) => {
							self.last_activity = Instant::now();
							let result = self.handle_frame(frame).await;
							let _ = reply.send(result);
						}
					}
				}

				() = taints.notified() => {
					for key in taints.drain().await {
						self.recompute_and_push(&key).await;
					}
				}

				() = time::sleep(idle_remaining) => {
					warn!(sid = %self.id, "session idle lease expired");
					break;
				}
			}

			if self.terminating {
				break;
			}
		}
		self.teardown().await;
	}

	async fn teardown(&self) {
		self.bus.drop_session(&self.id).await;
		if let Some(hub) = self.hub.upgrade() {
			hub.forget(&self.id).await;
		}
		debug!(sid = %self.id, "session terminated");
	}

	async fn handle_frame(&mut self, frame: Frame) -> Result<Option<Frame>, EngineError> {
		match frame {
			Frame::SessionCreate { token, tag } => self.handle_session_create(token, tag).await,
			Frame::ResSync { kind, id, cv, edits, .. } => self.handle_res_sync(kind, id, cv, edits).await,
			Frame::ResSubscribe { kind, id, .. } => self.handle_res_subscribe(kind, id).await,
			Frame::ResUnsubscribe { kind, id, .. } => self.handle_res_unsubscribe(kind, id).await,
			Frame::SessionCreated { .. } | Frame::Error { .. } => Err(EngineError::MalformedEvent(
				"client sent a server-originated frame kind".to_string(),
			)),
		}
	}

	async fn handle_session_create(&mut self, token: String, tag: Option<String>) -> Result<Option<Frame>, EngineError> {
		let hub = self.hub.upgrade().ok_or_else(|| EngineError::UnknownSession(self.id.to_string()))?;
		let consumed = hub.tokens().consume(&token.into(), Some(self.id.clone())).await?;

		if !consumed.uid.as_str().is_empty() {
			self.uid = consumed.uid;
		}

		let mut shadows = Vec::with_capacity(consumed.resources.len());
		for key in consumed.resources {
			if let Some(snapshot) = self.open_shadow(key).await? {
				shadows.push(snapshot);
			}
		}

		Ok(Some(Frame::SessionCreated {
			sid: self.id.clone(),
			uid: self.uid.clone(),
			shadows,
			tag,
		}))
	}

	async fn handle_res_sync(
		&mut self,
		kind: ResourceKind,
		id: hync_proto::ResourceId,
		cv: hync_proto::Cv,
		edits: Vec<Edit>,
	) -> Result<Option<Frame>, EngineError> {
		let key = ResourceKey::new(kind, id);
		let Some(shadow) = self.shadows.get_mut(&key) else {
			return Ok(Some(Frame::Error {
				sid: Some(self.id.clone()),
				reason: hync_proto::ErrorCode::UnknownSession,
				detail: format!("not subscribed to {key}"),
			}));
		};

		let outcome = shadow.apply_inbound(&edits, cv, &self.store).await?;
		let snapshot = shadow.snapshot();

		if outcome.committed {
			if let Some(hub) = self.hub.upgrade() {
				hub.publish(key.clone(), self.id.clone()).await;
			}
		}

		if let Some(detail) = outcome.conflict {
			self.push_outbound(Frame::Error {
				sid: Some(self.id.clone()),
				reason: hync_proto::ErrorCode::StoreConflict,
				detail,
			})
			.await;
		}

		Ok(Some(Frame::ResSync {
			sid: self.id.clone(),
			kind: snapshot.kind,
			id: snapshot.id,
			sv: snapshot.sv,
			cv: snapshot.cv,
			edits: Vec::new(),
		}))
	}

	async fn handle_res_subscribe(&mut self, kind: ResourceKind, id: hync_proto::ResourceId) -> Result<Option<Frame>, EngineError> {
		let key = ResourceKey::new(kind, id);
		match self.open_shadow(key.clone()).await? {
			Some(snapshot) => Ok(Some(Frame::ResSync {
				sid: self.id.clone(),
				kind: snapshot.kind,
				id: snapshot.id,
				sv: snapshot.sv,
				cv: snapshot.cv,
				edits: Vec::new(),
			})),
			None => Ok(Some(Frame::Error {
				sid: Some(self.id.clone()),
				reason: hync_proto::ErrorCode::StoreConflict,
				detail: format!("no such resource {key}"),
			})),
		}
	}

	async fn handle_res_unsubscribe(&mut self, kind: ResourceKind, id: hync_proto::ResourceId) -> Result<Option<Frame>, EngineError> {
		let key = ResourceKey::new(kind, id);
		self.shadows.remove(&key);
		self.bus.unsubscribe(&key, &self.id).await;
		Ok(None)
	}

	/// Opens a shadow for `key` if it isn't already held, seeding it from the
	/// store and registering this session's interest on the notify bus.
	/// Returns `None` if the store has no such resource.
	async fn open_shadow(&mut self, key: ResourceKey) -> Result<Option<ShadowSnapshot>, EngineError> {
		if let Some(shadow) = self.shadows.get(&key) {
			return Ok(Some(shadow.snapshot()));
		}
		let Some(value) = self.store.get(&key).await else {
			return Ok(None);
		};
		let shadow = Shadow::new(key.clone(), value);
		let snapshot = shadow.snapshot();
		self.shadows.insert(key.clone(), shadow);
		self.bus.subscribe(key, self.id.clone()).await;
		Ok(Some(snapshot))
	}

	/// Recomputes the outbound diff for `key` against the shadow held for it
	/// and pushes a `res-sync` if there's anything new to send. Called from
	/// the taint-drain arm of [`Session::run`]; a key tainted after this
	/// session already dropped its shadow for it is simply ignored.
	async fn recompute_and_push(&mut self, key: &ResourceKey) {
		let Some(shadow) = self.shadows.get_mut(key) else {
			return;
		};
		let Some(master) = self.store.get(key).await else {
			return;
		};
		let Some(edits) = shadow.outbound_send(&master) else {
			return;
		};
		let snapshot = shadow.snapshot();
		self.push_outbound(Frame::ResSync {
			sid: self.id.clone(),
			kind: snapshot.kind,
			id: snapshot.id,
			sv: snapshot.sv,
			cv: snapshot.cv,
			edits,
		})
		.await;
	}

	/// Pushes `frame` onto this session's bounded outbound sink. Waits up to
	/// `outbound_timeout` for capacity; if the sink stays full that long, the
	/// client isn't draining its connection, and the session terminates with
	/// `request-timeout` rather than let the backlog grow without bound. Sets
	/// [`Session::terminating`], which [`Session::run`] checks after every
	/// select arm — there's no point attempting another send through a sink
	/// that just proved it can't keep up.
	async fn push_outbound(&mut self, frame: Frame) {
		let wait = time::timeout(self.outbound_timeout, self.outbound_permits.clone().acquire_owned()).await;
		let permit = match wait {
			Ok(Ok(permit)) => permit,
			_ => {
				warn!(sid = %self.id, reason = ?hync_proto::ErrorCode::RequestTimeout, "outbound sink full past its timeout, terminating session");
				self.terminating = true;
				return;
			}
		};
		if self.peer.send((frame, permit)).is_err() {
			warn!(sid = %self.id, "outbound push failed: connection already gone");
			self.terminating = true;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::EngineConfig;
	use crate::hub::SessionHub;
	use crate::resource::{NoteValue, ResourceValue};
	use crate::token::{Token, TokenConsumer};
	use hync_proto::{ResourceKind, TokenKey};
	use std::collections::BTreeMap;

	fn note(text: &str) -> ResourceValue {
		ResourceValue::Note(NoteValue {
			text: text.to_string(),
			peers: BTreeMap::new(),
			created_at: 0,
		})
	}

	async fn hub_with_note(text: &str) -> (Arc<SessionHub>, ResourceKey) {
		let store = Arc::new(Store::new(16));
		let id = store.create(ResourceKind::Note, note(text)).await;
		let key = ResourceKey::new(ResourceKind::Note, id);
		let hub = Arc::new(SessionHub::new(
			store,
			Arc::new(NotifyBus::new()),
			Arc::new(TokenConsumer::new()),
			EngineConfig::default(),
		));
		(hub, key)
	}

	#[tokio::test]
	async fn res_sync_with_unknown_resource_returns_error_frame_not_err() {
		let (hub, _key) = hub_with_note("x").await;
		let (handle, _rx) = hub.spawn_session().await;

		let reply = handle
			.handle_frame(Frame::ResSync {
				sid: handle.id().clone(),
				kind: ResourceKind::Note,
				id: hync_proto::ResourceId::from("not-subscribed"),
				sv: hync_proto::Sv(0),
				cv: hync_proto::Cv(0),
				edits: vec![],
			})
			.await
			.unwrap()
			.unwrap();

		assert!(matches!(reply, Frame::Error { .. }));
	}

	#[tokio::test]
	async fn subscribe_then_unsubscribe_drops_the_shadow() {
		let (hub, key) = hub_with_note("x").await;
		let (handle, _rx) = hub.spawn_session().await;

		let reply = handle
			.handle_frame(Frame::ResSubscribe {
				sid: handle.id().clone(),
				kind: key.kind,
				id: key.id.clone(),
			})
			.await
			.unwrap();
		assert!(matches!(reply, Some(Frame::ResSync { .. })));

		let reply = handle
			.handle_frame(Frame::ResUnsubscribe {
				sid: handle.id().clone(),
				kind: key.kind,
				id: key.id.clone(),
			})
			.await
			.unwrap();
		assert!(reply.is_none());

		let reply = handle
			.handle_frame(Frame::ResSync {
				sid: handle.id().clone(),
				kind: key.kind,
				id: key.id,
				sv: hync_proto::Sv(0),
				cv: hync_proto::Cv(0),
				edits: vec![],
			})
			.await
			.unwrap()
			.unwrap();
		assert!(matches!(reply, Frame::Error { .. }));
	}

	#[tokio::test]
	async fn session_create_with_unknown_token_is_an_error() {
		let (hub, _key) = hub_with_note("x").await;
		let (handle, _rx) = hub.spawn_session().await;

		let err = handle
			.handle_frame(Frame::SessionCreate {
				token: "nope".into(),
				tag: None,
			})
			.await
			.unwrap_err();
		assert!(matches!(err, EngineError::TokenInvalid));
	}

	#[tokio::test]
	async fn outbound_sink_full_past_timeout_terminates_the_session() {
		let (peer, _rx) = SessionPeer::channel();
		let mut session = Session::new(
			SessionId::new("s1"),
			Arc::new(Store::new(16)),
			Arc::new(NotifyBus::new()),
			Weak::new(),
			peer,
			Arc::new(Semaphore::new(0)),
			Duration::from_millis(5),
		);
		session
			.push_outbound(Frame::Error {
				sid: None,
				reason: hync_proto::ErrorCode::RequestTimeout,
				detail: "test".into(),
			})
			.await;
		assert!(session.terminating);
	}

	#[tokio::test]
	async fn session_create_upgrade_adds_resources_to_a_live_session() {
		let (hub, key) = hub_with_note("x").await;
		hub.tokens()
			.issue(TokenKey::from("t1"), Token::new(UserId::from("a"), vec![key.clone()]))
			.await;
		let (handle, _rx) = hub.spawn_session().await;

		let reply = handle
			.handle_frame(Frame::SessionCreate {
				token: "t1".into(),
				tag: Some("corr".into()),
			})
			.await
			.unwrap()
			.unwrap();

		match reply {
			Frame::SessionCreated { shadows, tag, .. } => {
				assert_eq!(shadows.len(), 1);
				assert_eq!(tag.as_deref(), Some("corr"));
			}
			other => panic!("unexpected reply: {other:?}"),
		}
	}
}
