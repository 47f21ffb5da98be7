//! A cloneable handle for pushing events onto a connection's single-writer
//! outbound queue, from anywhere else in the process.
//!
//! Grounded on the editor broker's `xeno_rpc::PeerSocket`/`MainLoopEvent`
//! pair: the session hub and store hold a `PeerSocket` per live session so
//! they can hand a session its own outbound frames without ever touching the
//! session's internal state directly.

use tokio::sync::mpsc;

/// An event destined for a connection's main loop.
#[derive(Debug)]
pub enum MainLoopEvent<M> {
	/// A message to write out to the peer.
	Outgoing(M),
}

/// A cheap, cloneable sink that forwards [`MainLoopEvent`]s into the channel
/// a connection's task is reading from.
#[derive(Debug)]
pub struct PeerSocket<M> {
	tx: mpsc::UnboundedSender<MainLoopEvent<M>>,
}

impl<M> Clone for PeerSocket<M> {
	fn clone(&self) -> Self {
		Self {
			tx: self.tx.clone(),
		}
	}
}

/// The receiving half of a peer socket lives in the connection's own task.
pub type PeerSocketRx<M> = mpsc::UnboundedReceiver<MainLoopEvent<M>>;

impl<M> PeerSocket<M> {
	/// Builds a fresh socket/receiver pair for a new connection.
	#[must_use]
	pub fn channel() -> (Self, PeerSocketRx<M>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self::from_sender(tx), rx)
	}

	/// Wraps an existing sender, e.g. one built for a test harness.
	#[must_use]
	pub fn from_sender(tx: mpsc::UnboundedSender<MainLoopEvent<M>>) -> Self {
		Self { tx }
	}

	/// Enqueues `msg` for delivery to the peer. Fails only if the connection's
	/// task has already shut down.
	pub fn send(&self, msg: M) -> Result<(), MainLoopEvent<M>> {
		self.tx
			.send(MainLoopEvent::Outgoing(msg))
			.map_err(|e| e.0)
	}

	/// Whether the peer's receiving task is still alive.
	#[must_use]
	pub fn is_connected(&self) -> bool {
		!self.tx.is_closed()
	}
}
