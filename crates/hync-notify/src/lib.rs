//! Client for the secondary notification transport: a JSON-RPC-over-TCP
//! side channel the engine's sync path never touches directly.
//!
//! Grounded on `hync_rpc::codec::JsonLineCodec`, the same newline-delimited
//! JSON framing the primary wire adapter's text format is built on, but driven
//! here as a plain request/response client rather than through
//! `hync_rpc::pump::drive` — that pump is a `tower_service::Service` answering
//! inbound-initiated calls, and this crate only ever originates calls and
//! awaits one reply each, so a bare `Framed` round trip is the whole of it.
//! Every call carries its own [`NotifyClient::timeout`]; a slow or unreachable
//! notification service delays only the caller, never a session task.

#![warn(missing_docs)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use hync_rpc::JsonLineCodec;

/// Failure modes of a single [`NotifyClient::send`] call.
#[derive(Debug, Error)]
pub enum NotifyError {
	/// Couldn't reach the notification service, or it closed mid-call.
	#[error("io error talking to notification service: {0}")]
	Io(#[from] std::io::Error),
	/// The request or response didn't round-trip as JSON.
	#[error("malformed notification payload: {0}")]
	Codec(#[from] hync_rpc::CodecError),
	/// The service closed the connection before replying.
	#[error("notification service closed the connection without a reply")]
	ConnectionClosed,
	/// `timeout` elapsed before a reply arrived.
	#[error("notification call timed out")]
	Timeout,
}

/// Which address field a recipient is reached at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecipientKind {
	/// `rcpt.addr` is an email address.
	Email,
	/// `rcpt.addr` is a phone number.
	Phone,
}

/// Who a notification is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
	/// Display name, for templating the outgoing message.
	pub name: String,
	/// Email address or phone number, per `kind`.
	pub addr: String,
	/// Which channel `addr` is reached over.
	pub kind: RecipientKind,
}

impl Recipient {
	/// Builds a recipient reached by email.
	#[must_use]
	pub fn email(name: impl Into<String>, addr: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			addr: addr.into(),
			kind: RecipientKind::Email,
		}
	}

	/// Builds a recipient reached by phone.
	#[must_use]
	pub fn phone(name: impl Into<String>, addr: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			addr: addr.into(),
			kind: RecipientKind::Phone,
		}
	}
}

/// A single notification request: serializes as `{"kind": "...", "data": {
/// "rcpt": ..., ... }}` via serde's adjacently tagged representation, the
/// same self-describing shape [`hync_proto::Frame`] uses — each variant
/// carries its own `rcpt` field rather than hoisting it to a sibling of
/// `data`, so this is one enum rather than an enum plus a wrapper struct.
/// There is no open-ended map of kind-specific fields the way the original
/// system's dynamic dispatch allowed; every kind this side channel ever
/// sends is known up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "kebab-case")]
pub enum NotifyRequest {
	/// Liveness probe.
	Ping {
		/// Who to probe.
		rcpt: Recipient,
	},
	/// Email/SMS verification code on signup.
	Verify {
		/// Who to verify.
		rcpt: Recipient,
		/// The one-time code the recipient enters to verify.
		code: String,
	},
	/// Invitation to collaborate on a note.
	Invite {
		/// Who's being invited.
		rcpt: Recipient,
		/// Display name of the inviting user.
		inviter_name: String,
		/// Title of the note being shared, if it has one.
		note_title: Option<String>,
	},
	/// Password reset link/code.
	ResetPwd {
		/// Who's resetting their password.
		rcpt: Recipient,
		/// The reset token to embed in the link.
		token: String,
	},
	/// Nudge sent after a long period without activity.
	NotifyInactive {
		/// Who to nudge.
		rcpt: Recipient,
		/// Days since the account was last active.
		days_inactive: u32,
	},
	/// Sent to the inviter once an invite is accepted.
	InviteAccepted {
		/// Who to notify.
		rcpt: Recipient,
		/// Display name of the user who accepted.
		accepted_by: String,
	},
	/// First-login welcome message.
	Welcome {
		/// Who just logged in for the first time.
		rcpt: Recipient,
	},
	/// Welcome message that also asks the recipient to set a password.
	WelcomeSetPwd {
		/// Who's setting their password.
		rcpt: Recipient,
		/// Token authorizing the password-set step.
		token: String,
	},
}

impl NotifyRequest {
	/// The recipient every variant carries.
	#[must_use]
	pub fn rcpt(&self) -> &Recipient {
		match self {
			Self::Ping { rcpt }
			| Self::Verify { rcpt, .. }
			| Self::Invite { rcpt, .. }
			| Self::ResetPwd { rcpt, .. }
			| Self::NotifyInactive { rcpt, .. }
			| Self::InviteAccepted { rcpt, .. }
			| Self::Welcome { rcpt }
			| Self::WelcomeSetPwd { rcpt, .. } => rcpt,
		}
	}
}

/// The service's reply to a single `send` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyResponse {
	/// Whether the notification was accepted for delivery. Acceptance isn't
	/// proof of delivery; the service is free to queue and retry on its own
	/// side without this client ever knowing.
	pub accepted: bool,
	/// Human-readable detail, e.g. the reason a request was rejected.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub detail: Option<String>,
}

/// Client for the external notification service.
///
/// Stateless and cheap to construct: opens a fresh connection per call rather
/// than holding one open, since the notification path is low-volume and
/// independent of any session's lifetime.
#[derive(Debug, Clone)]
pub struct NotifyClient {
	addr: SocketAddr,
	timeout: Duration,
}

impl NotifyClient {
	/// Builds a client that dials `addr`, bounding each call to `timeout`.
	#[must_use]
	pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
		Self { addr, timeout }
	}

	/// Sends `request` and awaits the service's reply, bounded by this
	/// client's configured timeout. A timed-out or failed call never panics
	/// and never touches any session's sync state; callers that care about
	/// delivery should log the error and move on.
	///
	/// # Errors
	///
	/// Returns [`NotifyError`] if the connection, encoding, or the timeout
	/// itself fails.
	pub async fn send(&self, request: &NotifyRequest) -> Result<NotifyResponse, NotifyError> {
		time::timeout(self.timeout, self.call(request))
			.await
			.unwrap_or(Err(NotifyError::Timeout))
	}

	async fn call(&self, request: &NotifyRequest) -> Result<NotifyResponse, NotifyError> {
		let stream = TcpStream::connect(self.addr).await?;
		let mut framed = Framed::new(stream, JsonLineCodec::<serde_json::Value>::default());

		let encoded = serde_json::to_value(request).map_err(hync_rpc::CodecError::from)?;
		framed.send(encoded).await?;

		let reply = framed.next().await.ok_or(NotifyError::ConnectionClosed)??;
		let response: NotifyResponse = serde_json::from_value(reply).map_err(hync_rpc::CodecError::from)?;
		debug!(addr = %self.addr, accepted = response.accepted, "notification sent");
		Ok(response)
	}
}

/// Sends `request` via a freshly built [`NotifyClient`], logging but
/// swallowing any failure. The notification pipeline's own error policy
/// (`notification-send-failed`) is "logged, not surfaced" — callers on the
/// sync path that fire a notification as a side effect of some other
/// operation use this instead of propagating [`NotifyError`] up through
/// whatever they were already doing.
pub async fn send_best_effort(addr: SocketAddr, timeout: Duration, request: NotifyRequest) {
	let client = NotifyClient::new(addr, timeout);
	if let Err(err) = client.send(&request).await {
		warn!(addr = %addr, error = %err, "notification send failed");
	}
}
