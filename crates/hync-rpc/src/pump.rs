//! Drives one connection: reads frames in, dispatches each to a
//! [`tower_service::Service`], and writes whatever the service (or anything
//! else in the process, via a [`crate::PeerSocket`]) wants sent back out.
//!
//! This is the generic half of the editor broker's per-connection loop
//! (`BrokerService` plus its driving loop) with the protocol-specific
//! dispatch logic (auth gating, request/response matching) factored out into
//! the `Service` the caller supplies.

use std::fmt;
use std::future::poll_fn;

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tower_service::Service;

use crate::codec::{CodecError, JsonLineCodec};
use crate::peer::{MainLoopEvent, PeerSocketRx};

/// Failure terminating a connection's message pump.
#[derive(Debug, Error)]
pub enum PumpError<E> {
	/// Framing or encoding failed.
	#[error("transport error: {0}")]
	Codec(#[from] CodecError),
	/// The service handling an inbound message reported a fatal error.
	#[error("service error")]
	Service(E),
}

/// Drives `transport` until it closes or the service reports a fatal error.
///
/// Inbound frames are decoded and handed to `service.call`; its `Ok(Some(_))`
/// reply is written back out. Outbound frames may also arrive out of band,
/// pushed in from elsewhere in the process through `outbound_rx` — the
/// receiving end of the channel a [`crate::PeerSocket`] clone writes into.
pub async fn drive<T, M, S>(
	transport: T,
	mut service: S,
	mut outbound_rx: PeerSocketRx<M>,
) -> Result<(), PumpError<S::Error>>
where
	T: AsyncRead + AsyncWrite + Unpin + Send,
	M: Serialize + DeserializeOwned + fmt::Debug + Send + 'static,
	S: Service<M, Response = Option<M>> + Send,
	S::Future: Send,
{
	let mut framed = Framed::new(transport, JsonLineCodec::<M>::default());

	loop {
		tokio::select! {
			biased;

			outgoing = outbound_rx.recv() => {
				let Some(MainLoopEvent::Outgoing(msg)) = outgoing else {
					return Ok(());
				};
				framed.send(msg).await?;
			}

			inbound = framed.next() => {
				let Some(inbound) = inbound else {
					return Ok(());
				};
				let msg = inbound?;

				poll_fn(|cx| service.poll_ready(cx)).await.map_err(PumpError::Service)?;
				match service.call(msg).await {
					Ok(Some(reply)) => framed.send(reply).await?,
					Ok(None) => {}
					Err(err) => return Err(PumpError::Service(err)),
				}
			}
		}
	}
}
