//! WebSocket transport: binds the listener, negotiates the `hync`
//! subprotocol and origin allow-list on upgrade, and drives one task per
//! accepted connection.
//!
//! Grounded on the editor broker's `ipc::serve`/`handle_connection` pair
//! (accept loop spawning one task per connection, errors logged and the
//! listener kept alive). The broker only ever spoke length-prefixed postcard
//! over a Unix socket, so the WebSocket upgrade and framing themselves are
//! new, built on `tokio-tungstenite` (see `DESIGN.md`).

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{self, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn, Instrument};

use hync_engine::{EngineError, EngineRuntime};
use hync_proto::Frame;
use hync_rpc::peer::MainLoopEvent;

/// The subprotocol this server negotiates on every upgrade.
const SUBPROTOCOL: &str = "hync";

/// Binds `runtime.config.listen_addr` and accepts connections until the
/// process is signaled to stop. Each connection gets its own session and its
/// own task; one connection wedging never blocks another from being
/// accepted.
///
/// # Errors
///
/// Returns an error if the listener fails to bind.
pub async fn serve(runtime: Arc<EngineRuntime>) -> std::io::Result<()> {
	let listener = TcpListener::bind(runtime.config.listen_addr).await?;
	info!(addr = %runtime.config.listen_addr, "hync-server listening");
	serve_on(listener, runtime).await
}

/// Drives an already-bound listener, the way [`serve`] does past its own
/// bind call. Split out so tests can bind an ephemeral port (`:0`), read back
/// the address the OS actually picked, and only then hand the listener off
/// to the accept loop.
async fn serve_on(listener: TcpListener, runtime: Arc<EngineRuntime>) -> std::io::Result<()> {
	loop {
		match listener.accept().await {
			Ok((stream, peer_addr)) => {
				let runtime = runtime.clone();
				tokio::spawn(
					async move {
						if let Err(err) = handle_connection(stream, runtime).await {
							warn!(error = %err, "connection ended with error");
						}
					}
					.instrument(tracing::info_span!("ws_connection", peer = %peer_addr)),
				);
			}
			Err(err) => {
				warn!(error = %err, "failed to accept connection");
			}
		}
	}
}

/// Negotiates the WebSocket upgrade for one accepted TCP stream, then drives
/// its session until the transport closes.
async fn handle_connection(stream: TcpStream, runtime: Arc<EngineRuntime>) -> anyhow::Result<()> {
	let handshake_config = runtime.config.clone();
	let ws_stream = tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, mut response: Response| {
		if let Some(origin) = req.headers().get("origin").and_then(|v| v.to_str().ok()) {
			if !handshake_config.origin_allowed(origin) {
				let rejection: ErrorResponse = http::Response::builder()
					.status(StatusCode::FORBIDDEN)
					.body(Some("origin not allowed".to_string()))
					.expect("valid rejection response");
				return Err(rejection);
			}
		}
		response
			.headers_mut()
			.insert("sec-websocket-protocol", SUBPROTOCOL.parse().expect("valid header value"));
		Ok(response)
	})
	.await?;

	let (mut ws_tx, mut ws_rx) = ws_stream.split();
	let (handle, mut peer_rx) = runtime.hub.spawn_session().await;
	debug!(sid = %handle.id(), "session attached to connection");

	let mut ping_tick = tokio::time::interval(runtime.config.ping_interval);
	ping_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			biased;

			outgoing = peer_rx.recv() => {
				let Some(MainLoopEvent::Outgoing((frame, _permit))) = outgoing else {
					break;
				};
				if write_frame(&mut ws_tx, &frame).await.is_err() {
					break;
				}
			}

			_ = ping_tick.tick() => {
				if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
					debug!(sid = %handle.id(), "ping failed, closing connection");
					break;
				}
			}

			inbound = ws_rx.next() => {
				let Some(inbound) = inbound else { break };
				match inbound {
					Ok(Message::Text(text)) => {
						if !process_inbound_text(&text, &handle, &mut ws_tx).await {
							break;
						}
					}
					Ok(Message::Ping(payload)) => {
						if ws_tx.send(Message::Pong(payload)).await.is_err() {
							break;
						}
					}
					Ok(Message::Pong(_)) => {}
					Ok(Message::Close(_)) => break,
					Ok(_) => {
						warn!(sid = %handle.id(), "non-text frame received; protocol is text-only");
						break;
					}
					Err(err) => {
						warn!(sid = %handle.id(), error = %err, "websocket read error");
						break;
					}
				}
			}
		}
	}

	handle.shutdown().await;
	let _ = ws_tx.close().await;
	Ok(())
}

/// Demuxes one inbound text frame into its constituent [`Frame`]s, hands
/// each to the session in order, and writes back whatever replies result
/// (batched into a single outbound mux, mirroring how they arrived).
/// Returns `false` if the connection should close — either because the
/// batch carried a transport-fatal error, or because the write itself
/// failed.
async fn process_inbound_text<S>(text: &str, handle: &hync_engine::SessionHandle, ws_tx: &mut S) -> bool
where
	S: futures_util::Sink<Message> + Unpin,
{
	let parsed: Result<serde_json::Value, _> = serde_json::from_str(text);
	let Ok(value) = parsed else {
		warn!(sid = %handle.id(), "malformed json, closing connection");
		let _ = write_frame(ws_tx, &malformed_event_frame("invalid json")).await;
		return false;
	};

	let frames: Vec<Frame> = match hync_rpc::demux(value) {
		Ok(frames) => frames,
		Err(err) => {
			warn!(sid = %handle.id(), error = %err, "malformed frame batch, closing connection");
			let _ = write_frame(ws_tx, &malformed_event_frame(&err.to_string())).await;
			return false;
		}
	};

	let mut replies = Vec::new();
	for frame in frames {
		match handle.handle_frame(frame).await {
			Ok(Some(reply)) => replies.push(reply),
			Ok(None) => {}
			Err(err) => {
				let fatal = err.terminates_transport();
				replies.push(error_frame(&err));
				if !write_batch(ws_tx, &replies).await {
					return false;
				}
				if fatal {
					return false;
				}
				replies = Vec::new();
			}
		}
	}

	write_batch(ws_tx, &replies).await
}

async fn write_batch<S>(ws_tx: &mut S, frames: &[Frame]) -> bool
where
	S: futures_util::Sink<Message> + Unpin,
{
	if frames.is_empty() {
		return true;
	}
	let muxed = hync_rpc::mux(frames);
	let Ok(text) = serde_json::to_string(&muxed) else {
		return false;
	};
	ws_tx.send(Message::Text(text)).await.is_ok()
}

async fn write_frame<S>(ws_tx: &mut S, frame: &Frame) -> Result<(), ()>
where
	S: futures_util::Sink<Message> + Unpin,
{
	let text = serde_json::to_string(frame).map_err(|_| ())?;
	ws_tx.send(Message::Text(text)).await.map_err(|_| ())
}

fn error_frame(err: &EngineError) -> Frame {
	Frame::Error {
		sid: None,
		reason: err.code(),
		detail: err.to_string(),
	}
}

fn malformed_event_frame(detail: &str) -> Frame {
	Frame::Error {
		sid: None,
		reason: hync_proto::ErrorCode::MalformedEvent,
		detail: detail.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use hync_engine::resource::{NoteValue, ResourceValue};
	use hync_engine::token::Token;
	use hync_engine::EngineConfig;
	use hync_proto::{ResourceKey, ResourceKind, TokenKey, UserId};
	use std::collections::BTreeMap;
	use tokio_tungstenite::connect_async;

	async fn spawn_server() -> (std::net::SocketAddr, Arc<EngineRuntime>) {
		let runtime = EngineRuntime::new(EngineConfig::default());
		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
		let addr = listener.local_addr().expect("local addr");
		let serving = runtime.clone();
		tokio::spawn(async move {
			let _ = serve_on(listener, serving).await;
		});
		(addr, runtime)
	}

	#[tokio::test]
	async fn session_create_round_trips_over_a_real_websocket() {
		let (addr, runtime) = spawn_server().await;

		let id = runtime
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
		let key = ResourceKey::new(ResourceKind::Note, id);
		runtime
			.tokens
			.issue(TokenKey::from("tok-ws"), Token::new(UserId::from("alice"), vec![key]))
			.await;

		let (mut ws, _response) = connect_async(format!("ws://{addr}")).await.expect("connect");

		let request = Frame::SessionCreate {
			token: "tok-ws".into(),
			tag: Some("t1".into()),
		};
		let text = serde_json::to_string(&hync_rpc::mux(&[request])).expect("encode");
		ws.send(Message::Text(text)).await.expect("send");

		let reply = ws.next().await.expect("stream open").expect("read frame");
		let Message::Text(reply_text) = reply else {
			panic!("expected a text frame, got {reply:?}");
		};
		let value: serde_json::Value = serde_json::from_str(&reply_text).expect("parse json");
		let replies: Vec<Frame> = hync_rpc::demux(value).expect("demux");
		assert_eq!(replies.len(), 1);
		match &replies[0] {
			Frame::SessionCreated { uid, shadows, tag, .. } => {
				assert_eq!(*uid, UserId::from("alice"));
				assert_eq!(shadows.len(), 1);
				assert_eq!(tag.as_deref(), Some("t1"));
			}
			other => panic!("unexpected reply: {other:?}"),
		}

		ws.close(None).await.ok();
	}

	#[tokio::test]
	async fn unknown_origin_is_rejected_at_the_handshake() {
		let runtime = EngineRuntime::new(EngineConfig {
			allowed_origins: vec!["https://notes.example".to_string()],
			..EngineConfig::default()
		});
		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
		let addr = listener.local_addr().expect("local addr");
		tokio::spawn(async move {
			let _ = serve_on(listener, runtime).await;
		});

		use tokio_tungstenite::tungstenite::client::IntoClientRequest;
		let mut request = format!("ws://{addr}").into_client_request().expect("request");
		request
			.headers_mut()
			.insert("origin", "https://evil.example".parse().expect("header value"));

		let err = connect_async(request).await.expect_err("handshake should be rejected");
		match err {
			tokio_tungstenite::tungstenite::Error::Http(response) => {
				assert_eq!(response.status(), StatusCode::FORBIDDEN);
			}
			other => panic!("expected an HTTP rejection, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn malformed_json_closes_the_connection() {
		let (addr, _runtime) = spawn_server().await;
		let (mut ws, _response) = connect_async(format!("ws://{addr}")).await.expect("connect");

		ws.send(Message::Text("not json".to_string())).await.expect("send");

		let reply = ws.next().await.expect("stream open").expect("read frame");
		if let Message::Text(reply_text) = reply {
			let value: serde_json::Value = serde_json::from_str(&reply_text).expect("parse json");
			let replies: Vec<Frame> = hync_rpc::demux(value).expect("demux");
			assert!(matches!(replies.first(), Some(Frame::Error { .. })));
		}

		// the connection is fatal either way: the next read must end the stream.
		let after = ws.next().await;
		assert!(after.is_none() || matches!(after, Some(Ok(Message::Close(_)))));
	}
}
