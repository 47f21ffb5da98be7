//! Engine runtime wiring: the single place that builds the store, the
//! notification bus, the token consumer, and the session hub and hands back
//! one handle a transport can drive connections against.
//!
//! Grounded on the editor broker's `runtime.rs`: that file's tiered startup
//! existed to break a genuine cyclic dependency (`SessionService` needed a
//! `RoutingHandle` and vice versa) using handshake channels. Nothing here has
//! that cycle — [`crate::hub::SessionHub`] depends downward on the store, bus,
//! and token consumer, and sessions depend on the hub only through a [`std::sync::Weak`]
//! back-reference — so construction is a straight line instead of a handshake
//! dance: one runtime struct built once at startup, handed to every
//! connection by reference, rather than any piece of state reached through a
//! global.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::hub::SessionHub;
use crate::notify_bus::NotifyBus;
use crate::store::Store;
use crate::token::TokenConsumer;

/// The fully wired engine, ready to accept connections.
pub struct EngineRuntime {
	/// Resolved configuration this runtime was built from.
	pub config: EngineConfig,
	/// The session directory; transports call [`SessionHub::spawn_session`]
	/// once per accepted connection.
	pub hub: Arc<SessionHub>,
	/// Issues and consumes the bearer tokens `session-create` redeems.
	pub tokens: Arc<TokenConsumer>,
	/// The resource store backing every session's shadows.
	pub store: Arc<Store>,
}

impl EngineRuntime {
	/// Builds a runtime from `config`, with a freshly empty store, bus, and
	/// token registry. There is exactly one of these per process.
	#[must_use]
	pub fn new(config: EngineConfig) -> Arc<Self> {
		let store = Arc::new(Store::new(config.cache_capacity));
		let bus = Arc::new(NotifyBus::new());
		let tokens = Arc::new(TokenConsumer::new());
		let hub = Arc::new(SessionHub::new(store.clone(), bus, tokens.clone(), config.clone()));

		Arc::new(Self {
			config,
			hub,
			tokens,
			store,
		})
	}
}
