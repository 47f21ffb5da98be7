//! The resource store: cached, write-serialized access to resource values.
//!
//! Combines a [`backend::InMemoryBackend`], a [`hync_worker::Cache`], and
//! [`hync_worker::WriteLanes`] the same way the editor broker's
//! `KnowledgeService` combined `heed3` with its own in-memory indices —
//! reads are cache-first, writes go through a per-resource lane so two
//! concurrent deltas against the same resource never race, and distinct
//! resources never block each other.

use std::num::NonZeroUsize;
use std::sync::Arc;

use hync_proto::{ResourceId, ResourceKey, ResourceKind};
use hync_worker::{Cache, WriteLanes};
use tracing::debug;

use crate::backend::{InMemoryBackend, ResourceBackend};
use crate::delta;
use crate::error::EngineError;
use crate::resource::ResourceValue;

/// Cached, write-serialized storage for every resource kind.
///
/// One backend and cache serve all three kinds: resource ids are globally
/// unique (minted from `uuid`), so a single keyspace is sufficient and
/// avoids three near-identical struct fields.
pub struct Store {
	backend: Arc<InMemoryBackend<ResourceValue>>,
	cache: Cache<ResourceId, ResourceValue>,
	lanes: WriteLanes<ResourceId>,
}

impl Store {
	/// Builds a store whose cache holds at most `cache_capacity` entries.
	#[must_use]
	pub fn new(cache_capacity: usize) -> Self {
		let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
		Self {
			backend: Arc::new(InMemoryBackend::new()),
			cache: Cache::new(capacity),
			lanes: WriteLanes::new(),
		}
	}

	/// Fetches the current value for `key`, if the resource exists.
	pub async fn get(&self, key: &ResourceKey) -> Option<ResourceValue> {
		if let Some(cached) = self.cache.get(&key.id).await {
			return Some(cached);
		}
		let loaded = self.backend.load(&key.id).await?;
		self.cache.insert(key.id.clone(), loaded.clone()).await;
		Some(loaded)
	}

	/// Creates a new resource of `kind` holding `initial`, returning its
	/// freshly minted id.
	///
	/// # Panics
	///
	/// Panics if `initial`'s kind doesn't match `kind` — callers always build
	/// the initial value from the same kind they're creating.
	pub async fn create(&self, kind: ResourceKind, initial: ResourceValue) -> ResourceId {
		assert_eq!(initial.kind(), kind, "initial value kind mismatch on create");
		let id = self.backend.new_id();
		self.backend
			.store(&id, initial.clone())
			.await
			.expect("in-memory backend never rejects a write");
		self.cache.insert(id.clone(), initial).await;
		id
	}

	/// Applies a wire delta to the resource named by `key`, persisting and
	/// returning the resulting value plus whether the write actually changed
	/// anything.
	///
	/// Acquires that resource's write lane first, so concurrent deltas
	/// against the same id apply one at a time in arrival order. A delta
	/// that patches to the exact value already stored (an empty delta, or a
	/// retransmission that lands identically) skips the backend write and
	/// cache update entirely — this is what makes a duplicate inbound edit
	/// produce no additional store commit, per the idempotence law, rather
	/// than merely a same-content one.
	///
	/// # Errors
	///
	/// Returns [`EngineError::StoreConflict`] if `key` doesn't name an
	/// existing resource. Deltas only ever apply to resources created up
	/// front via [`Store::create`].
	pub async fn apply_delta(
		&self,
		key: &ResourceKey,
		delta: &serde_json::Value,
	) -> Result<(ResourceValue, bool), EngineError> {
		let _permit = self.lanes.acquire(&key.id).await;

		let current = self
			.get(key)
			.await
			.ok_or_else(|| EngineError::StoreConflict(key.id.to_string()))?;
		let patched = delta::patch(&current, delta);

		if patched == current {
			return Ok((patched, false));
		}

		self.backend
			.store(&key.id, patched.clone())
			.await
			.map_err(|e| EngineError::StoreConflict(e.0.to_string()))?;
		self.cache.insert(key.id.clone(), patched.clone()).await;
		debug!(key = %key, "store commit");

		Ok((patched, true))
	}
}
