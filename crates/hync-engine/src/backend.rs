//! Storage abstraction for resource values.
//!
//! The engine talks to persistence through one small async trait rather than
//! a concrete database client, mirroring how the editor broker kept its
//! knowledge graph behind `KnowledgeHandle` instead of wiring `heed3` calls
//! directly into request handling. The only implementation shipped here is
//! an in-memory map; a durable backend is a drop-in replacement.

use std::collections::HashMap;

use hync_proto::ResourceId;
use tokio::sync::Mutex;

/// A store conflict: the backend refused a write.
#[derive(Debug, thiserror::Error)]
#[error("store rejected write for resource {0}")]
pub struct StoreError(pub ResourceId);

/// Loads and persists values of one resource kind.
///
/// Implementations need not serialize internally — `load`/`store` operate on
/// the already-typed value; the store layer above handles cache and
/// notification concerns.
#[async_trait::async_trait]
pub trait ResourceBackend<V>: Send + Sync
where
	V: Clone + Send + Sync + 'static,
{
	/// Loads the current value for `id`, if the resource exists.
	async fn load(&self, id: &ResourceId) -> Option<V>;

	/// Persists `value` under `id`, replacing whatever was there.
	///
	/// # Errors
	///
	/// Returns [`StoreError`] if the backend refuses the write.
	async fn store(&self, id: &ResourceId, value: V) -> Result<(), StoreError>;

	/// Allocates a fresh, unused resource id.
	fn new_id(&self) -> ResourceId;
}

/// An in-memory `ResourceBackend` backed by a mutex-guarded hash map.
///
/// Generic over the value type so one implementation serves all three
/// resource kinds, instantiated once per kind rather than duplicated three
/// times by hand.
pub struct InMemoryBackend<V> {
	values: Mutex<HashMap<ResourceId, V>>,
}

impl<V> InMemoryBackend<V> {
	/// Builds an empty backend.
	#[must_use]
	pub fn new() -> Self {
		Self {
			values: Mutex::new(HashMap::new()),
		}
	}
}

impl<V> Default for InMemoryBackend<V> {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait::async_trait]
impl<V> ResourceBackend<V> for InMemoryBackend<V>
where
	V: Clone + Send + Sync + 'static,
{
	async fn load(&self, id: &ResourceId) -> Option<V> {
		self.values.lock().await.get(id).cloned()
	}

	async fn store(&self, id: &ResourceId, value: V) -> Result<(), StoreError> {
		self.values.lock().await.insert(id.clone(), value);
		Ok(())
	}

	fn new_id(&self) -> ResourceId {
		ResourceId::from(uuid::Uuid::new_v4().to_string())
	}
}
