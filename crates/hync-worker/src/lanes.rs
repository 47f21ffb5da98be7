//! Per-key serialized write lanes.
//!
//! At most one write is ever in flight for a given key; writes to distinct
//! keys proceed fully independently. This backs the store's "serialize writes
//! per resource id, let distinct ids run concurrently" requirement.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// A registry of one semaphore-backed lane per key.
///
/// Lanes are created lazily on first use and are never removed: the
/// cardinality of resource ids a live process touches is bounded by the
/// number of distinct resources actually accessed, which is the same set the
/// store's cache is already sized around.
pub struct WriteLanes<K> {
	lanes: Mutex<HashMap<K, Arc<Semaphore>>>,
}

impl<K> Default for WriteLanes<K>
where
	K: Eq + Hash,
{
	fn default() -> Self {
		Self {
			lanes: Mutex::new(HashMap::new()),
		}
	}
}

impl<K> WriteLanes<K>
where
	K: Eq + Hash + Clone + std::fmt::Debug,
{
	/// Builds an empty set of lanes.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Acquires the write lane for `key`, waiting for any in-flight write to
	/// the same key to finish first. The returned guard releases the lane on
	/// drop.
	pub async fn acquire(&self, key: &K) -> OwnedSemaphorePermit {
		let sem = {
			let mut lanes = self.lanes.lock().await;
			lanes
				.entry(key.clone())
				.or_insert_with(|| Arc::new(Semaphore::new(1)))
				.clone()
		};
		trace!(?key, "acquiring write lane");
		sem.acquire_owned()
			.await
			.expect("lane semaphore is never closed")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn writes_to_the_same_key_are_serialized() {
		let lanes: Arc<WriteLanes<&'static str>> = Arc::new(WriteLanes::new());
		let concurrent = Arc::new(AtomicUsize::new(0));
		let max_concurrent = Arc::new(AtomicUsize::new(0));

		let mut handles = Vec::new();
		for _ in 0..8 {
			let lanes = lanes.clone();
			let concurrent = concurrent.clone();
			let max_concurrent = max_concurrent.clone();
			handles.push(tokio::spawn(async move {
				let _permit = lanes.acquire(&"same-key").await;
				let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
				max_concurrent.fetch_max(now, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_millis(5)).await;
				concurrent.fetch_sub(1, Ordering::SeqCst);
			}));
		}
		for h in handles {
			h.await.expect("task");
		}

		assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn writes_to_distinct_keys_proceed_concurrently() {
		let lanes: Arc<WriteLanes<u32>> = Arc::new(WriteLanes::new());
		let concurrent = Arc::new(AtomicUsize::new(0));
		let max_concurrent = Arc::new(AtomicUsize::new(0));

		let mut handles = Vec::new();
		for key in 0..8u32 {
			let lanes = lanes.clone();
			let concurrent = concurrent.clone();
			let max_concurrent = max_concurrent.clone();
			handles.push(tokio::spawn(async move {
				let _permit = lanes.acquire(&key).await;
				let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
				max_concurrent.fetch_max(now, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_millis(20)).await;
				concurrent.fetch_sub(1, Ordering::SeqCst);
			}));
		}
		for h in handles {
			h.await.expect("task");
		}

		assert!(max_concurrent.load(Ordering::SeqCst) > 1);
	}
}
