//! Read-through LRU cache, by last access.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use tokio::sync::Mutex;

/// An async-safe LRU cache bounded by entry count.
pub struct Cache<K, V> {
	inner: Mutex<LruCache<K, V>>,
}

impl<K, V> Cache<K, V>
where
	K: Eq + Hash,
	V: Clone,
{
	/// Builds a cache holding at most `capacity` entries.
	#[must_use]
	pub fn new(capacity: NonZeroUsize) -> Self {
		Self {
			inner: Mutex::new(LruCache::new(capacity)),
		}
	}

	/// Looks up `key`, marking it most-recently-used on a hit.
	pub async fn get(&self, key: &K) -> Option<V> {
		self.inner.lock().await.get(key).cloned()
	}

	/// Inserts or replaces `key`, evicting the least-recently-used entry if
	/// the cache is at capacity.
	pub async fn insert(&self, key: K, value: V) {
		self.inner.lock().await.put(key, value);
	}

	/// Drops `key` from the cache, if present.
	pub async fn remove(&self, key: &K) {
		self.inner.lock().await.pop(key);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(flavor = "current_thread")]
	async fn get_after_insert_hits() {
		let cache = Cache::new(NonZeroUsize::new(2).unwrap());
		cache.insert("a", 1).await;
		assert_eq!(cache.get(&"a").await, Some(1));
	}

	#[tokio::test(flavor = "current_thread")]
	async fn eviction_drops_least_recently_used() {
		let cache = Cache::new(NonZeroUsize::new(2).unwrap());
		cache.insert("a", 1).await;
		cache.insert("b", 2).await;
		// touch "a" so "b" becomes the least-recently-used entry
		assert_eq!(cache.get(&"a").await, Some(1));
		cache.insert("c", 3).await;

		assert_eq!(cache.get(&"b").await, None);
		assert_eq!(cache.get(&"a").await, Some(1));
		assert_eq!(cache.get(&"c").await, Some(3));
	}

	#[tokio::test(flavor = "current_thread")]
	async fn remove_drops_entry() {
		let cache = Cache::new(NonZeroUsize::new(2).unwrap());
		cache.insert("a", 1).await;
		cache.remove(&"a").await;
		assert_eq!(cache.get(&"a").await, None);
	}
}
