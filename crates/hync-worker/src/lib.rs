//! Shared actor-runtime primitives reused across the engine's services:
//! per-key serialized write lanes and a read-through LRU cache.
//!
//! No source for this crate survived retrieval from the editor broker beyond
//! its manifest (`tokio[rt,sync]` + `lru` + `tracing`), so the two primitives
//! below are designed fresh from that dependency list and from the
//! actor-handle idiom used throughout `hync-engine`'s services — not ported
//! from a specific file.

#![warn(missing_docs)]

pub mod cache;
pub mod lanes;

pub use cache::Cache;
pub use lanes::WriteLanes;
