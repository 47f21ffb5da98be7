//! Generic async message pump and frame plumbing shared by every transport
//! the engine speaks.
//!
//! This crate knows nothing about session state or the sync protocol itself
//! (that's `hync-engine` and `hync-proto`); it only knows how to turn bytes on
//! a duplex stream into typed messages and back, how to batch ("mux") several
//! messages into one frame, and how to hand a message to a connection's
//! single-writer outbound queue from anywhere else in the process.

#![warn(missing_docs)]

pub mod codec;
pub mod mux;
pub mod peer;
pub mod pump;

pub use codec::{CodecError, JsonLineCodec};
pub use mux::{demux, mux, MuxError};
pub use peer::{MainLoopEvent, PeerSocket};
pub use pump::{drive, PumpError};
