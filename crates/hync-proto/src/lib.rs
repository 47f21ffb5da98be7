//! Shared wire types for the hync sync protocol.
//!
//! This crate defines the self-describing JSON frames exchanged between a
//! client and the session it holds open, plus the newtype identifiers shared
//! across the engine. Framing (length-prefixing, mux/demux) lives in
//! `hync-rpc`; this crate only knows about the shape of one logical message.

#![warn(missing_docs)]

pub mod types;

pub use types::*;
