//! Newline-delimited JSON framing.
//!
//! The wire adapter is specified as a self-describing text format, so framing
//! is newline-delimited rather than length-prefixed binary (contrast with the
//! editor broker's `BrokerProtocol`, which length-prefixes postcard-encoded
//! binary messages over a Unix socket — same spot in the stack, different
//! format because this protocol is text-based).

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Framing/encoding failure for [`JsonLineCodec`].
#[derive(Debug, Error)]
pub enum CodecError {
	/// The underlying stream errored.
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	/// A line wasn't valid JSON, or didn't match the expected shape.
	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
}

/// A [`Decoder`]/[`Encoder`] pair that reads and writes one JSON value per
/// line.
pub struct JsonLineCodec<M> {
	_marker: PhantomData<fn() -> M>,
}

impl<M> Default for JsonLineCodec<M> {
	fn default() -> Self {
		Self {
			_marker: PhantomData,
		}
	}
}

impl<M> Clone for JsonLineCodec<M> {
	fn clone(&self) -> Self {
		Self::default()
	}
}

impl<M: DeserializeOwned> Decoder for JsonLineCodec<M> {
	type Item = M;
	type Error = CodecError;

	fn decode(&mut self, src: &mut BytesMut) -> Result<Option<M>, CodecError> {
		let Some(newline_at) = src.iter().position(|b| *b == b'\n') else {
			return Ok(None);
		};

		let line = src.split_to(newline_at);
		src.advance(1);

		if line.iter().all(u8::is_ascii_whitespace) {
			return self.decode(src);
		}

		Ok(Some(serde_json::from_slice(&line)?))
	}
}

impl<M: Serialize> Encoder<M> for JsonLineCodec<M> {
	type Error = CodecError;

	fn encode(&mut self, item: M, dst: &mut BytesMut) -> Result<(), CodecError> {
		let encoded = serde_json::to_vec(&item)?;
		dst.reserve(encoded.len() + 1);
		dst.put_slice(&encoded);
		dst.put_u8(b'\n');
		Ok(())
	}
}
