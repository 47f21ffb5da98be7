//! Batching multiple logical messages into a single wire frame and back.
//!
//! A mux envelope is just a JSON array; a single-element array is still a
//! valid mux, and (for leniency on read) a bare object is accepted as an
//! implicit one-element batch.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Failure demuxing a frame into its constituent messages.
#[derive(Debug, Error)]
pub enum MuxError {
	/// One element of the batch didn't decode as the expected message type.
	#[error("failed to decode muxed element: {0}")]
	Element(#[from] serde_json::Error),
}

/// Batches `msgs` into a single JSON array value.
pub fn mux<M: Serialize>(msgs: &[M]) -> serde_json::Value {
	serde_json::Value::Array(
		msgs.iter()
			.map(|m| serde_json::to_value(m).expect("M serializes infallibly"))
			.collect(),
	)
}

/// Unbatches a frame produced by [`mux`] (or a single bare message, accepted
/// for leniency) back into its constituent messages, in order.
pub fn demux<M: DeserializeOwned>(frame: serde_json::Value) -> Result<Vec<M>, MuxError> {
	match frame {
		serde_json::Value::Array(items) => items
			.into_iter()
			.map(|v| serde_json::from_value(v).map_err(MuxError::from))
			.collect(),
		single => Ok(vec![serde_json::from_value(single)?]),
	}
}
