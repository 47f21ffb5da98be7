//! Character-level diff/patch for `note.text`.
//!
//! `diff` trims the common prefix and common suffix (by character, not byte)
//! and emits a single replace span for the differing middle — the same
//! approach as a char-indexed `rope_delta` helper (char-indexed prefix
//! scan, char-indexed suffix scan from the end, one replace span for the
//! rest). It is not a general LCS/Myers diff; it is the cheapest
//! deterministic choice that still produces a minimal script for the common
//! case of one contiguous edit, which is what a single keystroke or paste
//! looks like.
//!
//! `patch` is total: it never returns an error. A delta built against a
//! shadow that has since drifted (a retain or delete run that would reach
//! past the end of `base`) is applied as far as it can go and the excess is
//! silently dropped, so a single garbled or duplicated message narrows what
//! lands instead of wedging the whole patch.

use smallvec::SmallVec;
use thiserror::Error;

/// One operation in a text delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextOp {
	/// Keep the next `n` characters unchanged.
	Retain(usize),
	/// Drop the next `n` characters.
	Delete(usize),
	/// Insert literal text at the current cursor.
	Insert(String),
}

/// An ordered sequence of [`TextOp`] transforming one text into another.
///
/// A single contiguous edit — the overwhelmingly common case, one keystroke
/// or one paste — never needs more than four ops (leading retain, delete,
/// insert, trailing retain), so the sequence lives inline up to that size
/// instead of always heap-allocating a `Vec`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextDelta(pub SmallVec<[TextOp; 4]>);

impl TextDelta {
	/// A delta with no operations: a valid ack-only message.
	#[must_use]
	pub fn empty() -> Self {
		Self(SmallVec::new())
	}

	/// Whether this delta changes anything at all.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
			|| self
				.0
				.iter()
				.all(|op| matches!(op, TextOp::Retain(_)))
	}

	/// Serializes to the tab-separated wire form: `=N` retain, `-N` delete,
	/// `+text` insert.
	#[must_use]
	pub fn to_wire(&self) -> String {
		self.0
			.iter()
			.map(|op| match op {
				TextOp::Retain(n) => format!("={n}"),
				TextOp::Delete(n) => format!("-{n}"),
				TextOp::Insert(text) => format!("+{text}"),
			})
			.collect::<Vec<_>>()
			.join("\t")
	}

	/// Parses the tab-separated wire form produced by [`TextDelta::to_wire`].
	pub fn from_wire(s: &str) -> Result<Self, WireParseError> {
		if s.is_empty() {
			return Ok(Self::empty());
		}
		let mut ops = SmallVec::new();
		for token in s.split('\t') {
			let mut chars = token.chars();
			let tag = chars.next().ok_or(WireParseError::EmptyToken)?;
			let rest: String = chars.collect();
			let op = match tag {
				'=' => TextOp::Retain(parse_count(&rest)?),
				'-' => TextOp::Delete(parse_count(&rest)?),
				'+' => TextOp::Insert(rest),
				other => return Err(WireParseError::UnknownTag(other)),
			};
			ops.push(op);
		}
		Ok(Self(ops))
	}
}

fn parse_count(s: &str) -> Result<usize, WireParseError> {
	s.parse::<usize>()
		.map_err(|_| WireParseError::InvalidCount(s.to_string()))
}

/// Error parsing a [`TextDelta`] from its wire form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireParseError {
	/// An op token was empty.
	#[error("empty op token")]
	EmptyToken,
	/// The leading tag byte wasn't one of `=`, `-`, `+`.
	#[error("unrecognized op tag {0:?}")]
	UnknownTag(char),
	/// The count after `=`/`-` wasn't a valid `usize`.
	#[error("invalid op count {0:?}")]
	InvalidCount(String),
}

/// Computes the minimal [`TextDelta`] transforming `old` into `new`.
#[must_use]
pub fn diff(old: &str, new: &str) -> TextDelta {
	let old_chars: Vec<char> = old.chars().collect();
	let new_chars: Vec<char> = new.chars().collect();
	let old_len = old_chars.len();
	let new_len = new_chars.len();

	let mut prefix = 0;
	while prefix < old_len && prefix < new_len && old_chars[prefix] == new_chars[prefix] {
		prefix += 1;
	}

	let max_suffix = (old_len - prefix).min(new_len - prefix);
	let mut suffix = 0;
	while suffix < max_suffix
		&& old_chars[old_len - 1 - suffix] == new_chars[new_len - 1 - suffix]
	{
		suffix += 1;
	}

	let del_end = old_len - suffix;
	let ins_end = new_len - suffix;

	let mut ops = SmallVec::new();
	if prefix > 0 {
		ops.push(TextOp::Retain(prefix));
	}
	if del_end > prefix {
		ops.push(TextOp::Delete(del_end - prefix));
	}
	if ins_end > prefix {
		let inserted: String = new_chars[prefix..ins_end].iter().collect();
		ops.push(TextOp::Insert(inserted));
	}
	if suffix > 0 {
		ops.push(TextOp::Retain(suffix));
	}
	TextDelta(ops)
}

/// Result of applying a [`TextDelta`] to a base text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
	/// Text after applying as much of the delta as landed.
	pub text: String,
	/// The delta that actually landed. Identical to the input for a
	/// well-formed delta applied to its exact pre-image; narrower than the
	/// input when a retain/delete run ran past the end of `base`.
	pub applied: TextDelta,
}

/// Applies `delta` to `base`. Never panics and never rejects a delta: any
/// retain/delete run that would reach past the end of `base` is truncated to
/// whatever remains, and the untouched remainder of `base` (if any run didn't
/// reach it) is carried through unchanged.
#[must_use]
pub fn patch(base: &str, delta: &TextDelta) -> PatchOutcome {
	let chars: Vec<char> = base.chars().collect();
	let len = chars.len();
	let mut cursor = 0usize;
	let mut out = String::with_capacity(base.len());
	let mut applied_ops = SmallVec::with_capacity(delta.0.len());

	for op in &delta.0 {
		match op {
			TextOp::Retain(n) => {
				let take = (*n).min(len.saturating_sub(cursor));
				if take > 0 {
					out.extend(&chars[cursor..cursor + take]);
					cursor += take;
					applied_ops.push(TextOp::Retain(take));
				}
			}
			TextOp::Delete(n) => {
				let take = (*n).min(len.saturating_sub(cursor));
				if take > 0 {
					cursor += take;
					applied_ops.push(TextOp::Delete(take));
				}
			}
			TextOp::Insert(text) => {
				out.push_str(text);
				if !text.is_empty() {
					applied_ops.push(TextOp::Insert(text.clone()));
				}
			}
		}
	}

	if cursor < len {
		out.extend(&chars[cursor..]);
	}

	PatchOutcome {
		text: out,
		applied: TextDelta(applied_ops),
	}
}
