//! Delta algebra for the hync sync protocol.
//!
//! Two families of delta live here:
//!
//! - [`text`]: character-level diff/patch for `note.text`, with context-fuzzy
//!   re-application so a delta still lands (partially, if necessary) against a
//!   drifted shadow instead of failing.
//! - [`structural`]: keyed, last-writer-wins change-sets for the structural
//!   resource kinds (`note.peers`, `folio`, `profile`).
//!
//! Both families satisfy the same law where it is meaningful:
//! `patch(v, diff(v, v')) == v'` for an exact pre-image; `text::patch` degrades
//! gracefully instead of failing when the pre-image assumption doesn't hold.

#![warn(missing_docs)]

pub mod structural;
pub mod text;

pub use structural::{FieldChange, StructuralDelta};
pub use text::{diff, patch, PatchOutcome, TextDelta, TextOp};
