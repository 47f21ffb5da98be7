//! The shadow: one side's view of a resource's differential-sync state.
//!
//! Each live `(session, resource)` pair owns exactly one shadow. It tracks a
//! server-version (`Sv`, bumped when the server accepts inbound changes) and
//! a client-version (`Cv`, bumped when the server ships outbound changes),
//! plus a backup snapshot so a client that retransmits an already-processed
//! edit (its connection dropped before the ack arrived) gets idempotent
//! re-application instead of a duplicated effect. The state machine is
//! exactly the one worked out in the synchronization design; this module is
//! its only implementation.

use std::collections::VecDeque;

use hync_proto::{Cv, Edit, ResourceKey, ShadowSnapshot, Sv};

use crate::error::EngineError;
use crate::resource::ResourceValue;
use crate::store::Store;

#[derive(Debug, Clone)]
struct Backup {
	value: ResourceValue,
	sv: Sv,
	cv: Cv,
}

/// One session's synchronized view of one resource.
pub struct Shadow {
	key: ResourceKey,
	value: ResourceValue,
	sv: Sv,
	cv: Cv,
	backup: Backup,
	outbound_unacked: VecDeque<Edit>,
	/// The client `cv` last applied to the store along the normal (case 1)
	/// path. A second edit presenting the same `cv` with no intervening
	/// [`Shadow::outbound_send`] — i.e. `self.cv` hasn't moved since — is a
	/// retransmission of what's already committed, not a new edit: positional
	/// text deltas aren't idempotent on their own, so re-running
	/// `store.apply_delta` for it would double the edit. `None` until the
	/// first edit is applied.
	last_applied_client_cv: Option<Cv>,
}

impl Shadow {
	/// Opens a shadow for `key` seeded with the resource's current value.
	#[must_use]
	pub fn new(key: ResourceKey, initial: ResourceValue) -> Self {
		let backup = Backup {
			value: initial.clone(),
			sv: Sv(0),
			cv: Cv(0),
		};
		Self {
			key,
			value: initial,
			sv: Sv(0),
			cv: Cv(0),
			backup,
			outbound_unacked: VecDeque::new(),
			last_applied_client_cv: None,
		}
	}

	/// A snapshot suitable for seeding a client right after subscription.
	#[must_use]
	pub fn snapshot(&self) -> ShadowSnapshot {
		ShadowSnapshot {
			kind: self.key.kind,
			id: self.key.id.clone(),
			value: self.value.to_json(),
			sv: self.sv,
			cv: self.cv,
		}
	}

	/// The resource key this shadow tracks.
	#[must_use]
	pub fn key(&self) -> &ResourceKey {
		&self.key
	}

	/// Diffs `master` against the shadow's last-known value, queues the
	/// result for outbound delivery, and returns the full outbound-unacked
	/// queue to send. Returns `None` if `master` matches what the shadow
	/// already reflects — callers only invoke this on a taint notification,
	/// so an unchanged master means the taint was stale or self-caused.
	///
	/// The backup snapshot is captured here, *before* this batch's diff and
	/// `Cv` bump, so it holds the rollback point for the outbound message
	/// that's about to become stale — a client retransmitting against the
	/// `Cv` it knew before this send resolves to `backup`, not to the
	/// now-current one. Saving the backup after the bump instead (taking it
	/// verbatim) would leave `backup.cv == self.cv` permanently, and the
	/// retransmission branch in [`Shadow::apply_inbound`] would never fire.
	pub fn outbound_send(&mut self, master: &ResourceValue) -> Option<Vec<Edit>> {
		if *master == self.value {
			return None;
		}

		self.backup = Backup {
			value: self.value.clone(),
			sv: self.sv,
			cv: self.cv,
		};

		let wire_delta = crate::delta::diff(&self.value, master);
		self.outbound_unacked.push_back(Edit {
			cv: self.cv,
			delta: wire_delta,
		});
		self.value = master.clone();
		self.cv = self.cv.next();

		Some(self.outbound_unacked.iter().cloned().collect())
	}

	/// Applies a batch of client-originated edits in order, writing accepted
	/// changes through `store`, then prunes the outbound-unacked queue up to
	/// `frame_cv` — the enclosing `res-sync` frame's top-level `cv`, the
	/// client's implicit ack of every server-sent edit up to that point.
	/// Pruning happens unconditionally, independent of `edits`: an empty
	/// `edits` slice is a legal ack-only message, and must still drop
	/// acked entries even though the loop body below never runs for it.
	///
	/// Returns the outcome of the batch. The caller uses `committed` to
	/// decide whether a notification-bus publish is warranted — a duplicate
	/// retransmission that patches to the value already stored doesn't
	/// produce one, per the idempotence law — and `conflict` to decide
	/// whether to surface a store-conflict error back to this edit's
	/// originating client, per the error taxonomy.
	///
	/// Store rejections differ from the textbook algorithm in ordering: the
	/// store write is attempted *before* the shadow's local value is
	/// mutated, so a rejected write never leaves the shadow diverged from
	/// the value it actually holds. A malformed delta never reaches that
	/// failure path at all — [`crate::delta::patch`] is total and degrades
	/// instead of erroring, so the "fails patching entirely" case the
	/// algorithm calls out applies with zero effect here by construction.
	///
	/// # Errors
	///
	/// Propagates any non-conflict error the store's backend raises.
	pub async fn apply_inbound(&mut self, edits: &[Edit], frame_cv: Cv, store: &Store) -> Result<SyncOutcome, EngineError> {
		let mut outcome = SyncOutcome::default();

		for edit in edits {
			let cv_client = edit.cv;

			if cv_client == self.cv {
				if self.last_applied_client_cv == Some(cv_client) {
					// Same cv as last time, and no outbound_send has moved
					// self.cv since: this is a retransmission of an edit
					// already committed, not a new one. Drop it rather than
					// double-applying a non-idempotent positional delta.
				} else {
					self.try_apply(edit, store, &mut outcome).await?;
					self.last_applied_client_cv = Some(cv_client);
				}
			} else if cv_client == self.backup.cv {
				self.value = self.backup.value.clone();
				self.sv = self.backup.sv;
				self.cv = self.backup.cv;
				self.try_apply(edit, store, &mut outcome).await?;
			}
			// else: stale/unknown edit, dropped silently.
		}

		self.outbound_unacked.retain(|e| e.cv.0 > frame_cv.0);

		Ok(outcome)
	}

	async fn try_apply(&mut self, edit: &Edit, store: &Store, outcome: &mut SyncOutcome) -> Result<(), EngineError> {
		match store.apply_delta(&self.key, &edit.delta).await {
			Ok((new_value, committed)) => {
				self.value = new_value;
				self.sv = self.sv.next();
				outcome.committed |= committed;
				Ok(())
			}
			Err(EngineError::StoreConflict(detail)) => {
				outcome.conflict = Some(detail);
				Ok(())
			}
			Err(e) => Err(e),
		}
	}
}

/// What happened while applying a batch of inbound edits to a shadow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
	/// At least one edit in the batch actually changed the stored value.
	pub committed: bool,
	/// The store rejected at least one edit; carries the rejection detail
	/// from the last one that did. Sv was not advanced for it — a later
	/// server-originated res-sync re-converges the client instead of a retry.
	pub conflict: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use hync_proto::{ResourceId, ResourceKind};
	use std::collections::BTreeMap;

	fn key() -> ResourceKey {
		ResourceKey::new(ResourceKind::Note, ResourceId::from("note-1"))
	}

	fn note(text: &str) -> ResourceValue {
		ResourceValue::Note(crate::resource::NoteValue {
			text: text.to_string(),
			peers: BTreeMap::new(),
			created_at: 0,
		})
	}

	#[tokio::test]
	async fn outbound_send_with_unchanged_master_returns_none() {
		let mut shadow = Shadow::new(key(), note("same"));
		assert!(shadow.outbound_send(&note("same")).is_none());
	}

	#[tokio::test]
	async fn outbound_send_queues_a_delta_and_bumps_cv() {
		let mut shadow = Shadow::new(key(), note("hello"));
		let edits = shadow.outbound_send(&note("hello world")).unwrap();
		assert_eq!(edits.len(), 1);
		assert_eq!(edits[0].cv, Cv(0));
		assert_eq!(shadow.cv, Cv(1));
	}

	#[tokio::test]
	async fn inbound_edit_at_current_cv_applies_and_bumps_sv() {
		let store = Store::new(16);
		let id = store.create(ResourceKind::Note, note("hello")).await;
		let k = ResourceKey::new(ResourceKind::Note, id);
		let mut shadow = Shadow::new(k.clone(), note("hello"));

		let wire = crate::delta::diff(&note("hello"), &note("hello there"));
		let edits = vec![Edit { cv: Cv(0), delta: wire }];
		shadow.apply_inbound(&edits, Cv(0), &store).await.unwrap();

		assert_eq!(shadow.sv, Sv(1));
		assert_eq!(store.get(&k).await.unwrap(), note("hello there"));
	}

	#[tokio::test]
	async fn empty_edit_list_is_a_legal_ack_only_message() {
		let store = Store::new(16);
		let mut shadow = Shadow::new(key(), note("x"));
		shadow.apply_inbound(&[], Cv(0), &store).await.unwrap();
		assert_eq!(shadow.sv, Sv(0));
	}

	#[tokio::test]
	async fn empty_edit_list_still_prunes_outbound_unacked_by_frame_cv() {
		let store = Store::new(16);
		let mut shadow = Shadow::new(key(), note("a"));
		shadow.outbound_send(&note("ab")).unwrap();
		shadow.outbound_send(&note("abc")).unwrap();
		assert_eq!(shadow.outbound_unacked.len(), 2);

		// An ack-only message (no edits) still carries the client's current
		// cv at the top level, and that alone must drop acked entries.
		shadow.apply_inbound(&[], Cv(1), &store).await.unwrap();

		assert!(shadow.outbound_unacked.iter().all(|e| e.cv.0 > 1));
	}

	#[tokio::test]
	async fn stale_edit_at_unknown_cv_is_dropped() {
		let store = Store::new(16);
		let id = store.create(ResourceKind::Note, note("x")).await;
		let k = ResourceKey::new(ResourceKind::Note, id);
		let mut shadow = Shadow::new(k, note("x"));

		let edits = vec![Edit {
			cv: Cv(99),
			delta: serde_json::json!({}),
		}];
		shadow.apply_inbound(&edits, Cv(99), &store).await.unwrap();
		assert_eq!(shadow.sv, Sv(0));
	}

	#[tokio::test]
	async fn retransmitted_edit_with_no_intervening_outbound_send_is_not_reapplied() {
		let store = Store::new(16);
		let id = store.create(ResourceKind::Note, note("hello world")).await;
		let k = ResourceKey::new(ResourceKind::Note, id);
		let mut shadow = Shadow::new(k.clone(), note("hello world"));

		let wire = crate::delta::diff(&note("hello world"), &note("hello earth"));
		let edit = Edit { cv: Cv(0), delta: wire };

		// First delivery: applies normally, master reflects the edit.
		shadow.apply_inbound(std::slice::from_ref(&edit), Cv(0), &store).await.unwrap();
		assert_eq!(store.get(&k).await.unwrap(), note("hello earth"));
		assert_eq!(shadow.sv, Sv(1));

		// The ack never reaches the client, so it retransmits the identical
		// edit. No outbound_send has happened in between, so self.cv is
		// still 0 — this hits the normal (non-backup) path and must be
		// recognized as an already-applied retransmission, not reapplied.
		let outcome = shadow.apply_inbound(std::slice::from_ref(&edit), Cv(0), &store).await.unwrap();

		assert_eq!(shadow.sv, Sv(1), "sv must not advance a second time");
		assert!(!outcome.committed, "a pure retransmission commits nothing");
		assert_eq!(
			store.get(&k).await.unwrap(),
			note("hello earth"),
			"reapplying a positional delta to its own output must not double-apply"
		);
	}

	#[tokio::test]
	async fn duplicate_retransmission_resolves_to_the_backup_cv() {
		let store = Store::new(16);
		let id = store.create(ResourceKind::Note, note("hello")).await;
		let k = ResourceKey::new(ResourceKind::Note, id);
		let mut shadow = Shadow::new(k, note("hello"));

		// A server-originated change bumps Cv to 1 and pins the backup at the
		// pre-bump state (cv 0) — the point a client still holding cv 0
		// resolves to.
		shadow.outbound_send(&note("hello, everyone")).unwrap();
		assert_eq!(shadow.cv, Cv(1));
		assert_eq!(shadow.backup.cv, Cv(0));

		// The client, unaware of that server push, retransmits an edit it
		// tagged with the cv it last knew: 0. It no longer matches `self.cv`
		// (now 1) but matches `backup.cv`, so the shadow rolls back and
		// reapplies instead of dropping it as stale.
		let edit = Edit {
			cv: Cv(0),
			delta: serde_json::json!({}),
		};
		shadow.apply_inbound(std::slice::from_ref(&edit), Cv(0), &store).await.unwrap();

		assert_eq!(shadow.sv, Sv(1));
		assert_eq!(shadow.cv, Cv(0));
	}

	#[tokio::test]
	async fn ack_prunes_outbound_unacked_entries_up_to_acked_cv() {
		let mut shadow = Shadow::new(key(), note("a"));
		shadow.outbound_send(&note("ab")).unwrap();
		shadow.outbound_send(&note("abc")).unwrap();
		assert_eq!(shadow.outbound_unacked.len(), 2);

		let store = Store::new(16);
		shadow
			.apply_inbound(
				&[Edit {
					cv: Cv(1),
					delta: serde_json::json!({}),
				}],
				Cv(1),
				&store,
			)
			.await
			.unwrap();

		assert!(shadow.outbound_unacked.iter().all(|e| e.cv.0 > 1));
	}
}
