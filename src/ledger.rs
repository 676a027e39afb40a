//! Replace/undo ledger: the per-file record of what a replace run changed,
//! kept so the whole run (or a partial, canceled run) can be reverted.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::matches::FileMatch;

/// The record of one file's flagged matches captured before a replace.
/// Immutable after creation; appended to the ledger once the file's
/// rewrite succeeds.
#[derive(Debug, Clone)]
pub struct ReplaceDef {
	pub original_file: PathBuf,
	/// Unique backup file name (keeps the original extension so external
	/// viewers still recognize the content)
	pub backup_name: String,
	/// Modification time captured before the rewrite, best-effort
	pub last_write_time: Option<DateTime<Utc>>,
	pub replace_items: Vec<FileMatch>,
}

impl ReplaceDef {
	pub fn new(original_file: impl Into<PathBuf>, replace_items: Vec<FileMatch>) -> Self {
		let original_file = original_file.into();
		let extension = original_file
			.extension()
			.and_then(|e| e.to_str())
			.map(|e| format!(".{e}"))
			.unwrap_or_default();
		let backup_name = format!("{}{}", Uuid::new_v4(), extension);
		let last_write_time = std::fs::metadata(&original_file)
			.and_then(|m| m.modified())
			.ok()
			.map(DateTime::<Utc>::from);

		ReplaceDef {
			original_file,
			backup_name,
			last_write_time,
			replace_items,
		}
	}
}

/// Append-only record of the replace runs applied since the last fresh
/// search. Appends happen file-by-file as each rewrite succeeds, so a
/// cancellation mid-run still leaves a consistent, partially undoable
/// ledger. Cleared exactly when a new search begins, not between
/// successive replace sub-runs against the same result set.
#[derive(Debug, Default)]
pub struct UndoLedger {
	entries: Vec<ReplaceDef>,
}

impl UndoLedger {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a completed file's def. Refused when the file is already in
	/// the current scope: a second replace over the same result set must
	/// not double-record (or double-apply) a file.
	pub fn append(&mut self, def: ReplaceDef) -> bool {
		if self.contains(&def.original_file) {
			return false;
		}
		self.entries.push(def);
		true
	}

	pub fn contains(&self, path: &Path) -> bool {
		self.entries.iter().any(|d| d.original_file == path)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn entries(&self) -> &[ReplaceDef] {
		&self.entries
	}

	/// Drop the scope. Called when a fresh search begins, or after a
	/// successful undo. A failed undo keeps the ledger so the revert can
	/// be retried.
	pub fn clear(&mut self) {
		self.entries.clear();
	}
}
