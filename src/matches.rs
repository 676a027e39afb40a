//! Per-file search result value types

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One capture group inside a match.
///
/// Offsets are absolute positions in the searched text, the same coordinate
/// space as the owning [`FileMatch`]; the range partitioner rebases them
/// against the match start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureGroup {
	/// Group name, or the group number rendered as text for unnamed groups
	pub name: String,
	pub start: usize,
	pub length: usize,
	/// Captured text, kept for tooltips/reports
	pub value: String,
}

impl CaptureGroup {
	pub fn new(name: impl Into<String>, start: usize, length: usize, value: impl Into<String>) -> Self {
		CaptureGroup {
			name: name.into(),
			start,
			length,
			value: value.into(),
		}
	}

	pub fn end(&self) -> usize {
		self.start + self.length
	}
}

/// One match within a file, with its capture groups and the flag that marks
/// it for replacement. Matches are flagged by the front end between a search
/// and the replace that commits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMatch {
	pub start: usize,
	pub length: usize,
	/// The matched text, used for rendering and group attribution
	pub text: String,
	pub groups: Vec<CaptureGroup>,
	/// Whether this match is flagged for replacement
	pub replace: bool,
}

impl FileMatch {
	pub fn new(start: usize, length: usize, text: impl Into<String>) -> Self {
		FileMatch {
			start,
			length,
			text: text.into(),
			groups: Vec::new(),
			replace: true,
		}
	}

	pub fn with_groups(mut self, groups: Vec<CaptureGroup>) -> Self {
		self.groups = groups;
		self
	}

	pub fn end(&self) -> usize {
		self.start + self.length
	}
}

/// The outcome of searching one file: its matches, or the error recorded
/// against it. A failed file does not abort the run; it is carried in the
/// result sink with `error` set so the front end can show it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResult {
	/// Path shown to the user. For archive members this includes the inner
	/// entry (`archive.zip/readme.txt`).
	pub path: PathBuf,
	/// Path to open on disk when it differs from `path` (the archive itself)
	pub container_path: Option<PathBuf>,
	pub read_only: bool,
	pub matches: Vec<FileMatch>,
	/// Error recorded against this file, if its processing failed
	pub error: Option<String>,
}

impl FileResult {
	pub fn new(path: impl Into<PathBuf>, matches: Vec<FileMatch>) -> Self {
		FileResult {
			path: path.into(),
			container_path: None,
			read_only: false,
			matches,
			error: None,
		}
	}

	pub fn error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
		FileResult {
			path: path.into(),
			container_path: None,
			read_only: false,
			matches: Vec::new(),
			error: Some(message.into()),
		}
	}

	pub fn with_read_only(mut self, read_only: bool) -> Self {
		self.read_only = read_only;
		self
	}

	pub fn is_success(&self) -> bool {
		self.error.is_none()
	}

	/// The on-disk path to open: the container for archive members,
	/// otherwise the displayed path.
	pub fn real_path(&self) -> &Path {
		self.container_path.as_deref().unwrap_or(&self.path)
	}

	/// Matches currently flagged for replacement.
	pub fn flagged_matches(&self) -> impl Iterator<Item = &FileMatch> {
		self.matches.iter().filter(|m| m.replace)
	}

	pub fn has_flagged_matches(&self) -> bool {
		self.matches.iter().any(|m| m.replace)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test_log::test]
	fn test_file_result_success_and_error() {
		let ok = FileResult::new("/tmp/a.txt", vec![FileMatch::new(0, 3, "abc")]);
		assert!(ok.is_success());
		assert_eq!(ok.real_path(), Path::new("/tmp/a.txt"));

		let failed = FileResult::error("/tmp/b.txt", "permission denied");
		assert!(!failed.is_success());
		assert!(failed.matches.is_empty());
	}

	#[test_log::test]
	fn test_real_path_prefers_container() {
		let mut result = FileResult::new("/tmp/arc.zip/readme.txt", Vec::new());
		result.container_path = Some(PathBuf::from("/tmp/arc.zip"));
		assert_eq!(result.real_path(), Path::new("/tmp/arc.zip"));
	}

	#[test_log::test]
	fn test_flagged_matches() {
		let mut keep = FileMatch::new(0, 2, "ab");
		keep.replace = false;
		let swap = FileMatch::new(4, 2, "cd");

		let result = FileResult::new("/tmp/a.txt", vec![keep, swap]);
		assert!(result.has_flagged_matches());
		assert_eq!(result.flagged_matches().count(), 1);
	}
}
