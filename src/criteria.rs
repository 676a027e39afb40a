//! Run criteria: the immutable snapshot of parameters for one search or
//! replace pass. A new run always gets a new instance; nothing here is
//! mutated once the run has been submitted.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SweepError, SweepResult};
use crate::token::{PauseCancelSource, PauseCancelToken};
use std::sync::Arc;

/// Which operation a run performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
	#[default]
	Search,
	SearchInResults,
	Replace,
}

impl std::fmt::Display for Operation {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Operation::Search => write!(f, "search"),
			Operation::SearchInResults => write!(f, "search in results"),
			Operation::Replace => write!(f, "replace"),
		}
	}
}

/// The search syntax in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternKind {
	PlainText,
	Regex,
	XPath,
	Soundex,
	Hex,
}

impl std::fmt::Display for PatternKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			PatternKind::PlainText => write!(f, "plain text"),
			PatternKind::Regex => write!(f, "regex"),
			PatternKind::XPath => write!(f, "xpath"),
			PatternKind::Soundex => write!(f, "soundex"),
			PatternKind::Hex => write!(f, "hex"),
		}
	}
}

/// Search option flags handed through to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFlags {
	pub case_sensitive: bool,
	pub whole_word: bool,
	pub multiline: bool,
	/// `.` matches newline in regex patterns
	pub single_line: bool,
	/// Report every match per file rather than the first
	pub global: bool,
	/// Enable AND/OR composition of multiple patterns
	pub boolean_operators: bool,
	/// Request cancellation once this many files have matched
	pub stop_after_matches: Option<usize>,
	/// Request pause once this many files have matched (fires at most once)
	pub pause_after_matches: Option<usize>,
}

/// File-filter specification resolved by the enumerator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFilter {
	/// Include globs; empty means everything
	pub include: Vec<String>,
	pub exclude: Vec<String>,
	/// Maximum recursion depth, None for unlimited
	pub max_depth: Option<usize>,
	pub include_hidden: bool,
	pub include_binary: bool,
	pub include_archives: bool,
	pub follow_symlinks: bool,
	/// Size bounds in bytes
	pub min_size: u64,
	pub max_size: Option<u64>,
	/// Only files modified at or after this time
	pub modified_after: Option<chrono::DateTime<chrono::Utc>>,
	pub modified_before: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for FileFilter {
	fn default() -> Self {
		FileFilter {
			include: Vec::new(),
			exclude: Vec::new(),
			max_depth: None,
			include_hidden: false,
			include_binary: false,
			include_archives: false,
			follow_symlinks: false,
			min_size: 0,
			max_size: None,
			modified_after: None,
			modified_before: None,
		}
	}
}

impl FileFilter {
	/// Compile the glob lists, failing fast on bad patterns before any
	/// state transition happens.
	pub fn compile(&self) -> SweepResult<CompiledFilter> {
		let include = Self::build_set(&self.include)?;
		let exclude = Self::build_set(&self.exclude)?;
		Ok(CompiledFilter {
			include,
			include_empty: self.include.is_empty(),
			exclude,
		})
	}

	fn build_set(patterns: &[String]) -> SweepResult<GlobSet> {
		let mut builder = GlobSetBuilder::new();
		for pattern in patterns {
			let glob = Glob::new(pattern).map_err(|e| SweepError::InvalidGlobPattern {
				pattern: pattern.clone(),
				reason: e.to_string(),
			})?;
			builder.add(glob);
		}
		builder.build().map_err(|e| SweepError::InvalidGlobPattern {
			pattern: patterns.join(";"),
			reason: e.to_string(),
		})
	}
}

/// Compiled glob matchers for one run.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
	include: GlobSet,
	include_empty: bool,
	exclude: GlobSet,
}

impl CompiledFilter {
	pub fn matches(&self, path: &Path) -> bool {
		let name = path.file_name().map(Path::new).unwrap_or(path);
		if self.exclude.is_match(name) || self.exclude.is_match(path) {
			return false;
		}
		self.include_empty || self.include.is_match(name) || self.include.is_match(path)
	}
}

/// All parameters needed to execute one search or replace pass.
#[derive(Debug, Clone)]
pub struct RunCriteria {
	pub operation: Operation,
	pub root: PathBuf,
	pub pattern: String,
	pub replace_with: Option<String>,
	pub pattern_kind: PatternKind,
	pub flags: SearchFlags,
	pub filter: FileFilter,
	/// Character encoding label handed to the engine; None for auto-detect
	pub encoding: Option<String>,
	/// Run per-file matching across worker threads
	pub parallel: bool,
	/// Scripted runs treat user-confirmable conditions as pre-approved
	pub scripted: bool,
	/// Shared suspend/abort primitive for this run (or script chain). The
	/// front end owns the source; workers only ever see tokens.
	pub source: Arc<PauseCancelSource>,
}

impl RunCriteria {
	pub fn search(root: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
		RunCriteria {
			operation: Operation::Search,
			root: root.into(),
			pattern: pattern.into(),
			replace_with: None,
			pattern_kind: PatternKind::PlainText,
			flags: SearchFlags {
				global: true,
				..SearchFlags::default()
			},
			filter: FileFilter::default(),
			encoding: None,
			parallel: false,
			scripted: false,
			source: Arc::new(PauseCancelSource::new()),
		}
	}

	pub fn replace(
		root: impl Into<PathBuf>,
		pattern: impl Into<String>,
		replace_with: impl Into<String>,
	) -> Self {
		let mut criteria = Self::search(root, pattern);
		criteria.operation = Operation::Replace;
		criteria.replace_with = Some(replace_with.into());
		criteria
	}

	pub fn with_operation(mut self, operation: Operation) -> Self {
		self.operation = operation;
		self
	}

	pub fn with_pattern_kind(mut self, kind: PatternKind) -> Self {
		self.pattern_kind = kind;
		self
	}

	pub fn with_flags(mut self, flags: SearchFlags) -> Self {
		self.flags = flags;
		self
	}

	pub fn with_filter(mut self, filter: FileFilter) -> Self {
		self.filter = filter;
		self
	}

	pub fn with_source(mut self, source: Arc<PauseCancelSource>) -> Self {
		self.source = source;
		self
	}

	pub fn token(&self) -> PauseCancelToken {
		self.source.token()
	}

	pub fn with_parallel(mut self, parallel: bool) -> Self {
		self.parallel = parallel;
		self
	}

	pub fn scripted(mut self, scripted: bool) -> Self {
		self.scripted = scripted;
		self
	}

	/// Validate the pattern for the selected kind without touching any run
	/// state. Regex and hex patterns are checked here; XPath and Soundex
	/// syntax is the engine's concern.
	pub fn validate_pattern(&self) -> SweepResult<()> {
		if self.pattern.is_empty() {
			return Err(SweepError::InvalidPattern {
				kind: self.pattern_kind.to_string(),
				pattern: String::new(),
				reason: "empty pattern".to_string(),
			});
		}
		match self.pattern_kind {
			PatternKind::Regex => {
				regex::Regex::new(&self.pattern).map_err(|e| SweepError::InvalidPattern {
					kind: self.pattern_kind.to_string(),
					pattern: self.pattern.clone(),
					reason: e.to_string(),
				})?;
			}
			PatternKind::Hex => {
				let ok = self
					.pattern
					.split_whitespace()
					.all(|byte| byte.len() <= 2 && byte.chars().all(|c| c.is_ascii_hexdigit()));
				if !ok {
					return Err(SweepError::InvalidPattern {
						kind: self.pattern_kind.to_string(),
						pattern: self.pattern.clone(),
						reason: "expected whitespace-separated hex bytes".to_string(),
					});
				}
			}
			PatternKind::PlainText | PatternKind::XPath | PatternKind::Soundex => {}
		}
		Ok(())
	}

	/// Validate the search root for operations that walk the file system.
	pub fn validate_root(&self) -> SweepResult<()> {
		if self.operation == Operation::Search && !self.root.is_dir() {
			return Err(SweepError::InvalidRoot {
				path: self.root.clone(),
			});
		}
		Ok(())
	}
}
