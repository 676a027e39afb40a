//! Collaborator interfaces for file enumeration and content matching,
//! plus the built-in reference implementations used by the CLI/TUI and
//! the tests. Alternative engines (XPath, Soundex, hex, archives) plug in
//! behind the same traits and must honor the pause/cancel contract.

use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::criteria::{FileFilter, PatternKind, RunCriteria};
use crate::error::{EngineError, EngineResult};
use crate::ledger::ReplaceDef;
use crate::matches::{CaptureGroup, FileMatch, FileResult};
use crate::settings::SweepSettings;
use crate::token::PauseCancelToken;

/// Produces candidate file paths for a run. Implementations check the
/// token between entries so a pause or cancel takes effect mid-walk.
pub trait FileEnumerator: Send + Sync {
	fn enumerate(
		&self,
		root: &Path,
		filter: &FileFilter,
		token: &PauseCancelToken,
	) -> EngineResult<Vec<PathBuf>>;
}

/// Per-file content matching and rewriting. The engine checks the token
/// between processing steps within a file; a canceled token unwinds with
/// [`EngineError::Canceled`], never by silently truncating output.
pub trait SearchEngine: Send + Sync {
	/// Whether this engine understands the given pattern kind. Checked at
	/// validation time so unsupported kinds are refused before a run starts.
	fn supports(&self, kind: PatternKind) -> bool;

	/// Called once at the start of a run, before any file is processed.
	/// Engines can reject a criteria combination here, or report options
	/// they accept but do not implement.
	fn prepare(&self, criteria: &RunCriteria, settings: &SweepSettings) -> EngineResult<()> {
		let _ = (criteria, settings);
		Ok(())
	}

	/// Search one file. `Ok(None)` means the file was processed and had no
	/// matches (this is not a failure).
	fn search_file(
		&self,
		path: &Path,
		criteria: &RunCriteria,
		settings: &SweepSettings,
		token: &PauseCancelToken,
	) -> EngineResult<Option<FileResult>>;

	/// Rewrite one file, replacing the flagged matches recorded in `def`.
	/// Must back up the original before writing so the ledger can revert it.
	fn replace_file(
		&self,
		def: &ReplaceDef,
		criteria: &RunCriteria,
		settings: &SweepSettings,
		token: &PauseCancelToken,
	) -> EngineResult<()>;

	/// Restore one file from its backup.
	fn undo_file(&self, def: &ReplaceDef, settings: &SweepSettings) -> EngineResult<()>;
}

/// Built-in enumerator: walkdir + the compiled glob filter, with the same
/// skip-and-warn handling of unreadable entries the discovery layer uses.
#[derive(Debug, Default)]
pub struct WalkEnumerator;

impl FileEnumerator for WalkEnumerator {
	fn enumerate(
		&self,
		root: &Path,
		filter: &FileFilter,
		token: &PauseCancelToken,
	) -> EngineResult<Vec<PathBuf>> {
		let compiled = filter
			.compile()
			.map_err(|e| EngineError::ExecutionFailed {
				reason: e.to_string(),
			})?;

		let mut walker = WalkDir::new(root);
		if let Some(max_depth) = filter.max_depth {
			walker = walker.max_depth(max_depth);
		}
		if filter.follow_symlinks {
			walker = walker.follow_links(true);
		}

		let mut files = Vec::new();
		for entry in walker.into_iter() {
			token.wait_while_paused_or_fail()?;

			let entry = match entry {
				Ok(e) => e,
				Err(e) => {
					warn!("enumerate: walk error: {}", e);
					continue;
				}
			};
			if entry.file_type().is_dir() {
				continue;
			}
			let path = entry.path();

			if !filter.include_hidden && is_hidden(path) {
				continue;
			}
			if !compiled.matches(path) {
				continue;
			}

			let metadata = match entry.metadata() {
				Ok(m) => m,
				Err(e) => {
					warn!("enumerate: skipping {} (metadata error: {})", path.display(), e);
					continue;
				}
			};
			let size = metadata.len();
			if size < filter.min_size {
				continue;
			}
			if let Some(max_size) = filter.max_size {
				if size > max_size {
					continue;
				}
			}
			if let Ok(modified) = metadata.modified() {
				let modified = chrono::DateTime::<chrono::Utc>::from(modified);
				if let Some(after) = filter.modified_after {
					if modified < after {
						continue;
					}
				}
				if let Some(before) = filter.modified_before {
					if modified > before {
						continue;
					}
				}
			}

			trace!("enumerate: found {} ({} bytes)", path.display(), size);
			files.push(path.to_path_buf());
		}

		debug!("enumerate: {} candidate files under {}", files.len(), root.display());
		Ok(files)
	}
}

fn is_hidden(path: &Path) -> bool {
	path.file_name()
		.and_then(|n| n.to_str())
		.map(|n| n.starts_with('.'))
		.unwrap_or(false)
}

/// Built-in matching engine for the plain-text and regex pattern kinds.
/// Replacements are backed by per-file copies in the undo directory.
#[derive(Debug, Default)]
pub struct RegexEngine;

impl RegexEngine {
	/// Criteria and settings surface this engine accepts but does not
	/// implement. Reported as warnings at run start instead of being
	/// dropped silently. The fuzzy threshold is not listed because it
	/// only applies to the Soundex kind, which `supports` already refuses.
	pub fn ignored_options(criteria: &RunCriteria, settings: &SweepSettings) -> Vec<&'static str> {
		let mut ignored = Vec::new();
		if criteria.flags.boolean_operators {
			ignored.push("boolean operators");
		}
		if criteria.filter.include_archives {
			ignored.push("archive contents");
		}
		if criteria.encoding.is_some() {
			ignored.push("forced encoding");
		}
		if settings.context_lines_before > 0 || settings.context_lines_after > 0 {
			ignored.push("context lines");
		}
		ignored
	}

	fn build_regex(criteria: &RunCriteria) -> EngineResult<regex::Regex> {
		let body = match criteria.pattern_kind {
			PatternKind::PlainText => regex::escape(&criteria.pattern),
			PatternKind::Regex => criteria.pattern.clone(),
			other => {
				return Err(EngineError::UnsupportedPattern {
					kind: other.to_string(),
				})
			}
		};
		let body = if criteria.flags.whole_word {
			format!(r"\b(?:{body})\b")
		} else {
			body
		};
		let mut builder = String::new();
		if !criteria.flags.case_sensitive {
			builder.push_str("(?i)");
		}
		if criteria.flags.multiline {
			builder.push_str("(?m)");
		}
		if criteria.flags.single_line {
			builder.push_str("(?s)");
		}
		builder.push_str(&body);

		regex::Regex::new(&builder).map_err(|e| EngineError::ExecutionFailed {
			reason: format!("pattern failed to compile: {e}"),
		})
	}

	fn read_text(path: &Path, include_binary: bool) -> EngineResult<Option<String>> {
		let bytes = std::fs::read(path).map_err(|e| EngineError::io(path, e))?;
		// NUL byte heuristic: skip binary content unless asked for it
		if !include_binary && bytes.contains(&0) {
			return Ok(None);
		}
		Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
	}

	fn capture_groups(re: &regex::Regex, caps: &regex::Captures<'_>) -> Vec<CaptureGroup> {
		let mut groups = Vec::new();
		for (idx, name) in re.capture_names().enumerate() {
			if idx == 0 {
				continue; // whole match is not a group
			}
			if let Some(m) = caps.get(idx) {
				let label = name.map(str::to_string).unwrap_or_else(|| idx.to_string());
				groups.push(CaptureGroup::new(label, m.start(), m.len(), m.as_str()));
			}
		}
		groups
	}
}

impl SearchEngine for RegexEngine {
	fn supports(&self, kind: PatternKind) -> bool {
		matches!(kind, PatternKind::PlainText | PatternKind::Regex)
	}

	fn prepare(&self, criteria: &RunCriteria, settings: &SweepSettings) -> EngineResult<()> {
		for option in Self::ignored_options(criteria, settings) {
			warn!("regex engine does not implement {option}; the option is ignored");
		}
		Ok(())
	}

	fn search_file(
		&self,
		path: &Path,
		criteria: &RunCriteria,
		_settings: &SweepSettings,
		token: &PauseCancelToken,
	) -> EngineResult<Option<FileResult>> {
		token.wait_while_paused_or_fail()?;

		let re = Self::build_regex(criteria)?;
		let Some(text) = Self::read_text(path, criteria.filter.include_binary)? else {
			return Ok(None);
		};

		let mut matches = Vec::new();
		for caps in re.captures_iter(&text) {
			// Checkpoint inside the match loop so dense files stay responsive
			token.wait_while_paused_or_fail()?;

			let whole = caps.get(0).ok_or_else(|| EngineError::ExecutionFailed {
				reason: "captures without a whole-match group".to_string(),
			})?;
			let mat = FileMatch::new(whole.start(), whole.len(), whole.as_str())
				.with_groups(Self::capture_groups(&re, &caps));
			matches.push(mat);

			if !criteria.flags.global {
				break;
			}
		}

		if matches.is_empty() {
			return Ok(None);
		}
		let read_only = std::fs::metadata(path)
			.map(|m| m.permissions().readonly())
			.unwrap_or(false);
		Ok(Some(FileResult::new(path, matches).with_read_only(read_only)))
	}

	fn replace_file(
		&self,
		def: &ReplaceDef,
		criteria: &RunCriteria,
		settings: &SweepSettings,
		token: &PauseCancelToken,
	) -> EngineResult<()> {
		token.wait_while_paused_or_fail()?;

		let path = def.original_file.as_path();
		let replacement = criteria.replace_with.clone().unwrap_or_default();
		let text = Self::read_text(path, true)?.unwrap_or_default();

		// The offsets were recorded at search time; refuse to rewrite a
		// file whose content no longer matches them
		let mut items: Vec<&FileMatch> = def.replace_items.iter().filter(|m| m.replace).collect();
		items.sort_by(|a, b| b.start.cmp(&a.start));
		for item in &items {
			if text.get(item.start..item.end()) != Some(item.text.as_str()) {
				return Err(EngineError::ExecutionFailed {
					reason: format!(
						"{} changed since it was searched; not rewriting",
						path.display()
					),
				});
			}
		}

		// Back up before touching the file so undo always has a source
		std::fs::create_dir_all(&settings.undo_dir)
			.map_err(|e| EngineError::io(&settings.undo_dir, e))?;
		let backup_path = settings.undo_dir.join(&def.backup_name);
		std::fs::copy(path, &backup_path).map_err(|e| EngineError::io(path, e))?;

		// Apply right-to-left so earlier offsets stay valid
		let mut out = text;
		for item in items {
			out.replace_range(item.start..item.end(), &replacement);
		}

		token.wait_while_paused_or_fail()?;

		// Per-file atomic rewrite: sibling temp file, then rename over
		let tmp_path = path.with_file_name(format!(
			"{}.sweep-tmp",
			path.file_name().and_then(|n| n.to_str()).unwrap_or("file")
		));
		std::fs::write(&tmp_path, out.as_bytes()).map_err(|e| EngineError::io(&tmp_path, e))?;
		std::fs::rename(&tmp_path, path).map_err(|e| EngineError::io(path, e))?;
		restore_modified_time(path, def.last_write_time);
		debug!("replace: rewrote {}", path.display());
		Ok(())
	}

	fn undo_file(&self, def: &ReplaceDef, settings: &SweepSettings) -> EngineResult<()> {
		let backup_path = settings.undo_dir.join(&def.backup_name);
		if !backup_path.is_file() {
			return Err(EngineError::ExecutionFailed {
				reason: format!("backup missing for {}", def.original_file.display()),
			});
		}
		std::fs::copy(&backup_path, &def.original_file)
			.map_err(|e| EngineError::io(&def.original_file, e))?;
		restore_modified_time(&def.original_file, def.last_write_time);
		debug!("undo: restored {}", def.original_file.display());
		Ok(())
	}
}

/// Put the modification time recorded before the replace back on the
/// rewritten (or restored) file. Best-effort, like the capture itself.
fn restore_modified_time(path: &Path, mtime: Option<chrono::DateTime<chrono::Utc>>) {
	let Some(mtime) = mtime else { return };
	let result = std::fs::File::options()
		.write(true)
		.open(path)
		.and_then(|file| file.set_modified(mtime.into()));
	if let Err(e) = result {
		warn!("could not restore modified time of {}: {}", path.display(), e);
	}
}

/// True when the file cannot be rewritten in place.
pub fn is_read_only(path: &Path) -> bool {
	std::fs::metadata(path)
		.map(|m| m.permissions().readonly())
		.unwrap_or(true)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::criteria::{FileFilter, RunCriteria, SearchFlags};
	use std::fs;
	use tempfile::TempDir;

	fn fixture() -> TempDir {
		let dir = TempDir::new().unwrap();
		fs::write(dir.path().join("alpha.txt"), "one two one\n").unwrap();
		fs::write(dir.path().join("beta.txt"), "nothing here\n").unwrap();
		fs::write(dir.path().join("gamma.log"), "one\n").unwrap();
		fs::write(dir.path().join(".hidden.txt"), "one\n").unwrap();
		dir
	}

	fn settings_for(dir: &TempDir) -> SweepSettings {
		SweepSettings::default().with_undo_dir(dir.path().join("undo"))
	}

	#[test_log::test]
	fn test_enumerator_applies_filters() {
		let dir = fixture();
		let filter = FileFilter {
			include: vec!["*.txt".to_string()],
			..FileFilter::default()
		};
		let files = WalkEnumerator
			.enumerate(dir.path(), &filter, &PauseCancelToken::none())
			.unwrap();

		let names: Vec<_> = files
			.iter()
			.map(|p| p.file_name().unwrap().to_string_lossy().to_string())
			.collect();
		assert!(names.contains(&"alpha.txt".to_string()));
		assert!(names.contains(&"beta.txt".to_string()));
		assert!(!names.contains(&"gamma.log".to_string()));
		// Hidden files are excluded unless requested
		assert!(!names.contains(&".hidden.txt".to_string()));
	}

	#[test_log::test]
	fn test_enumerator_observes_cancel() {
		let dir = fixture();
		let source = crate::token::PauseCancelSource::new();
		source.cancel();
		let result = WalkEnumerator.enumerate(dir.path(), &FileFilter::default(), &source.token());
		assert!(matches!(result, Err(EngineError::Canceled)));
	}

	#[test_log::test]
	fn test_search_plain_text_counts_and_offsets() {
		let dir = fixture();
		let criteria = RunCriteria::search(dir.path(), "one");
		let result = RegexEngine
			.search_file(
				&dir.path().join("alpha.txt"),
				&criteria,
				&settings_for(&dir),
				&PauseCancelToken::none(),
			)
			.unwrap()
			.unwrap();

		assert_eq!(result.matches.len(), 2);
		assert_eq!(result.matches[0].start, 0);
		assert_eq!(result.matches[1].start, 8);
		assert_eq!(result.matches[0].text, "one");
	}

	#[test_log::test]
	fn test_search_no_match_is_none() {
		let dir = fixture();
		let criteria = RunCriteria::search(dir.path(), "absent");
		let result = RegexEngine
			.search_file(
				&dir.path().join("alpha.txt"),
				&criteria,
				&settings_for(&dir),
				&PauseCancelToken::none(),
			)
			.unwrap();
		assert!(result.is_none());
	}

	#[test_log::test]
	fn test_search_regex_capture_groups() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("data.txt");
		fs::write(&path, "key=value\n").unwrap();

		let criteria = RunCriteria::search(dir.path(), r"(\w+)=(\w+)")
			.with_pattern_kind(PatternKind::Regex);
		let result = RegexEngine
			.search_file(&path, &criteria, &settings_for(&dir), &PauseCancelToken::none())
			.unwrap()
			.unwrap();

		let groups = &result.matches[0].groups;
		assert_eq!(groups.len(), 2);
		assert_eq!(groups[0].value, "key");
		assert_eq!(groups[1].value, "value");
		assert_eq!(groups[1].start, 4);
	}

	#[test_log::test]
	fn test_whole_word_and_case_flags() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("words.txt");
		fs::write(&path, "One oneself ONE\n").unwrap();

		let mut criteria = RunCriteria::search(dir.path(), "one").with_flags(SearchFlags {
			whole_word: true,
			global: true,
			..SearchFlags::default()
		});
		let result = RegexEngine
			.search_file(&path, &criteria, &settings_for(&dir), &PauseCancelToken::none())
			.unwrap()
			.unwrap();
		// "oneself" excluded by whole-word; case-insensitive by default
		assert_eq!(result.matches.len(), 2);

		criteria.flags.case_sensitive = true;
		let result = RegexEngine
			.search_file(&path, &criteria, &settings_for(&dir), &PauseCancelToken::none())
			.unwrap();
		assert!(result.is_none());
	}

	#[test_log::test]
	fn test_unsupported_pattern_kind() {
		assert!(!RegexEngine.supports(PatternKind::XPath));
		let dir = fixture();
		let criteria =
			RunCriteria::search(dir.path(), "//node").with_pattern_kind(PatternKind::XPath);
		let result = RegexEngine.search_file(
			&dir.path().join("alpha.txt"),
			&criteria,
			&settings_for(&dir),
			&PauseCancelToken::none(),
		);
		assert!(matches!(
			result,
			Err(EngineError::UnsupportedPattern { .. })
		));
	}

	#[test_log::test]
	fn test_replace_then_undo_round_trip() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("subject.txt");
		fs::write(&path, "one two one\n").unwrap();
		let settings = settings_for(&dir);

		let criteria = RunCriteria::replace(dir.path(), "one", "1");
		let result = RegexEngine
			.search_file(&path, &criteria, &settings, &PauseCancelToken::none())
			.unwrap()
			.unwrap();
		let def = ReplaceDef::new(&path, result.matches);

		RegexEngine
			.replace_file(&def, &criteria, &settings, &PauseCancelToken::none())
			.unwrap();
		assert_eq!(fs::read_to_string(&path).unwrap(), "1 two 1\n");

		RegexEngine.undo_file(&def, &settings).unwrap();
		assert_eq!(fs::read_to_string(&path).unwrap(), "one two one\n");
	}

	#[test_log::test]
	fn test_replace_honors_flagged_subset() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("subject.txt");
		fs::write(&path, "one two one\n").unwrap();
		let settings = settings_for(&dir);

		let criteria = RunCriteria::replace(dir.path(), "one", "1");
		let mut result = RegexEngine
			.search_file(&path, &criteria, &settings, &PauseCancelToken::none())
			.unwrap()
			.unwrap();
		// Unflag the first match; only the second should change
		result.matches[0].replace = false;
		let def = ReplaceDef::new(&path, result.matches);

		RegexEngine
			.replace_file(&def, &criteria, &settings, &PauseCancelToken::none())
			.unwrap();
		assert_eq!(fs::read_to_string(&path).unwrap(), "one two 1\n");
	}

	#[test_log::test]
	fn test_replace_refuses_file_changed_after_search() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("subject.txt");
		fs::write(&path, "one two one\n").unwrap();
		let settings = settings_for(&dir);

		let criteria = RunCriteria::replace(dir.path(), "one", "1");
		let result = RegexEngine
			.search_file(&path, &criteria, &settings, &PauseCancelToken::none())
			.unwrap()
			.unwrap();
		let def = ReplaceDef::new(&path, result.matches);

		// The recorded offsets now land mid-character in the new content
		fs::write(&path, "ééééé\n").unwrap();
		let result = RegexEngine.replace_file(&def, &criteria, &settings, &PauseCancelToken::none());
		assert!(matches!(result, Err(EngineError::ExecutionFailed { .. })));
		assert_eq!(fs::read_to_string(&path).unwrap(), "ééééé\n");

		// Same offsets, same length, different text
		fs::write(&path, "eno two eno\n").unwrap();
		let result = RegexEngine.replace_file(&def, &criteria, &settings, &PauseCancelToken::none());
		assert!(matches!(result, Err(EngineError::ExecutionFailed { .. })));
		assert_eq!(fs::read_to_string(&path).unwrap(), "eno two eno\n");
	}

	#[test_log::test]
	fn test_replace_and_undo_keep_modified_time() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("subject.txt");
		fs::write(&path, "one two one\n").unwrap();
		let settings = settings_for(&dir);

		let past = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000_000);
		fs::File::options()
			.write(true)
			.open(&path)
			.unwrap()
			.set_modified(past)
			.unwrap();

		let criteria = RunCriteria::replace(dir.path(), "one", "1");
		let result = RegexEngine
			.search_file(&path, &criteria, &settings, &PauseCancelToken::none())
			.unwrap()
			.unwrap();
		let def = ReplaceDef::new(&path, result.matches);

		RegexEngine
			.replace_file(&def, &criteria, &settings, &PauseCancelToken::none())
			.unwrap();
		assert_eq!(fs::read_to_string(&path).unwrap(), "1 two 1\n");
		let modified = fs::metadata(&path).unwrap().modified().unwrap();
		assert_eq!(modified, past);

		RegexEngine.undo_file(&def, &settings).unwrap();
		let modified = fs::metadata(&path).unwrap().modified().unwrap();
		assert_eq!(modified, past);
	}

	#[test_log::test]
	fn test_ignored_options_are_reported() {
		let dir = TempDir::new().unwrap();
		let mut criteria = RunCriteria::search(dir.path(), "one");
		let mut settings = settings_for(&dir);
		assert!(RegexEngine::ignored_options(&criteria, &settings).is_empty());

		criteria.flags.boolean_operators = true;
		criteria.filter.include_archives = true;
		criteria.encoding = Some("utf-16".to_string());
		settings.context_lines_before = 2;
		assert_eq!(
			RegexEngine::ignored_options(&criteria, &settings),
			vec![
				"boolean operators",
				"archive contents",
				"forced encoding",
				"context lines"
			]
		);
		assert!(RegexEngine.prepare(&criteria, &settings).is_ok());
	}

	#[test_log::test]
	fn test_undo_missing_backup_fails_without_touching_file() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("subject.txt");
		fs::write(&path, "content\n").unwrap();
		let settings = settings_for(&dir);

		let def = ReplaceDef::new(&path, Vec::new());
		assert!(RegexEngine.undo_file(&def, &settings).is_err());
		assert_eq!(fs::read_to_string(&path).unwrap(), "content\n");
	}

	#[test_log::test]
	fn test_binary_files_skipped() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("blob.bin");
		fs::write(&path, b"one\x00two").unwrap();

		let criteria = RunCriteria::search(dir.path(), "one");
		let result = RegexEngine
			.search_file(&path, &criteria, &settings_for(&dir), &PauseCancelToken::none())
			.unwrap();
		assert!(result.is_none());
	}
}
