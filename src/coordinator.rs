//! The coordination layer: owns the operation state machine, the worker
//! thread that executes runs, the progress publish cadence, and the undo
//! ledger. Front ends submit runs through [`Coordinator`] and observe
//! them through its event channel and snapshot accessors.
//!
//! Submission is synchronous and validates everything up front; a
//! rejected run leaves the coordinator untouched. Accepted runs execute
//! on a dedicated worker thread, one at a time.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::criteria::{Operation, RunCriteria};
use crate::engines::{is_read_only, FileEnumerator, RegexEngine, SearchEngine, WalkEnumerator};
use crate::error::{EngineError, SweepError, SweepResult};
use crate::ledger::{ReplaceDef, UndoLedger};
use crate::matches::FileResult;
use crate::progress::{ProgressEvent, ProgressAggregator, StatusSnapshot};
use crate::settings::SweepSettings;
use crate::token::{PauseCancelSource, PauseCancelToken};

/// Which operation currently holds the single active slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OperationState {
	#[default]
	Idle,
	Searching,
	SearchingInResults,
	Replacing,
}

impl std::fmt::Display for OperationState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OperationState::Idle => write!(f, "idle"),
			OperationState::Searching => write!(f, "searching"),
			OperationState::SearchingInResults => write!(f, "searching in results"),
			OperationState::Replacing => write!(f, "replacing"),
		}
	}
}

/// How a run ended. Cancellation takes precedence: a canceled run reports
/// [`RunOutcome::Canceled`] even when partial results or a late failure
/// are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
	Completed {
		processed_files: usize,
		successful_files: usize,
		total_matches: usize,
		duration: Duration,
	},
	Canceled {
		processed_files: usize,
		successful_files: usize,
		total_matches: usize,
	},
	Failed {
		reason: String,
	},
}

/// Notifications streamed to front ends over the event channel.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
	Started(Operation),
	/// Throttled status, published on the configured cadence and flushed
	/// once more at run completion
	Status(StatusSnapshot),
	/// New results, forwarded as soon as a file finishes
	ResultsAdded(Vec<FileResult>),
	Completed {
		operation: Operation,
		outcome: RunOutcome,
	},
	UndoCompleted {
		files: usize,
	},
	UndoFailed {
		reason: String,
	},
}

#[derive(Debug, Default)]
struct StateInner {
	operation: OperationState,
	/// Pattern that produced the current result sink contents; replace
	/// enablement compares against it
	results_pattern: Option<String>,
	/// Pause/cancel source of the run in flight
	source: Option<Arc<PauseCancelSource>>,
}

struct Shared {
	settings: SweepSettings,
	state: Mutex<StateInner>,
	aggregator: ProgressAggregator,
	ledger: Mutex<UndoLedger>,
}

enum Command {
	Search {
		criteria: RunCriteria,
	},
	SearchInResults {
		criteria: RunCriteria,
		files: Vec<PathBuf>,
	},
	Replace {
		criteria: RunCriteria,
		defs: Vec<ReplaceDef>,
	},
	Undo {
		defs: Vec<ReplaceDef>,
	},
	Shutdown,
}

/// Handle to the coordination layer. Dropping it shuts the worker down.
pub struct Coordinator {
	shared: Arc<Shared>,
	engine: Arc<dyn SearchEngine>,
	commands: Sender<Command>,
	events: Receiver<CoordinatorEvent>,
	worker: Option<JoinHandle<()>>,
}

impl Coordinator {
	pub fn start(
		settings: SweepSettings,
		enumerator: Arc<dyn FileEnumerator>,
		engine: Arc<dyn SearchEngine>,
	) -> Self {
		let (commands, command_rx) = async_channel::unbounded();
		let (event_tx, events) = async_channel::unbounded();
		let shared = Arc::new(Shared {
			settings,
			state: Mutex::new(StateInner::default()),
			aggregator: ProgressAggregator::new(),
			ledger: Mutex::new(UndoLedger::new()),
		});
		let worker = Worker {
			shared: shared.clone(),
			enumerator,
			engine: engine.clone(),
			events: event_tx,
		};
		let handle = std::thread::spawn(move || {
			futures_lite::future::block_on(worker.run_loop(command_rx));
		});
		Coordinator {
			shared,
			engine,
			commands,
			events,
			worker: Some(handle),
		}
	}

	/// Coordinator over the built-in walkdir enumerator and regex engine.
	pub fn with_defaults(settings: SweepSettings) -> Self {
		Self::start(settings, Arc::new(WalkEnumerator), Arc::new(RegexEngine))
	}

	/// Submit a fresh search. Clears the result sink and the undo ledger.
	pub fn start_search(&self, mut criteria: RunCriteria) -> SweepResult<()> {
		criteria.operation = Operation::Search;
		criteria.validate_root()?;
		self.validate(&criteria)?;
		self.begin(OperationState::Searching, &criteria, true)?;
		self.send(Command::Search { criteria })
	}

	/// Submit a search over the files of the current result set.
	pub fn start_search_in_results(&self, mut criteria: RunCriteria) -> SweepResult<()> {
		criteria.operation = Operation::SearchInResults;
		self.validate(&criteria)?;
		let mut files: Vec<PathBuf> = Vec::new();
		for result in self.shared.aggregator.results() {
			if !result.is_success() {
				continue;
			}
			let path = result.real_path().to_path_buf();
			if !files.contains(&path) {
				files.push(path);
			}
		}
		if files.is_empty() {
			return Err(SweepError::Config(
				"no previous results to search within".to_string(),
			));
		}
		self.begin(OperationState::SearchingInResults, &criteria, true)?;
		self.send(Command::SearchInResults { criteria, files })
	}

	/// Submit a replace over the flagged matches of the current result
	/// set. Files already in the ledger and read-only files are skipped;
	/// if nothing eligible remains the submission is rejected.
	pub fn start_replace(&self, mut criteria: RunCriteria) -> SweepResult<()> {
		criteria.operation = Operation::Replace;
		self.validate(&criteria)?;
		if criteria.replace_with.is_none() {
			return Err(SweepError::Config("replacement text is required".to_string()));
		}

		let mut defs = Vec::new();
		{
			let ledger = self
				.shared
				.ledger
				.lock()
				.map_err(|_| SweepError::Config("ledger lock poisoned".to_string()))?;
			for result in self.shared.aggregator.results() {
				if !result.is_success() || !result.has_flagged_matches() {
					continue;
				}
				let path = result.real_path();
				if ledger.contains(path) {
					debug!("replace: skipping {} (already replaced)", path.display());
					continue;
				}
				if result.read_only || is_read_only(path) {
					warn!("replace: skipping read-only file {}", path.display());
					continue;
				}
				defs.push(ReplaceDef::new(path, result.matches.clone()));
			}
		}
		if defs.is_empty() {
			return Err(SweepError::NothingToReplace);
		}

		self.begin(OperationState::Replacing, &criteria, false)?;
		self.send(Command::Replace { criteria, defs })
	}

	/// Revert every file recorded in the undo ledger. On success the
	/// ledger is cleared; on failure it is preserved so the revert can be
	/// retried.
	pub fn undo(&self) -> SweepResult<()> {
		{
			let state = self
				.shared
				.state
				.lock()
				.map_err(|_| SweepError::Config("state lock poisoned".to_string()))?;
			if state.operation != OperationState::Idle {
				return Err(SweepError::Busy {
					state: state.operation.to_string(),
				});
			}
		}
		let defs: Vec<ReplaceDef> = self
			.shared
			.ledger
			.lock()
			.map(|ledger| ledger.entries().to_vec())
			.unwrap_or_default();
		if defs.is_empty() {
			return Err(SweepError::Config("nothing to undo".to_string()));
		}
		self.send(Command::Undo { defs })
	}

	/// Request cancellation of the run in flight. Idempotent; a no-op
	/// when nothing is running.
	pub fn cancel(&self) {
		if let Some(source) = self.current_source() {
			info!("cancel requested");
			source.cancel();
		}
	}

	/// Suspend the run in flight at its next checkpoint.
	pub fn pause(&self) {
		if let Some(source) = self.current_source() {
			info!("pause requested");
			source.pause();
		}
	}

	pub fn resume(&self) {
		if let Some(source) = self.current_source() {
			info!("resume requested");
			source.resume();
		}
	}

	pub fn state(&self) -> OperationState {
		self.shared
			.state
			.lock()
			.map(|state| state.operation)
			.unwrap_or_default()
	}

	/// Latest published status (throttled view).
	pub fn status(&self) -> StatusSnapshot {
		self.shared.aggregator.snapshot()
	}

	/// Copy of the result sink, in delivery order.
	pub fn results(&self) -> Vec<FileResult> {
		self.shared.aggregator.results()
	}

	pub fn can_search(&self) -> bool {
		self.state() == OperationState::Idle
	}

	pub fn can_cancel(&self) -> bool {
		self.state() != OperationState::Idle
	}

	pub fn can_undo(&self) -> bool {
		self.state() == OperationState::Idle
			&& self
				.shared
				.ledger
				.lock()
				.map(|ledger| !ledger.is_empty())
				.unwrap_or(false)
	}

	/// Replace is enabled only while idle, only when the given pattern is
	/// the one that produced the current results, and only when a
	/// writable file with a flagged match remains.
	pub fn can_replace(&self, pattern: &str) -> bool {
		if self.state() != OperationState::Idle {
			return false;
		}
		let pattern_matches = self
			.shared
			.state
			.lock()
			.map(|state| state.results_pattern.as_deref() == Some(pattern))
			.unwrap_or(false);
		if !pattern_matches {
			return false;
		}
		self.shared
			.aggregator
			.results()
			.iter()
			.any(|r| r.is_success() && r.has_flagged_matches() && !r.read_only)
	}

	/// Clone of the event stream. Each event is delivered to exactly one
	/// receiver, so a front end should drain from a single place.
	pub fn events(&self) -> Receiver<CoordinatorEvent> {
		self.events.clone()
	}

	/// Block until the next run or undo finishes, discarding progress
	/// events along the way. Returns `None` if the coordinator shut down.
	pub fn wait_for_completion(&self) -> Option<CoordinatorEvent> {
		while let Ok(event) = self.events.recv_blocking() {
			match event {
				CoordinatorEvent::Completed { .. }
				| CoordinatorEvent::UndoCompleted { .. }
				| CoordinatorEvent::UndoFailed { .. } => return Some(event),
				_ => {}
			}
		}
		None
	}

	fn current_source(&self) -> Option<Arc<PauseCancelSource>> {
		self.shared
			.state
			.lock()
			.ok()
			.and_then(|state| state.source.clone())
	}

	fn validate(&self, criteria: &RunCriteria) -> SweepResult<()> {
		if !self.engine.supports(criteria.pattern_kind) {
			return Err(EngineError::UnsupportedPattern {
				kind: criteria.pattern_kind.to_string(),
			}
			.into());
		}
		criteria.validate_pattern()?;
		criteria.filter.compile()?;
		Ok(())
	}

	/// Take the active slot and arm the aggregator for the run. Fails
	/// with [`SweepError::Busy`] when another operation holds the slot.
	fn begin(
		&self,
		next: OperationState,
		criteria: &RunCriteria,
		fresh_search: bool,
	) -> SweepResult<()> {
		{
			let mut state = self
				.shared
				.state
				.lock()
				.map_err(|_| SweepError::Config("state lock poisoned".to_string()))?;
			if state.operation != OperationState::Idle {
				return Err(SweepError::Busy {
					state: state.operation.to_string(),
				});
			}
			state.operation = next;
			state.source = Some(criteria.source.clone());
			if fresh_search {
				state.results_pattern = Some(criteria.pattern.clone());
			}
		}
		if fresh_search {
			if let Ok(mut ledger) = self.shared.ledger.lock() {
				ledger.clear();
			}
		}
		let stop = criteria
			.flags
			.stop_after_matches
			.or(self.shared.settings.stop_after_matches);
		let pause = criteria
			.flags
			.pause_after_matches
			.or(self.shared.settings.pause_after_matches);
		self.shared.aggregator.reset(
			criteria.operation,
			fresh_search,
			criteria.source.clone(),
			stop,
			pause,
		);
		Ok(())
	}

	fn send(&self, command: Command) -> SweepResult<()> {
		if self.commands.send_blocking(command).is_err() {
			if let Ok(mut state) = self.shared.state.lock() {
				state.operation = OperationState::Idle;
				state.source = None;
			}
			return Err(SweepError::Config(
				"coordinator worker is not running".to_string(),
			));
		}
		Ok(())
	}
}

impl Drop for Coordinator {
	fn drop(&mut self) {
		let _ = self.commands.try_send(Command::Shutdown);
		self.commands.close();
		if let Some(handle) = self.worker.take() {
			let _ = handle.join();
		}
	}
}

/// Run executor living on the coordinator's worker thread. Commands are
/// processed one at a time, which is what enforces the single active
/// operation.
struct Worker {
	shared: Arc<Shared>,
	enumerator: Arc<dyn FileEnumerator>,
	engine: Arc<dyn SearchEngine>,
	events: Sender<CoordinatorEvent>,
}

impl Worker {
	async fn run_loop(self, commands: Receiver<Command>) {
		debug!("coordinator worker started");
		while let Ok(command) = commands.recv().await {
			match command {
				Command::Search { criteria } => self.execute(criteria, None, Vec::new()),
				Command::SearchInResults { criteria, files } => {
					self.execute(criteria, Some(files), Vec::new())
				}
				Command::Replace { criteria, defs } => self.execute(criteria, None, defs),
				Command::Undo { defs } => self.run_undo(defs),
				Command::Shutdown => break,
			}
		}
		debug!("coordinator worker stopped");
	}

	fn execute(&self, criteria: RunCriteria, files: Option<Vec<PathBuf>>, defs: Vec<ReplaceDef>) {
		let operation = criteria.operation;
		info!("run: starting {operation}");
		let _ = self.events.try_send(CoordinatorEvent::Started(operation));
		let started = Instant::now();
		let token = criteria.token();
		let (stop_publisher, publisher) = self.spawn_publisher();

		// An engine panic must not take the worker thread down with the
		// state stuck mid-run; it becomes a failed outcome like any other
		// run-level error
		let run = std::panic::AssertUnwindSafe(|| match operation {
			Operation::Search | Operation::SearchInResults => {
				self.run_search(&criteria, files, &token)
			}
			Operation::Replace => self.run_replace(&criteria, defs, &token),
		});
		let failure = if let Err(e) = self.engine.prepare(&criteria, &self.shared.settings) {
			Some(e.to_string())
		} else {
			match std::panic::catch_unwind(run) {
				Ok(failure) => failure,
				Err(panic) => {
					let reason = panic
						.downcast_ref::<&str>()
						.map(|s| (*s).to_string())
						.or_else(|| panic.downcast_ref::<String>().cloned())
						.unwrap_or_else(|| "engine panicked".to_string());
					error!("run: {operation} panicked: {reason}");
					Some(reason)
				}
			}
		};

		stop_publisher.store(true, Ordering::Relaxed);
		let _ = publisher.join();
		// Final flush so the published status is exact at completion
		let status = self.shared.aggregator.publish();
		let _ = self.events.try_send(CoordinatorEvent::Status(status));

		if let Ok(mut state) = self.shared.state.lock() {
			state.operation = OperationState::Idle;
			state.source = None;
		}

		let outcome = self.build_outcome(&token, failure, started.elapsed());
		info!("run: {operation} finished: {outcome:?}");
		let _ = self
			.events
			.try_send(CoordinatorEvent::Completed { operation, outcome });
	}

	fn build_outcome(
		&self,
		token: &PauseCancelToken,
		failure: Option<String>,
		duration: Duration,
	) -> RunOutcome {
		let (processed_files, successful_files, total_matches) =
			self.shared.aggregator.final_counts();
		if token.is_cancellation_requested() {
			RunOutcome::Canceled {
				processed_files,
				successful_files,
				total_matches,
			}
		} else if let Some(reason) = failure {
			RunOutcome::Failed { reason }
		} else {
			RunOutcome::Completed {
				processed_files,
				successful_files,
				total_matches,
				duration,
			}
		}
	}

	/// Search the given files (or enumerate them first). A non-fatal
	/// per-file error becomes an error entry in the result sink; only an
	/// enumeration failure fails the run.
	fn run_search(
		&self,
		criteria: &RunCriteria,
		files: Option<Vec<PathBuf>>,
		token: &PauseCancelToken,
	) -> Option<String> {
		let files = match files {
			Some(files) => files,
			None => match self.enumerator.enumerate(&criteria.root, &criteria.filter, token) {
				Ok(files) => files,
				Err(e) if e.is_canceled() => return None,
				Err(e) => return Some(e.to_string()),
			},
		};
		debug!("search: {} candidate files", files.len());

		let processed = AtomicUsize::new(0);
		let successful = AtomicUsize::new(0);
		let search_one = |path: &PathBuf| {
			if token.is_cancellation_requested() {
				return;
			}
			let name = path.display().to_string();
			self.shared.aggregator.on_event(ProgressEvent::begin(
				&name,
				processed.load(Ordering::Relaxed),
				successful.load(Ordering::Relaxed),
			));
			let results = match self
				.engine
				.search_file(path, criteria, &self.shared.settings, token)
			{
				Ok(Some(result)) => {
					successful.fetch_add(1, Ordering::Relaxed);
					vec![result]
				}
				Ok(None) => Vec::new(),
				Err(e) if e.is_canceled() => {
					// Pop the in-flight entry without counting the file
					self.shared.aggregator.on_event(ProgressEvent::end(
						&name,
						processed.load(Ordering::Relaxed),
						successful.load(Ordering::Relaxed),
						Vec::new(),
					));
					return;
				}
				Err(e) => {
					warn!("search: {} failed: {}", path.display(), e);
					vec![FileResult::error(path, e.to_string())]
				}
			};
			let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
			if results.iter().any(|r| r.is_success()) {
				let _ = self
					.events
					.try_send(CoordinatorEvent::ResultsAdded(results.clone()));
			}
			self.shared.aggregator.on_event(ProgressEvent::end(
				&name,
				done,
				successful.load(Ordering::Relaxed),
				results,
			));
		};

		if criteria.parallel {
			files.par_iter().for_each(search_one);
		} else {
			for path in &files {
				if token.is_cancellation_requested() {
					break;
				}
				search_one(path);
			}
		}
		None
	}

	/// Rewrite the eligible files one at a time. Each file lands in the
	/// ledger as soon as its rewrite succeeds, so an interruption still
	/// leaves everything done so far revertible.
	fn run_replace(
		&self,
		criteria: &RunCriteria,
		defs: Vec<ReplaceDef>,
		token: &PauseCancelToken,
	) -> Option<String> {
		debug!("replace: {} eligible files", defs.len());
		let mut processed = 0usize;
		let mut successful = 0usize;
		for def in defs {
			if token.is_cancellation_requested() {
				break;
			}
			let name = def.original_file.display().to_string();
			self.shared
				.aggregator
				.on_event(ProgressEvent::begin(&name, processed, successful));
			match self
				.engine
				.replace_file(&def, criteria, &self.shared.settings, token)
			{
				Ok(()) => {
					processed += 1;
					successful += 1;
					if let Ok(mut ledger) = self.shared.ledger.lock() {
						ledger.append(def);
					}
					self.shared.aggregator.on_event(ProgressEvent::end(
						&name,
						processed,
						successful,
						Vec::new(),
					));
				}
				Err(e) if e.is_canceled() => {
					self.shared.aggregator.on_event(ProgressEvent::end(
						&name,
						processed,
						successful,
						Vec::new(),
					));
					break;
				}
				Err(e) => {
					warn!("replace: {} failed: {}", def.original_file.display(), e);
					self.shared.aggregator.on_event(ProgressEvent::end(
						&name,
						processed,
						successful,
						Vec::new(),
					));
					return Some(e.to_string());
				}
			}
		}
		None
	}

	/// Revert the ledgered files. The ledger is cleared only when every
	/// file restores; a failure leaves it intact for a retry.
	fn run_undo(&self, defs: Vec<ReplaceDef>) {
		info!("undo: reverting {} files", defs.len());
		let mut restored = 0usize;
		for def in &defs {
			match self.engine.undo_file(def, &self.shared.settings) {
				Ok(()) => restored += 1,
				Err(e) => {
					warn!("undo: {} failed: {}", def.original_file.display(), e);
					let _ = self.events.try_send(CoordinatorEvent::UndoFailed {
						reason: e.to_string(),
					});
					return;
				}
			}
		}
		if let Ok(mut ledger) = self.shared.ledger.lock() {
			ledger.clear();
		}
		let _ = self
			.events
			.try_send(CoordinatorEvent::UndoCompleted { files: restored });
	}

	fn spawn_publisher(&self) -> (Arc<AtomicBool>, JoinHandle<()>) {
		let stop = Arc::new(AtomicBool::new(false));
		let stop_flag = stop.clone();
		let shared = self.shared.clone();
		let events = self.events.clone();
		let handle = std::thread::spawn(move || {
			while !stop_flag.load(Ordering::Relaxed) {
				std::thread::sleep(shared.settings.status_publish_interval);
				if stop_flag.load(Ordering::Relaxed) {
					break;
				}
				let status = shared.aggregator.publish();
				let _ = events.try_send(CoordinatorEvent::Status(status));
			}
		});
		(stop, handle)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::criteria::{FileFilter, PatternKind};
	use crate::error::EngineResult;
	use std::fs;
	use std::path::Path;
	use tempfile::TempDir;

	struct PanickingEngine;

	impl SearchEngine for PanickingEngine {
		fn supports(&self, _kind: PatternKind) -> bool {
			true
		}

		fn search_file(
			&self,
			path: &Path,
			_criteria: &RunCriteria,
			_settings: &SweepSettings,
			_token: &PauseCancelToken,
		) -> EngineResult<Option<FileResult>> {
			panic!("engine blew up on {}", path.display());
		}

		fn replace_file(
			&self,
			_def: &ReplaceDef,
			_criteria: &RunCriteria,
			_settings: &SweepSettings,
			_token: &PauseCancelToken,
		) -> EngineResult<()> {
			panic!("engine blew up");
		}

		fn undo_file(&self, _def: &ReplaceDef, _settings: &SweepSettings) -> EngineResult<()> {
			Ok(())
		}
	}

	fn fixture() -> TempDir {
		let dir = TempDir::new().unwrap();
		fs::write(dir.path().join("alpha.txt"), "one two one\n").unwrap();
		fs::write(dir.path().join("beta.txt"), "two one\n").unwrap();
		fs::write(dir.path().join("gamma.txt"), "nothing here\n").unwrap();
		dir
	}

	fn coordinator(dir: &TempDir) -> Coordinator {
		let settings = SweepSettings::default().with_undo_dir(dir.path().join("undo"));
		let settings = SweepSettings {
			status_publish_interval: Duration::from_millis(10),
			..settings
		};
		Coordinator::with_defaults(settings)
	}

	#[test_log::test]
	fn test_search_collects_results_and_returns_to_idle() {
		let dir = fixture();
		let coord = coordinator(&dir);

		coord.start_search(RunCriteria::search(dir.path(), "one")).unwrap();
		let event = coord.wait_for_completion().unwrap();

		let CoordinatorEvent::Completed { operation, outcome } = event else {
			panic!("expected completion, got {event:?}");
		};
		assert_eq!(operation, Operation::Search);
		let RunOutcome::Completed {
			processed_files,
			successful_files,
			total_matches,
			..
		} = outcome
		else {
			panic!("expected completed outcome, got {outcome:?}");
		};
		assert_eq!(processed_files, 3);
		assert_eq!(successful_files, 2);
		assert_eq!(total_matches, 3);

		assert_eq!(coord.state(), OperationState::Idle);
		assert_eq!(coord.results().len(), 2);
		assert!(coord.can_search());
		assert!(coord.can_replace("one"));
		assert!(!coord.can_replace("two"));
		assert!(!coord.can_undo());
	}

	#[test_log::test]
	fn test_second_submission_refused_while_running() {
		let dir = fixture();
		let coord = coordinator(&dir);

		// Pause before submitting so the run parks at its first checkpoint
		let source = Arc::new(PauseCancelSource::new());
		source.pause();
		let criteria = RunCriteria::search(dir.path(), "one").with_source(source.clone());
		coord.start_search(criteria).unwrap();

		assert!(coord.can_cancel());
		assert!(matches!(
			coord.start_search(RunCriteria::search(dir.path(), "two")),
			Err(SweepError::Busy { .. })
		));
		assert!(matches!(coord.undo(), Err(SweepError::Busy { .. })));

		source.resume();
		coord.wait_for_completion().unwrap();
		assert_eq!(coord.state(), OperationState::Idle);
	}

	#[test_log::test]
	fn test_cancel_yields_canceled_outcome() {
		let dir = fixture();
		let coord = coordinator(&dir);

		let source = Arc::new(PauseCancelSource::new());
		source.pause();
		coord
			.start_search(RunCriteria::search(dir.path(), "one").with_source(source))
			.unwrap();
		coord.cancel();

		let event = coord.wait_for_completion().unwrap();
		let CoordinatorEvent::Completed { outcome, .. } = event else {
			panic!("expected completion, got {event:?}");
		};
		assert!(matches!(outcome, RunOutcome::Canceled { .. }));
		// A canceled run releases the slot like any other
		assert!(coord.can_search());
	}

	#[test_log::test]
	fn test_engine_panic_fails_run_and_keeps_worker_alive() {
		let dir = fixture();
		let settings = SweepSettings {
			status_publish_interval: Duration::from_millis(10),
			..SweepSettings::default().with_undo_dir(dir.path().join("undo"))
		};
		let coord =
			Coordinator::start(settings, Arc::new(WalkEnumerator), Arc::new(PanickingEngine));

		coord.start_search(RunCriteria::search(dir.path(), "one")).unwrap();
		let event = coord.wait_for_completion().unwrap();
		let CoordinatorEvent::Completed { outcome, .. } = event else {
			panic!("expected completion, got {event:?}");
		};
		assert!(matches!(outcome, RunOutcome::Failed { .. }));
		assert_eq!(coord.state(), OperationState::Idle);

		// The worker loop survives the panic and still accepts runs
		coord.start_search(RunCriteria::search(dir.path(), "one")).unwrap();
		let event = coord.wait_for_completion().unwrap();
		assert!(matches!(
			event,
			CoordinatorEvent::Completed {
				outcome: RunOutcome::Failed { .. },
				..
			}
		));
	}

	#[test_log::test]
	fn test_replace_fails_cleanly_when_files_changed_after_search() {
		let dir = fixture();
		let coord = coordinator(&dir);

		coord.start_search(RunCriteria::search(dir.path(), "one")).unwrap();
		coord.wait_for_completion().unwrap();

		// Multibyte rewrites put the recorded offsets inside character
		// boundaries
		fs::write(dir.path().join("alpha.txt"), "ééééé\n").unwrap();
		fs::write(dir.path().join("beta.txt"), "ééééé\n").unwrap();

		coord
			.start_replace(RunCriteria::replace(dir.path(), "one", "1"))
			.unwrap();
		let event = coord.wait_for_completion().unwrap();
		let CoordinatorEvent::Completed { outcome, .. } = event else {
			panic!("expected completion, got {event:?}");
		};
		assert!(matches!(outcome, RunOutcome::Failed { .. }));
		assert_eq!(coord.state(), OperationState::Idle);
		assert_eq!(
			fs::read_to_string(dir.path().join("alpha.txt")).unwrap(),
			"ééééé\n"
		);
		assert_eq!(
			fs::read_to_string(dir.path().join("beta.txt")).unwrap(),
			"ééééé\n"
		);
	}

	#[test_log::test]
	fn test_search_with_no_candidate_files_reports_zero_status() {
		let dir = fixture();
		let coord = coordinator(&dir);

		let filter = FileFilter {
			include: vec!["*.nomatch".to_string()],
			..FileFilter::default()
		};
		coord
			.start_search(RunCriteria::search(dir.path(), "one").with_filter(filter))
			.unwrap();
		let event = coord.wait_for_completion().unwrap();
		assert!(matches!(
			event,
			CoordinatorEvent::Completed {
				outcome: RunOutcome::Completed {
					processed_files: 0,
					..
				},
				..
			}
		));
		assert_eq!(
			coord.status().status_text,
			"Searched 0 files. Found 0 matches in 0 files."
		);
	}

	#[test_log::test]
	fn test_replace_then_undo_round_trip() {
		let dir = fixture();
		let coord = coordinator(&dir);

		coord.start_search(RunCriteria::search(dir.path(), "one")).unwrap();
		coord.wait_for_completion().unwrap();

		coord
			.start_replace(RunCriteria::replace(dir.path(), "one", "1"))
			.unwrap();
		let event = coord.wait_for_completion().unwrap();
		assert!(matches!(
			event,
			CoordinatorEvent::Completed {
				operation: Operation::Replace,
				outcome: RunOutcome::Completed { .. },
			}
		));
		assert_eq!(
			fs::read_to_string(dir.path().join("alpha.txt")).unwrap(),
			"1 two 1\n"
		);
		assert!(coord.can_undo());

		coord.undo().unwrap();
		let event = coord.wait_for_completion().unwrap();
		assert!(matches!(event, CoordinatorEvent::UndoCompleted { files: 2 }));
		assert_eq!(
			fs::read_to_string(dir.path().join("alpha.txt")).unwrap(),
			"one two one\n"
		);
		assert!(!coord.can_undo());
	}

	#[test_log::test]
	fn test_replaced_files_not_replaced_twice() {
		let dir = fixture();
		let coord = coordinator(&dir);

		coord.start_search(RunCriteria::search(dir.path(), "one")).unwrap();
		coord.wait_for_completion().unwrap();
		coord
			.start_replace(RunCriteria::replace(dir.path(), "one", "1"))
			.unwrap();
		coord.wait_for_completion().unwrap();

		// Every result file is now in the ledger; nothing is eligible
		assert!(matches!(
			coord.start_replace(RunCriteria::replace(dir.path(), "one", "1")),
			Err(SweepError::NothingToReplace)
		));
	}

	#[test_log::test]
	fn test_fresh_search_clears_ledger_and_results() {
		let dir = fixture();
		let coord = coordinator(&dir);

		coord.start_search(RunCriteria::search(dir.path(), "one")).unwrap();
		coord.wait_for_completion().unwrap();
		coord
			.start_replace(RunCriteria::replace(dir.path(), "one", "1"))
			.unwrap();
		coord.wait_for_completion().unwrap();
		assert!(coord.can_undo());

		coord.start_search(RunCriteria::search(dir.path(), "two")).unwrap();
		coord.wait_for_completion().unwrap();
		assert!(!coord.can_undo());
		assert!(coord.can_replace("two"));
		assert!(!coord.can_replace("one"));
	}

	#[test_log::test]
	fn test_failed_undo_preserves_ledger() {
		let dir = fixture();
		let coord = coordinator(&dir);

		coord.start_search(RunCriteria::search(dir.path(), "one")).unwrap();
		coord.wait_for_completion().unwrap();
		coord
			.start_replace(RunCriteria::replace(dir.path(), "one", "1"))
			.unwrap();
		coord.wait_for_completion().unwrap();

		// Destroy the backups so the revert cannot succeed
		fs::remove_dir_all(dir.path().join("undo")).unwrap();
		coord.undo().unwrap();
		let event = coord.wait_for_completion().unwrap();
		assert!(matches!(event, CoordinatorEvent::UndoFailed { .. }));
		// Ledger intact: the revert can be retried
		assert!(coord.can_undo());
	}

	#[test_log::test]
	fn test_validation_rejects_without_state_change() {
		let dir = fixture();
		let coord = coordinator(&dir);

		let bad = RunCriteria::search(dir.path(), "a(bc").with_pattern_kind(PatternKind::Regex);
		assert!(matches!(
			coord.start_search(bad),
			Err(SweepError::InvalidPattern { .. })
		));
		assert_eq!(coord.state(), OperationState::Idle);

		let missing = RunCriteria::search(dir.path().join("no-such-dir"), "one");
		assert!(matches!(
			coord.start_search(missing),
			Err(SweepError::InvalidRoot { .. })
		));

		let unsupported =
			RunCriteria::search(dir.path(), "//node").with_pattern_kind(PatternKind::XPath);
		assert!(coord.start_search(unsupported).is_err());
		assert!(coord.can_search());
	}

	#[test_log::test]
	fn test_search_in_results_narrows_the_set() {
		let dir = fixture();
		let coord = coordinator(&dir);

		coord.start_search(RunCriteria::search(dir.path(), "one")).unwrap();
		coord.wait_for_completion().unwrap();
		assert_eq!(coord.results().len(), 2);

		// Only alpha.txt contains both patterns
		coord
			.start_search_in_results(RunCriteria::search(dir.path(), "one two"))
			.unwrap();
		coord.wait_for_completion().unwrap();
		assert_eq!(coord.results().len(), 1);
		assert!(coord.results()[0].path.ends_with("alpha.txt"));
	}

	#[test_log::test]
	fn test_search_in_results_requires_results() {
		let dir = fixture();
		let coord = coordinator(&dir);
		assert!(matches!(
			coord.start_search_in_results(RunCriteria::search(dir.path(), "one")),
			Err(SweepError::Config(_))
		));
	}

	#[test_log::test]
	fn test_parallel_search_matches_serial() {
		let dir = fixture();
		let coord = coordinator(&dir);

		coord
			.start_search(RunCriteria::search(dir.path(), "one").with_parallel(true))
			.unwrap();
		let event = coord.wait_for_completion().unwrap();
		let CoordinatorEvent::Completed { outcome, .. } = event else {
			panic!("expected completion, got {event:?}");
		};
		assert!(matches!(
			outcome,
			RunOutcome::Completed {
				successful_files: 2,
				total_matches: 3,
				..
			}
		));
	}

	#[test_log::test]
	fn test_search_with_no_matches_completes_empty() {
		let dir = fixture();
		let coord = coordinator(&dir);

		coord.start_search(RunCriteria::search(dir.path(), "absent")).unwrap();
		let event = coord.wait_for_completion().unwrap();
		let CoordinatorEvent::Completed { outcome, .. } = event else {
			panic!("expected completion, got {event:?}");
		};
		assert!(matches!(
			outcome,
			RunOutcome::Completed {
				successful_files: 0,
				total_matches: 0,
				..
			}
		));
		assert!(coord.results().is_empty());
		assert!(!coord.can_replace("absent"));
	}

	#[test_log::test]
	fn test_pause_resume_yields_same_counts_as_uninterrupted() {
		let dir = fixture();
		let coord = coordinator(&dir);

		coord.start_search(RunCriteria::search(dir.path(), "one")).unwrap();
		coord.wait_for_completion().unwrap();
		let baseline = coord.status();

		let source = Arc::new(PauseCancelSource::new());
		source.pause();
		coord
			.start_search(RunCriteria::search(dir.path(), "one").with_source(source.clone()))
			.unwrap();
		source.resume();
		coord.wait_for_completion().unwrap();

		let resumed = coord.status();
		assert_eq!(resumed.processed_files, baseline.processed_files);
		assert_eq!(resumed.successful_files, baseline.successful_files);
		assert_eq!(resumed.total_matches, baseline.total_matches);
	}

	#[cfg(unix)]
	#[test_log::test]
	fn test_replace_skips_read_only_files() {
		use std::os::unix::fs::PermissionsExt;

		let dir = fixture();
		let locked = dir.path().join("beta.txt");
		fs::set_permissions(&locked, fs::Permissions::from_mode(0o444)).unwrap();
		let coord = coordinator(&dir);

		coord.start_search(RunCriteria::search(dir.path(), "one")).unwrap();
		coord.wait_for_completion().unwrap();
		coord
			.start_replace(RunCriteria::replace(dir.path(), "one", "1"))
			.unwrap();
		coord.wait_for_completion().unwrap();

		assert_eq!(fs::read_to_string(&locked).unwrap(), "two one\n");
		assert_eq!(
			fs::read_to_string(dir.path().join("alpha.txt")).unwrap(),
			"1 two 1\n"
		);
		// Only the writable file is in the ledger
		coord.undo().unwrap();
		let event = coord.wait_for_completion().unwrap();
		assert!(matches!(event, CoordinatorEvent::UndoCompleted { files: 1 }));

		fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
	}

	#[test_log::test]
	fn test_auto_stop_cancels_run() {
		let dir = TempDir::new().unwrap();
		for i in 0..20 {
			fs::write(dir.path().join(format!("f{i:02}.txt")), "one\n").unwrap();
		}
		let coord = coordinator(&dir);

		let mut criteria = RunCriteria::search(dir.path(), "one");
		criteria.flags.stop_after_matches = Some(3);
		coord.start_search(criteria).unwrap();

		let event = coord.wait_for_completion().unwrap();
		let CoordinatorEvent::Completed { outcome, .. } = event else {
			panic!("expected completion, got {event:?}");
		};
		let RunOutcome::Canceled {
			successful_files, ..
		} = outcome
		else {
			panic!("expected canceled outcome, got {outcome:?}");
		};
		// Threshold reached, remainder never searched
		assert!(successful_files >= 3);
		assert!(successful_files < 20);
	}
}
