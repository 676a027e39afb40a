//! Progress aggregation: collapses the high-frequency per-file event
//! stream into a throttled, eventually consistent status display and an
//! ordered result sink.
//!
//! Engines may process files on several worker threads at once, so all
//! state here sits behind locks. The in-flight-file/counter state and the
//! result sink use separate locks on purpose: both are written from
//! different worker threads and must not serialize each other.

use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

use crate::criteria::Operation;
use crate::matches::FileResult;
use crate::token::PauseCancelSource;

/// One unit of streamed progress from the matching engine.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
	/// True when a file's processing begins, false when it ends
	pub begin: bool,
	pub file_name: String,
	/// Files processed so far, as counted by the producer
	pub processed_files: usize,
	/// Files with at least one match so far
	pub successful_files: usize,
	/// Newly produced results, non-empty only on end events
	pub results: Vec<FileResult>,
}

impl ProgressEvent {
	pub fn begin(file_name: impl Into<String>, processed: usize, successful: usize) -> Self {
		ProgressEvent {
			begin: true,
			file_name: file_name.into(),
			processed_files: processed,
			successful_files: successful,
			results: Vec::new(),
		}
	}

	pub fn end(
		file_name: impl Into<String>,
		processed: usize,
		successful: usize,
		results: Vec<FileResult>,
	) -> Self {
		ProgressEvent {
			begin: false,
			file_name: file_name.into(),
			processed_files: processed,
			successful_files: successful,
			results,
		}
	}
}

/// Externally observable, eventually consistent run status. Intermediate
/// values may be skipped; the value after the final flush is exact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
	pub status_text: String,
	pub processed_files: usize,
	pub successful_files: usize,
	pub total_matches: usize,
	/// Representative in-flight file: the most recently begun file that is
	/// still running
	pub current_file: Option<String>,
}

#[derive(Debug, Default)]
struct InflightState {
	/// Insertion-ordered names of files currently being processed
	running: Vec<String>,
	processed_files: usize,
	successful_files: usize,
	total_matches: usize,
	/// Status recomputed on every event, published on cadence
	pending: StatusSnapshot,
	/// Auto-pause fires at most once per run so resuming does not
	/// immediately re-pause
	pause_fired: bool,
	operation: Operation,
}

/// Thread-safe aggregator shared between engine worker threads and the
/// coordinator's publish loop.
pub struct ProgressAggregator {
	inflight: Mutex<InflightState>,
	sink: Mutex<Vec<FileResult>>,
	published: Mutex<StatusSnapshot>,
	policy: Mutex<AutoPolicy>,
}

/// Per-run auto-stop/auto-pause arming. The source is the one driving the
/// current run; crossing the stop threshold cancels through it, crossing
/// the pause threshold pauses through it.
#[derive(Debug, Default)]
struct AutoPolicy {
	source: Option<Arc<PauseCancelSource>>,
	stop_after: Option<usize>,
	pause_after: Option<usize>,
}

impl Default for ProgressAggregator {
	fn default() -> Self {
		Self::new()
	}
}

impl ProgressAggregator {
	pub fn new() -> Self {
		ProgressAggregator {
			inflight: Mutex::new(InflightState {
				operation: Operation::Search,
				..InflightState::default()
			}),
			sink: Mutex::new(Vec::new()),
			published: Mutex::new(StatusSnapshot::default()),
			policy: Mutex::new(AutoPolicy::default()),
		}
	}

	/// Reset all accumulated state for a new run and arm the auto
	/// policies against its pause/cancel source. The result sink is
	/// cleared only for search operations; replace runs keep the current
	/// result set visible.
	pub fn reset(
		&self,
		operation: Operation,
		clear_sink: bool,
		source: Arc<PauseCancelSource>,
		stop_after: Option<usize>,
		pause_after: Option<usize>,
	) {
		if let Ok(mut state) = self.inflight.lock() {
			*state = InflightState {
				operation,
				..InflightState::default()
			};
			// Seed the pending status so a run that never emits an event
			// still publishes its zero counts at the final flush
			let status_text = Self::format_status(&state);
			state.pending.status_text = status_text;
		}
		if clear_sink {
			if let Ok(mut sink) = self.sink.lock() {
				sink.clear();
			}
		}
		if let Ok(mut published) = self.published.lock() {
			*published = StatusSnapshot::default();
		}
		if let Ok(mut policy) = self.policy.lock() {
			*policy = AutoPolicy {
				source: Some(source),
				stop_after,
				pause_after,
			};
		}
	}

	/// Consume one event: update counters and the in-flight set, append
	/// results to the sink immediately, recompute the pending status, and
	/// apply the auto-stop/auto-pause policy.
	pub fn on_event(&self, event: ProgressEvent) {
		let new_matches: usize = event.results.iter().map(|r| r.matches.len()).sum();
		if !event.results.is_empty() {
			if let Ok(mut sink) = self.sink.lock() {
				sink.extend(event.results.iter().cloned());
			}
		}

		let successful_now;
		{
			let Ok(mut state) = self.inflight.lock() else {
				return;
			};
			if event.begin {
				trace!("progress: begin {}", event.file_name);
				state.running.push(event.file_name.clone());
			} else {
				trace!("progress: end {}", event.file_name);
				if let Some(pos) = state.running.iter().position(|n| n == &event.file_name) {
					state.running.remove(pos);
				}
			}
			// Counts arrive from concurrent producers; never step backwards
			state.processed_files = state.processed_files.max(event.processed_files);
			state.successful_files = state.successful_files.max(event.successful_files);
			state.total_matches += new_matches;

			state.pending = StatusSnapshot {
				status_text: Self::format_status(&state),
				processed_files: state.processed_files,
				successful_files: state.successful_files,
				total_matches: state.total_matches,
				current_file: state.running.last().cloned(),
			};
			successful_now = state.successful_files;

			if let Ok(policy) = self.policy.lock() {
				if let (Some(pause_after), Some(source)) = (policy.pause_after, &policy.source) {
					if !state.pause_fired && successful_now >= pause_after {
						state.pause_fired = true;
						debug!("progress: auto-pause after {} matching files", successful_now);
						source.pause();
					}
				}
			}
		}

		if let Ok(policy) = self.policy.lock() {
			if let (Some(stop_after), Some(source)) = (policy.stop_after, &policy.source) {
				if successful_now >= stop_after && !source.is_cancellation_requested() {
					debug!("progress: auto-stop after {} matching files", successful_now);
					source.cancel();
				}
			}
		}
	}

	fn format_status(state: &InflightState) -> String {
		match state.operation {
			Operation::Search | Operation::SearchInResults => format!(
				"Searched {} files. Found {} matches in {} files.",
				state.processed_files, state.total_matches, state.successful_files
			),
			Operation::Replace => format!(
				"Processed {} files. Replaced in {} files.",
				state.processed_files, state.successful_files
			),
		}
	}

	/// Publish the pending status to the observable snapshot. Called on a
	/// fixed cadence by the coordinator's timer, decoupling producer rate
	/// from consumer rate, and once more at completion as the final flush.
	pub fn publish(&self) -> StatusSnapshot {
		let pending = self
			.inflight
			.lock()
			.map(|state| state.pending.clone())
			.unwrap_or_default();
		if let Ok(mut published) = self.published.lock() {
			*published = pending.clone();
		}
		pending
	}

	/// Latest published status (throttled view).
	pub fn snapshot(&self) -> StatusSnapshot {
		self.published
			.lock()
			.map(|published| published.clone())
			.unwrap_or_default()
	}

	/// Copy of the result sink, in delivery order.
	pub fn results(&self) -> Vec<FileResult> {
		self.sink.lock().map(|sink| sink.clone()).unwrap_or_default()
	}

	pub fn result_count(&self) -> usize {
		self.sink.lock().map(|sink| sink.len()).unwrap_or(0)
	}

	/// Exact counters regardless of publish cadence, for run finalization.
	pub fn final_counts(&self) -> (usize, usize, usize) {
		self.inflight
			.lock()
			.map(|state| {
				(
					state.processed_files,
					state.successful_files,
					state.total_matches,
				)
			})
			.unwrap_or((0, 0, 0))
	}
}
