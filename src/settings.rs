//! Run defaults supplied by the settings store. Passed explicitly into the
//! coordinator at construction; nothing in this layer reads configuration
//! ambiently.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSettings {
	/// Context lines captured around each match, handed to engines
	pub context_lines_before: usize,
	pub context_lines_after: usize,
	/// Fuzzy/Soundex match threshold in [0, 1]
	pub fuzzy_match_threshold: f64,
	/// Default auto-stop threshold (successful files), None = disabled
	pub stop_after_matches: Option<usize>,
	/// Default auto-pause threshold (successful files), None = disabled
	pub pause_after_matches: Option<usize>,
	/// Directory where replace backups are written for undo
	pub undo_dir: PathBuf,
	/// Cadence at which the aggregator publishes status text
	pub status_publish_interval: Duration,
}

impl Default for SweepSettings {
	fn default() -> Self {
		SweepSettings {
			context_lines_before: 0,
			context_lines_after: 0,
			fuzzy_match_threshold: 0.5,
			stop_after_matches: None,
			pause_after_matches: None,
			undo_dir: std::env::temp_dir().join("sweep-undo"),
			status_publish_interval: Duration::from_millis(250),
		}
	}
}

impl SweepSettings {
	pub fn with_undo_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.undo_dir = dir.into();
		self
	}

	pub fn with_thresholds(mut self, stop: Option<usize>, pause: Option<usize>) -> Self {
		self.stop_after_matches = stop;
		self.pause_after_matches = pause;
		self
	}
}
