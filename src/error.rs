//! Error types for the search/replace coordination layer

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for run submission and coordination.
///
/// Validation errors are raised before any state transition happens, so a
/// rejected run leaves the coordinator exactly as it was. Runtime failures
/// inside a running worker surface through the run outcome instead; they
/// never unwind through this type.
#[derive(Debug, Error)]
pub enum SweepError {
	/// File system I/O errors including permission issues
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// The search root does not exist or is not a directory
	#[error("Invalid search root: {path}")]
	InvalidRoot { path: PathBuf },

	/// The search pattern does not compile for the selected pattern kind
	#[error("Invalid {kind} pattern '{pattern}': {reason}")]
	InvalidPattern {
		kind: String,
		pattern: String,
		reason: String,
	},

	/// Invalid glob pattern syntax in the file filter
	#[error("Invalid glob pattern '{pattern}': {reason}")]
	InvalidGlobPattern { pattern: String, reason: String },

	/// A run was submitted while another operation is active
	#[error("Operation already in progress: {state}")]
	Busy { state: String },

	/// A replace was requested with no eligible files
	#[error("No writable files with matches flagged for replacement")]
	NothingToReplace,

	/// Configuration validation errors with descriptive messages
	#[error("Configuration error: {0}")]
	Config(String),

	/// Engine-level failure propagated out of a worker
	#[error("Engine error: {0}")]
	Engine(#[from] EngineError),
}

/// Errors raised by matching/replace engines and file enumerators.
#[derive(Debug, Error)]
pub enum EngineError {
	/// The token was canceled; observed at a checkpoint and unwound here.
	/// Not a failure: the worker boundary converts this into the canceled
	/// outcome rather than an error status.
	#[error("Operation was canceled")]
	Canceled,

	#[error("I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		source: std::io::Error,
	},

	#[error("Pattern kind {kind} is not supported by this engine")]
	UnsupportedPattern { kind: String },

	#[error("Engine execution failed: {reason}")]
	ExecutionFailed { reason: String },
}

impl EngineError {
	pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		EngineError::Io {
			path: path.into(),
			source,
		}
	}

	/// True when this error is the cancellation signal rather than a failure.
	pub fn is_canceled(&self) -> bool {
		matches!(self, EngineError::Canceled)
	}
}

/// Convenience type alias for results in the coordination layer.
pub type SweepResult<T> = Result<T, SweepError>;

/// Convenience type alias for engine/enumerator operation results.
pub type EngineResult<T> = Result<T, EngineError>;
