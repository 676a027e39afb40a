//! Coordination layer for long-running, cancellable search and replace
//! over a file corpus.
//!
//! The [`coordinator::Coordinator`] owns the operation state machine and
//! a worker thread; front ends submit [`criteria::RunCriteria`] runs and
//! observe progress through a throttled status snapshot and an event
//! channel. Replacements are revertible through the undo ledger until
//! the next fresh search.

pub mod coordinator;
pub mod criteria;
pub mod engines;
pub mod error;
pub mod ledger;
pub mod matches;
pub mod partition;
pub mod progress;
pub mod settings;
pub mod token;

pub use coordinator::{Coordinator, CoordinatorEvent, OperationState, RunOutcome};
pub use criteria::{FileFilter, Operation, PatternKind, RunCriteria, SearchFlags};
pub use engines::{FileEnumerator, RegexEngine, SearchEngine, WalkEnumerator};
pub use error::{EngineError, EngineResult, SweepError, SweepResult};
pub use ledger::{ReplaceDef, UndoLedger};
pub use matches::{CaptureGroup, FileMatch, FileResult};
pub use partition::{nonempty_ranges, partition, MatchRange};
pub use progress::{ProgressAggregator, ProgressEvent, StatusSnapshot};
pub use settings::SweepSettings;
pub use token::{PauseCancelSource, PauseCancelToken};
