//! Cooperative pause/cancel primitive shared between the coordinator,
//! engines, and front ends.
//!
//! One writer (the source held by the coordinator) flips the flags; any
//! number of readers hold cloned tokens and observe them at checkpoints.
//! Pausing never discards in-flight state: a paused worker simply blocks
//! at its next checkpoint until resumed or canceled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Default)]
struct TokenInner {
	canceled: AtomicBool,
	paused: Mutex<bool>,
	unpaused: Condvar,
}

/// Owning side of the pause/cancel pair. Created fresh per top-level
/// operation (or once per script run spanning several operations) and kept
/// alive until no chained operation remains.
#[derive(Debug, Default)]
pub struct PauseCancelSource {
	inner: Arc<TokenInner>,
}

impl PauseCancelSource {
	pub fn new() -> Self {
		Self::default()
	}

	/// Hand out a reader token. Cheap to clone, safe to share across threads.
	pub fn token(&self) -> PauseCancelToken {
		PauseCancelToken {
			inner: self.inner.clone(),
		}
	}

	/// Request cancellation. Idempotent; wakes any worker blocked in a pause
	/// so it can observe the cancel and unwind.
	pub fn cancel(&self) {
		self.inner.canceled.store(true, Ordering::SeqCst);
		// A paused worker must not stay blocked once canceled
		self.unpaused_notify();
	}

	pub fn pause(&self) {
		if let Ok(mut paused) = self.inner.paused.lock() {
			*paused = true;
		}
	}

	pub fn resume(&self) {
		if let Ok(mut paused) = self.inner.paused.lock() {
			*paused = false;
		}
		self.unpaused_notify();
	}

	pub fn is_paused(&self) -> bool {
		self.token().is_paused()
	}

	pub fn is_cancellation_requested(&self) -> bool {
		self.token().is_cancellation_requested()
	}

	fn unpaused_notify(&self) {
		self.inner.unpaused.notify_all();
	}
}

/// Reader side checked by producers at bounded intervals: before opening
/// each file and between processing steps within a file.
#[derive(Debug, Clone)]
pub struct PauseCancelToken {
	inner: Arc<TokenInner>,
}

impl PauseCancelToken {
	/// A token that is never paused or canceled, for callers that do not
	/// participate in coordination (mirrors a default/dummy source).
	pub fn none() -> Self {
		PauseCancelToken {
			inner: Arc::new(TokenInner::default()),
		}
	}

	pub fn is_cancellation_requested(&self) -> bool {
		self.inner.canceled.load(Ordering::SeqCst)
	}

	pub fn is_paused(&self) -> bool {
		self.inner
			.paused
			.lock()
			.map(|paused| *paused)
			.unwrap_or(false)
	}

	/// Block the calling thread while paused; return immediately otherwise.
	/// A cancel issued while blocked releases the wait.
	pub fn wait_while_paused(&self) {
		let Ok(mut paused) = self.inner.paused.lock() else {
			return;
		};
		while *paused && !self.inner.canceled.load(Ordering::SeqCst) {
			match self.inner.unpaused.wait(paused) {
				Ok(guard) => paused = guard,
				Err(_) => return,
			}
		}
	}

	/// Block while paused, then raise the cancellation signal if canceled.
	/// Workers call this at every checkpoint so callers can distinguish
	/// "canceled" from "completed with zero results".
	pub fn wait_while_paused_or_fail(&self) -> EngineResult<()> {
		self.wait_while_paused();
		if self.is_cancellation_requested() {
			return Err(EngineError::Canceled);
		}
		Ok(())
	}
}
