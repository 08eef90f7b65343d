//! Run-scoped progress, stage, and cancellation state.
//!
//! Each analysis run gets a [`RunHandle`] from the session's
//! [`RunRegistry`]. The handle is shared between the orchestrator (stage
//! changes), a ticker task (animation), and UI reads, so everything inside
//! is atomic. Progress is tracked in permille: ticks close one eighth of
//! the remaining distance to 950 and can never reach it, stage entry
//! raises a floor, and only reaching the done stage reports 100.
//!
//! Tokens are a monotonically increasing generation count. A pipeline
//! result is only applied while its token is still the registry's current
//! one, so a superseded run can never overwrite a newer board.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Progress ceiling ticks approach but never reach, in permille.
const TICK_CEILING: u32 = 950;

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunStage {
    /// No phase has started yet.
    Idle = 0,
    /// Phase 1, free-text decomposition.
    Breakdown = 1,
    /// Phase 2, JSON structuring.
    Structuring = 2,
    /// Schema validation of the structuring output.
    Validating = 3,
    /// Phase 3, single repair attempt.
    Repairing = 4,
    /// Run finished with a validated result.
    Done = 5,
    /// Run finished with a terminal error.
    Failed = 6,
    /// Run was cancelled between phases.
    Cancelled = 7,
}

impl RunStage {
    /// UI label for this stage.
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Breakdown => "breakdown",
            Self::Structuring => "structuring",
            Self::Validating => "validating",
            Self::Repairing => "repairing",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the run is over in this stage.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Minimum progress on entering this stage, in permille.
    fn floor_permille(self) -> u32 {
        match self {
            Self::Idle => 0,
            Self::Breakdown => 100,
            Self::Structuring => 450,
            Self::Validating => 800,
            Self::Repairing => 850,
            Self::Done => 1000,
            // Terminal failures freeze progress where it was.
            Self::Failed | Self::Cancelled => 0,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Breakdown,
            2 => Self::Structuring,
            3 => Self::Validating,
            4 => Self::Repairing,
            5 => Self::Done,
            6 => Self::Failed,
            7 => Self::Cancelled,
            _ => Self::Idle,
        }
    }
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// Identity of one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunToken(u64);

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Shared state of one run. Cheap to clone; all clones observe the same
/// stage, progress, and cancellation flag.
#[derive(Debug, Clone)]
pub struct RunHandle {
    token: RunToken,
    shared: Arc<RunShared>,
}

#[derive(Debug)]
struct RunShared {
    stage: AtomicU8,
    progress_permille: AtomicU32,
    cancelled: AtomicBool,
    started: Instant,
}

/// Point-in-time view of a run for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSnapshot {
    /// The run this snapshot belongs to.
    pub token: RunToken,
    /// Current stage.
    pub stage: RunStage,
    /// Progress percentage, 0 to 100.
    pub percent: u8,
    /// Whether cancellation was requested.
    pub cancelled: bool,
    /// Time since the run began.
    pub elapsed: Duration,
}

impl RunHandle {
    fn new(token: RunToken) -> Self {
        Self {
            token,
            shared: Arc::new(RunShared {
                stage: AtomicU8::new(RunStage::Idle as u8),
                progress_permille: AtomicU32::new(0),
                cancelled: AtomicBool::new(false),
                started: Instant::now(),
            }),
        }
    }

    /// The identity of this run.
    pub fn token(&self) -> RunToken {
        self.token
    }

    /// Current stage.
    pub fn stage(&self) -> RunStage {
        RunStage::from_u8(self.shared.stage.load(Ordering::Relaxed))
    }

    /// Enter a stage, raising progress to at least the stage floor.
    ///
    /// Progress is monotone: entering an earlier stage later (the repair
    /// loop re-enters validation) never lowers the value.
    pub fn set_stage(&self, stage: RunStage) {
        self.shared.stage.store(stage as u8, Ordering::Relaxed);
        let floor = stage.floor_permille();
        if floor > 0 {
            self.shared
                .progress_permille
                .fetch_max(floor, Ordering::Relaxed);
        }
    }

    /// Advance progress by one eighth of the remaining distance to the
    /// ceiling. Stalls just below it, and no-ops once the run is over.
    pub fn tick(&self) {
        if self.stage().is_terminal() {
            return;
        }
        let _ = self.shared.progress_permille.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |current| {
                let remaining = TICK_CEILING.saturating_sub(current);
                #[allow(clippy::arithmetic_side_effects)] // constant non-zero divisor
                let step = remaining / 8;
                if step == 0 {
                    return None;
                }
                Some(current.saturating_add(step))
            },
        );
    }

    /// Progress in permille, 0 to 1000.
    pub fn progress_permille(&self) -> u32 {
        self.shared.progress_permille.load(Ordering::Relaxed)
    }

    /// Progress percentage, 0 to 100.
    pub fn percent(&self) -> u8 {
        #[allow(clippy::cast_possible_truncation, clippy::arithmetic_side_effects)]
        {
            (self.progress_permille() / 10).min(100) as u8
        }
    }

    /// Request cooperative cancellation. Idempotent.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Relaxed)
    }

    /// Time since the run began.
    pub fn elapsed(&self) -> Duration {
        self.shared.started.elapsed()
    }

    /// Point-in-time view for the UI.
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            token: self.token,
            stage: self.stage(),
            percent: self.percent(),
            cancelled: self.is_cancelled(),
            elapsed: self.elapsed(),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Issues run handles and tracks which run is current.
#[derive(Debug)]
pub struct RunRegistry {
    generation: AtomicU64,
    current: Mutex<Option<RunHandle>>,
}

impl RunRegistry {
    /// Create a registry with no run.
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            current: Mutex::new(None),
        }
    }

    /// Begin a new run, cancelling the previous one.
    pub fn begin(&self) -> RunHandle {
        let generation = self
            .generation
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1);
        let handle = RunHandle::new(RunToken(generation));

        let mut current = lock_current(&self.current);
        if let Some(previous) = current.replace(handle.clone()) {
            previous.cancel();
        }
        handle
    }

    /// Whether `token` still identifies the latest run.
    pub fn is_current(&self, token: RunToken) -> bool {
        lock_current(&self.current)
            .as_ref()
            .is_some_and(|handle| handle.token() == token)
    }

    /// Cancel the current run, if any.
    pub fn cancel_current(&self) {
        if let Some(handle) = lock_current(&self.current).as_ref() {
            handle.cancel();
        }
    }

    /// Snapshot of the current run, if any.
    pub fn snapshot(&self) -> Option<RunSnapshot> {
        lock_current(&self.current).as_ref().map(RunHandle::snapshot)
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock the current-run slot, recovering from poisoning.
fn lock_current(slot: &Mutex<Option<RunHandle>>) -> std::sync::MutexGuard<'_, Option<RunHandle>> {
    slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
