//! Capture pipeline components.
//!
//! A session grafts a snapshot branch into the host graph and samples
//! frames from it:
//!
//! ```text
//! Scheduler Task ──poll──► Splicer ──relink──► Graph
//!       │                                        │
//!    signals                               snap-sink frames
//!       ▼                                        ▼
//!  SessionState ◄──────── claim ────────── FrameCapture → Sinks
//! ```
//!
//! - **Splicer**: Inserts the tee branch once the producer/consumer link is
//!   quiescent
//! - **Scheduler**: Owns the splicer; issues snapshot signals on cadence,
//!   retries failed splices and ends the run
//! - **Capture**: Answers each signal with one decoded frame

mod capture;
mod scheduler;
mod splicer;

pub(crate) use capture::FrameCapture;
pub(crate) use scheduler::{CaptureScheduler, SchedulerCommand};
pub use scheduler::{DEFAULT_IDLE_PERIOD, SNAPSHOT_DISABLED_OFFSET, SPLICE_RETRY_TICKS};
pub use splicer::{snapshot_caps, Branch, SpliceOutcome, Splicer, SplicerStatus};
