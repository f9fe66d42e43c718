//! # frame-saver
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Periodic frame snapshots from a live media graph.
//!
//! `frame-saver` grafts a tee branch into a running (or about to run) media
//! graph without dropping a buffer, then saves one decoded frame per
//! scheduler tick as a PNG (or raw dump) in a dated run folder. Sessions are
//! tracked in a process-wide registry so a host can address them by handle.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use frame_saver::{ChannelSink, FrameSaver, FileSink};
//! use tokio::sync::mpsc;
//!
//! let (tx, mut rx) = mpsc::channel(8);
//!
//! let session = FrameSaver::builder()
//!     .args(["tick=500", "wait=0", "snap=1000,10,0", "play=10000", "path=auto"])
//!     .add_sink(FileSink::png())
//!     .add_sink(ChannelSink::new(tx))
//!     .on_event(|e| tracing::info!(?e, "capture event"))
//!     .start()
//!     .await?;
//!
//! while let Some(frame) = rx.recv().await {
//!     // Hand the RGB pixels to a model, a thumbnailer, etc.
//! }
//!
//! let stats = session.wait().await?;
//! ```
//!
//! ## Architecture
//!
//! - **Registry**: Bounded table mapping host handles to session ids
//! - **Splicer**: Blocks the producer, drains the consumer, then relinks
//!   through a tee with a snapshot branch
//! - **Scheduler Task**: Tokio task driving the splice, the snapshot
//!   cadence, quotas and the play duration
//! - **Capture**: Runs on the thread delivering buffers; decodes at most one
//!   frame per signal and fans it out to every sink
//!
//! Buffer delivery never waits on the scheduler. The only shared state is a
//! handful of atomics plus a lock held while a snapshot is written.

// unsafe_code lint is configured in Cargo.toml as "deny"
#![warn(missing_docs)]
// Pixel math requires intentional numeric casts between sample widths
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
pub mod config;
mod error;
mod event;
pub mod format;
mod frame;
pub mod graph;
pub mod pipeline;
pub mod registry;
mod session;
mod sink;

pub use builder::{FrameSaver, FrameSaverBuilder};
pub use config::{CaptureParams, LinkTargets, PadNames, PipelineSpec, SnapshotPolicy};
pub use error::{CapsError, CodecError, FrameSaverError, GraphError, LinkStage, ResourceError};
pub use event::{event_callback, CaptureEvent, EventCallback, TerminationReason};
pub use format::{PixelFormat, VideoCaps};
pub use frame::PixelBuffer;
pub use registry::{HostHandle, InstanceRegistry, SessionId};
pub use session::{Session, SessionStats};
pub use sink::{encode, CapturedFrame, ChannelSink, FileSink, Snapshot, SnapshotSink, RAW_PATH_TAG};
