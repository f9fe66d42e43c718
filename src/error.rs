//! Error types for frame-saver.
//!
//! Errors are split into two categories:
//! - **Caller errors** ([`FrameSaverError`]): returned from the builder,
//!   the registry and live parameter updates
//! - **Recoverable events**: snapshot and splice failures at runtime are
//!   counted and surfaced via [`EventCallback`](crate::EventCallback)

use std::path::PathBuf;
use std::time::Duration;

/// Errors returned to the caller of a frame-saver API.
///
/// Runtime failures inside a running session (a frame that cannot be
/// encoded, a splice attempt that cannot link) never abort the session.
/// They are counted and reported through the event callback instead.
#[derive(Debug, thiserror::Error)]
pub enum FrameSaverError {
    /// A `key=value` parameter was malformed or failed validation.
    #[error("config error: {reason}")]
    Config {
        /// What was wrong with the parameter.
        reason: String,
    },

    /// A named element or pad does not exist in the graph.
    #[error("lookup failed: {what} '{name}' not found")]
    Lookup {
        /// Kind of object looked up (`element`, `pad`).
        what: &'static str,
        /// Name used for the lookup.
        name: String,
    },

    /// A topology mutation failed while splicing the snapshot branch.
    #[error("link failed at {stage}: {reason}")]
    Link {
        /// Which step of the splice failed.
        stage: LinkStage,
        /// Description from the graph.
        reason: String,
    },

    /// A capability descriptor could not be used.
    #[error(transparent)]
    Caps(#[from] CapsError),

    /// A frame could not be decoded or encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A shared resource could not be acquired.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// File system error outside frame encoding (args files, folders).
    #[error("io error: {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The host graph rejected an operation.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The session is no longer running.
    #[error("session stopped")]
    SessionStopped,
}

impl FrameSaverError {
    /// Creates a config error with the given reason.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates a link error for the given splice stage.
    pub fn link(stage: LinkStage, reason: impl Into<String>) -> Self {
        Self::Link {
            stage,
            reason: reason.into(),
        }
    }

    /// Creates an I/O error for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// The splice step at which a link failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStage {
    /// Unlinking the original producer to consumer link.
    Unlink,
    /// Requesting the branch node's output pads.
    TeePads,
    /// Linking the producer into the branch node.
    TeeUplink,
    /// Linking the pass-through queue to the original consumer.
    PassQueue,
    /// Linking the branch node into the snapshot queue.
    SnapQueue,
    /// Linking the snapshot path into the new sink.
    SnapSink,
}

impl std::fmt::Display for LinkStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unlink => "unlink",
            Self::TeePads => "tee-pads",
            Self::TeeUplink => "tee-link",
            Self::PassQueue => "queue-link",
            Self::SnapQueue => "snap-queue-link",
            Self::SnapSink => "sink-link",
        };
        f.write_str(name)
    }
}

/// Errors produced while interpreting a capability descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapsError {
    /// The descriptor text could not be parsed.
    #[error("malformed caps: {reason}")]
    Malformed {
        /// Parser diagnostic.
        reason: String,
    },

    /// A required dimension field is absent.
    #[error("caps missing field '{field}'")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// A dimension field is zero or negative.
    #[error("caps field '{field}' must be positive, got {value}")]
    NonPositive {
        /// Name of the field.
        field: &'static str,
        /// Value found.
        value: i64,
    },

    /// Only progressive frames can be snapshotted.
    #[error("unsupported scan mode '{mode}' (progressive required)")]
    NotProgressive {
        /// Scan mode found in the descriptor.
        mode: String,
    },

    /// The descriptor carried no structure at all.
    #[error("caps are empty")]
    Empty,
}

/// Errors produced while decoding or encoding a frame.
///
/// These are recovered locally: the session's failure counter is
/// incremented and capture continues.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The pixel format cannot be converted to RGB.
    #[error("unsupported pixel format: {format}")]
    UnsupportedFormat {
        /// Format tag from the caps.
        format: String,
    },

    /// The buffer holds fewer bytes than its geometry requires.
    #[error("buffer too short: {actual} bytes, need {expected}")]
    BufferTooShort {
        /// Bytes required by width, height and stride.
        expected: usize,
        /// Bytes delivered.
        actual: usize,
    },

    /// The frame's width and height give a size that does not fit in memory.
    #[error("frame too large: {width}x{height}")]
    FrameTooLarge {
        /// Width in pixels.
        width: usize,
        /// Height in pixels.
        height: usize,
    },

    /// The caps attached to the buffer were unusable.
    #[error(transparent)]
    Caps(#[from] CapsError),

    /// The PNG encoder rejected the image.
    #[error("png encoding failed: {0}")]
    Encode(#[from] png::EncodingError),

    /// Writing the output file failed.
    #[error("file error: {path}: {source}")]
    FileError {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// The receiving channel had no free capacity.
    #[error("channel full")]
    ChannelFull,
}

impl CodecError {
    /// Creates a file error for the given path.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileError {
            path: path.into(),
            source,
        }
    }
}

/// Errors acquiring the process-wide registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// The registry lock was not acquired within its timeout.
    #[error("registry lock not acquired within {0:?}")]
    LockTimeout(Duration),

    /// Every registry slot is owned by a session.
    #[error("registry full ({capacity} sessions)")]
    TableFull {
        /// Number of slots in the registry.
        capacity: usize,
    },

    /// The handle does not own a registry slot.
    #[error("handle {0} is not attached")]
    UnknownHandle(u64),
}

/// Errors reported by a [`MediaGraph`](crate::graph::MediaGraph).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// An element id does not refer to an element in this graph.
    #[error("no such element: {0}")]
    NoSuchElement(String),

    /// A pad id does not refer to a pad in this graph.
    #[error("no such pad: {0}")]
    NoSuchPad(String),

    /// A probe id does not refer to an installed probe.
    #[error("no such probe: {0}")]
    NoSuchProbe(String),

    /// The factory name is not known to the graph.
    #[error("unknown element factory '{0}'")]
    UnknownFactory(String),

    /// An element with that name is already in the graph.
    #[error("element name '{0}' already in use")]
    DuplicateName(String),

    /// The pads cannot be linked.
    #[error("cannot link {src} -> {sink}: {reason}")]
    LinkRefused {
        /// Upstream pad.
        src: String,
        /// Downstream pad.
        sink: String,
        /// Why the link was refused.
        reason: String,
    },

    /// The pads are not linked to each other.
    #[error("{src} is not linked to {sink}")]
    NotLinked {
        /// Upstream pad.
        src: String,
        /// Downstream pad.
        sink: String,
    },

    /// The graph is not playing, so data cannot flow.
    #[error("graph is not playing")]
    Flushing,

    /// A graph-construction spec could not be parsed.
    #[error("bad graph spec: {0}")]
    BadSpec(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_error_display() {
        let err = FrameSaverError::Lookup {
            what: "element",
            name: "videotestsrc0".to_string(),
        };
        assert_eq!(err.to_string(), "lookup failed: element 'videotestsrc0' not found");
    }

    #[test]
    fn test_link_error_names_stage() {
        let err = FrameSaverError::link(LinkStage::TeeUplink, "caps mismatch");
        assert_eq!(err.to_string(), "link failed at tee-link: caps mismatch");
    }

    #[test]
    fn test_caps_error_converts() {
        let err: FrameSaverError = CapsError::MissingField { field: "width" }.into();
        assert!(matches!(err, FrameSaverError::Caps(_)));
        assert!(err.to_string().contains("width"));
    }

    #[test]
    fn test_codec_file_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = CodecError::file_error("/tmp/00001_1.png", io_err);
        assert!(err.to_string().contains("/tmp/00001_1.png"));
    }

    #[test]
    fn test_resource_error_display() {
        let err = ResourceError::TableFull { capacity: 4 };
        assert_eq!(err.to_string(), "registry full (4 sessions)");
    }
}
