//! Capture parameters.
//!
//! [`CaptureParams`] holds everything a session needs to know: timing,
//! quotas, where snapshots go, and which part of the graph to splice.
//! Values are usually parsed from `key=value` tokens (see [`parse`]); the
//! defaults below apply to anything not given.

pub mod parse;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::FrameSaverError;

/// Smallest accepted tick interval.
pub const MIN_TICK: Duration = Duration::from_millis(100);

/// Longest accepted element or pad name.
pub const MAX_NAME_LEN: usize = 100;

/// Graph spec used when no `pipe=` is given.
pub const DEFAULT_PIPELINE: &str =
    "videotestsrc ! video/x-raw,width=500,height=200 ! videoconvert ! autovideosink";

/// Name of the folder used by `path=auto`, inside the temp directory.
pub const AUTO_FOLDER_NAME: &str = "FrameSaver";

/// Snapshot cadence and quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Time between snapshots. Zero disables snapshots.
    pub interval: Duration,
    /// Stop after this many saved frames. Zero means unlimited.
    pub max_saved: u32,
    /// Stop after this many failed frames. Zero means unlimited.
    pub max_failed: u32,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            max_saved: 0,
            max_failed: 0,
        }
    }
}

impl fmt::Display for SnapshotPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.interval.as_millis(),
            self.max_saved,
            self.max_failed
        )
    }
}

/// The graph and the two linked elements to splice between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTargets {
    /// Name of the graph.
    pub graph: String,
    /// Element whose output gets branched.
    pub producer: String,
    /// Element currently fed by the producer.
    pub consumer: String,
}

impl Default for LinkTargets {
    fn default() -> Self {
        Self {
            graph: "untitledPipe0".to_string(),
            producer: "videotestsrc0".to_string(),
            consumer: "videoconvert0".to_string(),
        }
    }
}

impl fmt::Display for LinkTargets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.graph, self.producer, self.consumer)
    }
}

/// Pad names on the producer and consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadNames {
    /// Producer output pad.
    pub producer_out: String,
    /// Consumer input pad.
    pub consumer_in: String,
    /// Consumer output pad.
    pub consumer_out: String,
}

impl Default for PadNames {
    fn default() -> Self {
        Self {
            producer_out: "src".to_string(),
            consumer_in: "sink".to_string(),
            consumer_out: "src".to_string(),
        }
    }
}

impl fmt::Display for PadNames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.producer_out, self.consumer_in, self.consumer_out
        )
    }
}

/// Where the graph comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelineSpec {
    /// Build [`DEFAULT_PIPELINE`].
    #[default]
    Auto,
    /// Attach to a graph owned by the host; the text after the leading `!`
    /// describes the host's stages for reporting only.
    Parent(String),
    /// Build the graph from this spec.
    Custom(String),
}

impl PipelineSpec {
    /// Short name used in the parameter report.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Parent(_) => "parent-pipeline",
            Self::Custom(_) => "custom-pipeline",
        }
    }

    /// The spec text to build from, if this session builds its own graph.
    pub fn launch_text(&self) -> Option<&str> {
        match self {
            Self::Auto => Some(DEFAULT_PIPELINE),
            Self::Custom(text) => Some(text),
            Self::Parent(_) => None,
        }
    }

    /// The spec text as given, for reporting.
    pub fn text(&self) -> &str {
        match self {
            Self::Auto => DEFAULT_PIPELINE,
            Self::Parent(text) | Self::Custom(text) => text,
        }
    }
}

/// Parameters of one capture session.
///
/// # Example
///
/// ```
/// use frame_saver::CaptureParams;
/// use std::time::Duration;
///
/// let params = CaptureParams::from_args(["tick=500", "wait=0", "snap=100,3,0", "play=2000"]).unwrap();
/// assert_eq!(params.tick, Duration::from_millis(500));
/// assert_eq!(params.snapshot.max_saved, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureParams {
    /// Period of the housekeeping timer.
    ///
    /// Default: 1000ms
    pub tick: Duration,

    /// Snapshot cadence and quotas.
    ///
    /// Default: every 2000ms, no quotas
    pub snapshot: SnapshotPolicy,

    /// Delay before splicing into a running graph. Zero splices before the
    /// graph starts playing.
    ///
    /// Default: 3000ms
    pub wait: Duration,

    /// Total run time, after which the session ends the stream.
    ///
    /// Default: 9000ms
    pub play: Duration,

    /// Folder under which dated run folders are created.
    ///
    /// Default: current working directory
    pub folder: PathBuf,

    /// Graph, producer and consumer names.
    pub link: LinkTargets,

    /// Producer and consumer pad names.
    pub pads: PadNames,

    /// Graph construction spec.
    pub pipeline: PipelineSpec,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(1000),
            snapshot: SnapshotPolicy::default(),
            wait: Duration::from_millis(3000),
            play: Duration::from_millis(9000),
            folder: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            link: LinkTargets::default(),
            pads: PadNames::default(),
            pipeline: PipelineSpec::default(),
        }
    }
}

impl CaptureParams {
    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), FrameSaverError> {
        if self.tick < MIN_TICK {
            return Err(FrameSaverError::config(format!(
                "tick={} is below the minimum of {}ms",
                self.tick.as_millis(),
                MIN_TICK.as_millis()
            )));
        }
        if self.play < self.tick {
            return Err(FrameSaverError::config(format!(
                "play={} must be at least tick={}",
                self.play.as_millis(),
                self.tick.as_millis()
            )));
        }
        if self.play < self.snapshot.interval {
            return Err(FrameSaverError::config(format!(
                "play={} must be at least the snapshot interval {}",
                self.play.as_millis(),
                self.snapshot.interval.as_millis()
            )));
        }
        if self.folder.as_os_str().is_empty() {
            return Err(FrameSaverError::config("path must not be empty"));
        }
        Ok(())
    }

    /// Returns `true` if this session builds the graph itself.
    pub fn owns_graph(&self) -> bool {
        self.pipeline.launch_text().is_some()
    }

    /// Multi-line human-readable summary, as printed by the binary.
    pub fn report(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CaptureParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PARAMETERS:")?;
        writeln!(f, "  tick={} ms", self.tick.as_millis())?;
        writeln!(f, "  snap={}", self.snapshot)?;
        writeln!(f, "  wait={} ms", self.wait.as_millis())?;
        writeln!(f, "  play={} ms", self.play.as_millis())?;
        writeln!(f, "  path={}", self.folder.display())?;
        writeln!(f, "  pipe={}", self.pipeline.kind())?;
        writeln!(f, "  link={}", self.link)?;
        writeln!(f, "  pads={}", self.pads)?;
        writeln!(f, "PIPELINE:")?;
        for (i, stage) in self.pipeline.text().split('!').enumerate() {
            let stage = stage.trim();
            if stage.is_empty() {
                continue;
            }
            if i == 0 {
                writeln!(f, "  {stage}")?;
            } else {
                writeln!(f, "  ! {stage}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_params_defaults() {
        let params = CaptureParams::default();
        assert_eq!(params.tick, Duration::from_millis(1000));
        assert_eq!(params.snapshot.interval, Duration::from_millis(2000));
        assert_eq!(params.snapshot.max_saved, 0);
        assert_eq!(params.snapshot.max_failed, 0);
        assert_eq!(params.wait, Duration::from_millis(3000));
        assert_eq!(params.play, Duration::from_millis(9000));
        assert_eq!(params.link.graph, "untitledPipe0");
        assert_eq!(params.link.producer, "videotestsrc0");
        assert_eq!(params.link.consumer, "videoconvert0");
        assert_eq!(params.pads.to_string(), "src,sink,src");
        assert_eq!(params.pipeline, PipelineSpec::Auto);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_tick() {
        let params = CaptureParams {
            tick: Duration::from_millis(99),
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(FrameSaverError::Config { .. })
        ));
    }

    #[test]
    fn test_validate_play_covers_tick_and_snap() {
        let params = CaptureParams {
            play: Duration::from_millis(500),
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = CaptureParams {
            tick: Duration::from_millis(100),
            play: Duration::from_millis(1500),
            ..Default::default()
        };
        // snapshot interval 2000 > play 1500
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_pipeline_spec_kinds() {
        assert_eq!(PipelineSpec::Auto.kind(), "auto");
        assert_eq!(PipelineSpec::Parent("! a".into()).kind(), "parent-pipeline");
        assert_eq!(PipelineSpec::Custom("a ! b".into()).kind(), "custom-pipeline");
        assert!(PipelineSpec::Parent("! a".into()).launch_text().is_none());
        assert_eq!(PipelineSpec::Auto.launch_text(), Some(DEFAULT_PIPELINE));
    }

    #[test]
    fn test_report_lists_parameters_and_stages() {
        let params = CaptureParams {
            pipeline: PipelineSpec::Custom("videotestsrc ! videoconvert ! fakesink".into()),
            ..Default::default()
        };
        let report = params.report();
        assert!(report.starts_with("PARAMETERS:\n"));
        assert!(report.contains("  snap=2000,0,0\n"));
        assert!(report.contains("  pipe=custom-pipeline\n"));
        assert!(report.contains("  link=untitledPipe0,videotestsrc0,videoconvert0\n"));
        assert!(report.contains("PIPELINE:\n  videotestsrc\n  ! videoconvert\n  ! fakesink\n"));
    }
}
