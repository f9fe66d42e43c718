//! Synthetic frames for `videotestsrc` elements.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{ElementKind, GraphState, MediaGraph, MemoryGraph};
use crate::format::{packed_stride, rgb_to_i420, swap_red_blue, CapsSet, CapsValue, PixelFormat};
use crate::{CapsError, VideoCaps};

/// Frame period used when the caps carry no framerate.
const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 30);

/// The eight colour bars, red first.
const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

/// Vertical colour bars that shift one bar per frame.
///
/// # Example
///
/// ```
/// use frame_saver::graph::TestPattern;
///
/// let caps = "video/x-raw, format=(string)RGB, width=(int)8, height=(int)2, framerate=(fraction)10/1"
///     .parse()
///     .unwrap();
/// let pattern = TestPattern::from_caps(&caps).unwrap();
/// assert_eq!(pattern.frame_interval().as_millis(), 100);
/// assert_eq!(pattern.frame(0).len(), 24 * 2);
/// ```
#[derive(Debug, Clone)]
pub struct TestPattern {
    caps: VideoCaps,
    caps_text: String,
    frame_interval: Duration,
}

impl TestPattern {
    /// Builds a pattern from the first structure of a source's output caps.
    pub fn from_caps(caps: &CapsSet) -> Result<Self, CapsError> {
        let structure = caps.structures().first().ok_or(CapsError::Empty)?;
        let video = VideoCaps::from_structure(structure)?;
        let frame_interval = match structure.get("framerate") {
            Some(CapsValue::Fraction(num, den)) if *num > 0 && *den > 0 => {
                let nanos = 1_000_000_000u64.saturating_mul(den.unsigned_abs()) / num.unsigned_abs();
                Duration::from_nanos(nanos.max(1))
            }
            _ => DEFAULT_FRAME_INTERVAL,
        };
        Ok(Self {
            caps: video,
            caps_text: structure.to_string(),
            frame_interval,
        })
    }

    /// Caps text attached to every frame.
    pub fn caps_text(&self) -> &str {
        &self.caps_text
    }

    /// Time between frames.
    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Renders frame number `n` in the caps' pixel format.
    ///
    /// Packed rows are padded to a 4-byte stride. Formats with no packed
    /// layout get RGB bytes. Geometry too large to address yields no bytes.
    pub fn frame(&self, n: u64) -> Vec<u8> {
        let width = self.caps.width as usize;
        let height = self.caps.height as usize;
        let bpp = match self.caps.format {
            PixelFormat::Rgbx | PixelFormat::Bgrx | PixelFormat::Rgba | PixelFormat::Bgra => 4,
            _ => 3,
        };
        let Some((stride, size)) = packed_stride(width, bpp)
            .and_then(|stride| Some((stride, stride.checked_mul(height)?)))
        else {
            return Vec::new();
        };
        let shift = (n % BARS.len() as u64) as usize;

        let mut data = vec![0u8; size];
        for row in data.chunks_exact_mut(stride) {
            for (x, pixel) in row.chunks_exact_mut(bpp).take(width).enumerate() {
                let bar = (x * BARS.len() / width + shift) % BARS.len();
                pixel[..3].copy_from_slice(&BARS[bar]);
                if bpp == 4 {
                    pixel[3] = 255;
                }
            }
        }

        match self.caps.format {
            PixelFormat::I420 => rgb_to_i420(&data, width, height, stride),
            ref format if format.is_blue_first() => {
                swap_red_blue(&mut data, width, height, stride, bpp);
                data
            }
            _ => data,
        }
    }
}

/// Starts one frame-pushing task per `videotestsrc` element.
///
/// Each task pushes frames while the graph plays and ends once its element
/// has seen end of stream or the graph returns to `Null` after playing.
pub fn spawn_test_sources(graph: &Arc<MemoryGraph>) -> Vec<JoinHandle<()>> {
    graph
        .elements_of_kind(ElementKind::Source)
        .into_iter()
        .filter(|id| graph.factory_of(*id).as_deref() == Some("videotestsrc"))
        .filter_map(|element| {
            let caps = graph.output_caps(element)?;
            let name = graph.element_name(element).unwrap_or_default();
            let pattern = match TestPattern::from_caps(&caps) {
                Ok(pattern) => pattern,
                Err(e) => {
                    tracing::warn!(element = %name, error = %e, "test source has unusable caps");
                    return None;
                }
            };
            let graph = graph.clone();
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(pattern.frame_interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut played = false;
                let mut pushed = 0u64;

                loop {
                    ticker.tick().await;
                    if graph.has_end_of_stream(element) {
                        break;
                    }
                    match graph.state() {
                        GraphState::Playing => {
                            played = true;
                            let frame = pattern.frame(pushed);
                            match graph.push_buffer(element, &frame, pattern.caps_text()) {
                                Ok(()) => pushed += 1,
                                Err(e) => tracing::trace!(element = %name, error = %e, "frame not pushed"),
                            }
                        }
                        GraphState::Null if played => break,
                        _ => {}
                    }
                }
                tracing::debug!(element = %name, frames = pushed, "test source finished");
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PixelBuffer;

    fn pattern(caps: &str) -> TestPattern {
        TestPattern::from_caps(&caps.parse().unwrap()).unwrap()
    }

    #[test]
    fn test_default_framerate() {
        let p = pattern("video/x-raw, format=(string)RGB, width=(int)4, height=(int)4");
        assert_eq!(p.frame_interval(), DEFAULT_FRAME_INTERVAL);
    }

    #[test]
    fn test_bars_shift_per_frame() {
        let p = pattern("video/x-raw, format=(string)RGB, width=(int)8, height=(int)1");
        let first = p.frame(0);
        let second = p.frame(1);
        assert_eq!(&first[..3], &BARS[0]);
        assert_eq!(&second[..3], &BARS[1]);
        assert_eq!(&first[21..24], &BARS[7]);
    }

    #[test]
    fn test_bgr_frames_decode_to_bars() {
        let caps = "video/x-raw, format=(string)BGR, width=(int)8, height=(int)2";
        let p = pattern(caps);
        let data = p.frame(0);
        let frame = PixelBuffer::decode(&data, &VideoCaps::parse(caps).unwrap()).unwrap();
        assert_eq!(&frame.row(1)[15..18], &BARS[5]);
    }

    #[test]
    fn test_i420_frame_size() {
        let p = pattern("video/x-raw, format=(string)I420, width=(int)6, height=(int)4");
        let expected = crate::format::I420Layout::new(6, 4).unwrap().size;
        assert_eq!(p.frame(0).len(), expected);
    }

    #[test]
    fn test_missing_dimensions_rejected() {
        let caps: CapsSet = "video/x-raw, format=(string)RGB".parse().unwrap();
        assert!(TestPattern::from_caps(&caps).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_task_pushes_while_playing() {
        let graph = Arc::new(MemoryGraph::new("pattern"));
        let src = graph.create_element("videotestsrc", "src").unwrap();
        let sink = graph.create_element("fakesink", "out").unwrap();
        graph
            .link(
                graph.static_pad(src, "src").unwrap(),
                graph.static_pad(sink, "sink").unwrap(),
                None,
            )
            .unwrap();

        let tasks = spawn_test_sources(&graph);
        assert_eq!(tasks.len(), 1);

        graph.set_state(GraphState::Playing).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        graph.send_end_of_stream(src).unwrap();
        for task in tasks {
            task.await.unwrap();
        }

        let frames = graph.frames_received(sink);
        assert!((10..=20).contains(&frames), "got {frames} frames");
    }
}
