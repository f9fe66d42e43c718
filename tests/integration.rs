//! Integration tests for frame-saver.
//!
//! Every graph here is an in-process `MemoryGraph`, fed by the synthetic
//! `videotestsrc` tasks. Timing-sensitive tests run on a paused clock.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use frame_saver::graph::{launch, spawn_test_sources, MediaGraph};
use frame_saver::pipeline::{SpliceOutcome, Splicer};
use frame_saver::{
    CapsError, CaptureEvent, CapturedFrame, ChannelSink, CodecError, FrameSaver, FrameSaverError,
    HostHandle, InstanceRegistry, LinkTargets, PadNames, SessionId, Snapshot, SnapshotSink,
    TerminationReason,
};
use parking_lot::Mutex;
use tempfile::tempdir;
use tokio::sync::mpsc;

const RGB_4X2: &str = "video/x-raw, format=(string)RGB, width=(int)4, height=(int)2";

/// A test sink that counts writes.
struct CountingSink {
    count: Arc<AtomicUsize>,
}

impl SnapshotSink for CountingSink {
    fn name(&self) -> &str {
        "counting"
    }

    fn write(&self, _snapshot: &Snapshot<'_>) -> Result<(), CodecError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn local_registry() -> Arc<InstanceRegistry> {
    Arc::new(InstanceRegistry::with_capacity(8))
}

fn run_folders(root: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(root)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("frames_"))
        })
        .collect()
}

fn files_in(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(folder)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    files.sort();
    files
}

#[tokio::test(start_paused = true)]
async fn test_default_pipeline_saves_quota() {
    let dir = tempdir().unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();

    let session = FrameSaver::builder()
        .registry(local_registry())
        .args(["tick=500", "wait=0", "snap=100,3,0", "play=2000"])
        .args([format!("path={}", dir.path().display())])
        .on_event(move |e| recorded.lock().push(e))
        .start()
        .await
        .unwrap();

    let stats = session.wait().await.unwrap();
    assert_eq!(stats.saved, 3);
    assert_eq!(stats.failed, 0);
    assert!(stats.frames_seen >= 3);

    let folders = run_folders(dir.path());
    assert_eq!(folders.len(), 1);
    let files = files_in(&folders[0]);
    assert_eq!(files.len(), 3);
    for file in &files {
        let bytes = std::fs::read(file).unwrap();
        assert!(bytes.starts_with(b"\x89PNG\r\n\x1a\n"), "{} is not a PNG", file.display());
        let name = file.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(".png"));
    }

    let events = events.lock();
    assert!(matches!(events.first(), Some(CaptureEvent::SpliceCompleted { .. })));
    let quota_notices = events
        .iter()
        .filter(|e| matches!(e, CaptureEvent::QuotaReached { .. }))
        .count();
    assert_eq!(quota_notices, 1);
    assert!(matches!(
        events.last(),
        Some(CaptureEvent::PlayEnded {
            reason: TerminationReason::PlayDurationElapsed,
            saved: 3,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_provided_graph_is_spliced() {
    let dir = tempdir().unwrap();
    let graph = launch::build(
        "untitledPipe0",
        "videotestsrc ! video/x-raw,format=BGRx,width=16,height=8 ! videoconvert ! fakesink",
    )
    .unwrap();
    let sources = spawn_test_sources(&graph);
    let count = Arc::new(AtomicUsize::new(0));

    let session = FrameSaver::builder()
        .registry(local_registry())
        .graph(graph.clone())
        .args(["tick=100", "wait=0", "snap=200,2,0", "play=1000"])
        .args([format!("path={}", dir.path().display())])
        .add_sink(CountingSink {
            count: count.clone(),
        })
        .start()
        .await
        .unwrap();
    let prefix = format!("fsl{}_", session.id().get());

    let stats = session.wait().await.unwrap();
    for source in sources {
        source.await.unwrap();
    }

    assert_eq!(stats.saved, 2);
    assert_eq!(count.load(Ordering::SeqCst), 2);
    let producer = graph.element_by_name("videotestsrc0").unwrap();
    let downstream = graph.downstream_of(producer);
    assert_eq!(downstream, vec![format!("{prefix}tee")]);
    assert!(graph.has_end_of_stream(producer));
    let fakesink = graph.element_by_name("fakesink0").unwrap();
    assert!(graph.frames_received(fakesink) > 0);
}

#[tokio::test(start_paused = true)]
async fn test_inline_bad_caps_counts_failure() {
    let dir = tempdir().unwrap();
    let session = FrameSaver::builder()
        .registry(local_registry())
        .inline()
        .args(["snap=100", "play=5000"])
        .args([format!("path={}", dir.path().display())])
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    let err = session
        .receive_buffer(&[0u8; 24], "video/x-raw, format=(string)RGB, height=(int)2")
        .unwrap_err();
    assert!(matches!(err, FrameSaverError::Caps(CapsError::MissingField { .. })));

    let stats = session.stats();
    assert_eq!(stats.saved, 0);
    assert_eq!(stats.failed, 1);
    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_channel_sink_receives_frames() {
    let dir = tempdir().unwrap();
    let (tx, mut rx) = mpsc::channel::<CapturedFrame>(4);
    let session = FrameSaver::builder()
        .registry(local_registry())
        .inline()
        .args(["snap=100", "play=5000"])
        .args([format!("path={}", dir.path().display())])
        .add_sink(ChannelSink::new(tx))
        .start()
        .await
        .unwrap();

    // nothing is due yet
    assert_eq!(session.receive_buffer(&[0u8; 24], RGB_4X2).unwrap(), None);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let mut data = [0u8; 24];
    data[0] = 200;
    assert_eq!(session.receive_buffer(&data, RGB_4X2).unwrap(), Some(1));

    let captured = rx.try_recv().unwrap();
    assert_eq!(captured.index, 1);
    assert_eq!(captured.frame.width, 4);
    assert_eq!(captured.frame.height, 2);
    assert_eq!(captured.frame.data()[0], 200);
    assert!(rx.try_recv().is_err());

    let stats = session.stop().await.unwrap();
    assert_eq!(stats.saved, 1);
    assert_eq!(stats.frames_seen, 2);
}

#[tokio::test(start_paused = true)]
async fn test_raw_tag_dumps_bytes() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("shots.RAW.");
    std::fs::create_dir(&root).unwrap();

    let session = FrameSaver::builder()
        .registry(local_registry())
        .inline()
        .args(["snap=100", "play=5000"])
        .args([format!("path={}", root.display())])
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    let data: Vec<u8> = (0..24).collect();
    assert_eq!(session.receive_buffer(&data, RGB_4X2).unwrap(), Some(1));
    let folder = session.work_folder().unwrap();
    session.stop().await.unwrap();

    let files = files_in(&folder);
    assert_eq!(files.len(), 1);
    assert_eq!(std::fs::read(&files[0]).unwrap(), data);
}

#[tokio::test(start_paused = true)]
async fn test_update_param_echo_and_registry() {
    let dir = tempdir().unwrap();
    let registry = local_registry();
    let session = FrameSaver::builder()
        .registry(registry.clone())
        .inline()
        .args(["play=5000"])
        .args([format!("path={}", dir.path().display())])
        .start()
        .await
        .unwrap();

    assert_eq!(session.update_param("tick=500").await.unwrap(), "tick=500");
    assert_eq!(
        registry.params(session.id()).unwrap().tick,
        Duration::from_millis(500)
    );
    assert_eq!(session.update_param("wait=0").await.unwrap(), "wait=0 (PAUSED)");
    assert_eq!(session.update_param("wait=100").await.unwrap(), "wait=100 (RESUMED)");

    let err = session.update_param("tick=5").await.unwrap_err();
    assert!(matches!(err, FrameSaverError::Config { .. }));
    assert_eq!(
        registry.params(session.id()).unwrap().tick,
        Duration::from_millis(500)
    );

    session.stop().await.unwrap();
    assert!(registry.is_torn_down());
}

#[test]
fn test_registry_attach_is_idempotent() {
    let registry = local_registry();
    let handle = HostHandle::new(42);

    let first = registry.attach(handle).unwrap();
    let second = registry.attach(handle).unwrap();
    assert_eq!(first, second);
    assert_eq!(registry.active_count(), 1);

    let other = registry.attach(HostHandle::new(43)).unwrap();
    assert_ne!(other, first);

    registry.detach(handle).unwrap();
    registry.detach(HostHandle::new(43)).unwrap();
    assert!(registry.is_torn_down());
}

#[test]
fn test_existing_tee_branch_is_reused() {
    let graph = launch::build(
        "untitledPipe0",
        "videotestsrc ! tee ! queue ! videoconvert ! autovideosink",
    )
    .unwrap();
    let before = graph.mutation_count();
    let dyn_graph: Arc<dyn MediaGraph> = graph.clone();
    let mut splicer = Splicer::new(
        dyn_graph,
        SessionId::new(NonZeroU32::MIN),
        LinkTargets::default(),
        PadNames::default(),
        Vec::new(),
        Arc::new(|_: &[u8], _: &str| {}),
    );

    assert!(matches!(splicer.poll(), SpliceOutcome::Consumed));
    assert_eq!(graph.mutation_count(), before);
}
