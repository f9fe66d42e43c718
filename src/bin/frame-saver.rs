//! Command-line frame saver.
//!
//! Builds the graph named by `pipe=` (or the default test pipeline),
//! splices in the snapshot branch and saves frames until `play=` elapses
//! or Ctrl+C is pressed.
//!
//! ```bash
//! frame-saver tick=500 wait=0 snap=250,20,0 play=5000 path=auto
//! RUST_LOG=frame_saver=debug frame-saver pipe=videotestsrc ! videoconvert ! fakesink
//! ```

use std::process::ExitCode;
use std::time::Duration;

use frame_saver::{CaptureEvent, CaptureParams, FrameSaver, FrameSaverError};
use tracing_subscriber::EnvFilter;

/// How often the main loop checks whether the session ended on its own.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn exit_code(error: &FrameSaverError) -> ExitCode {
    match error {
        FrameSaverError::Config { .. } => ExitCode::from(2),
        FrameSaverError::Graph(_) | FrameSaverError::Link { .. } => ExitCode::from(3),
        _ => ExitCode::FAILURE,
    }
}

async fn run() -> Result<(), FrameSaverError> {
    let params = CaptureParams::from_args(std::env::args().skip(1))?;
    print!("{}", params.report());

    let session = FrameSaver::builder()
        .params(params)
        .on_event(|event| match event {
            CaptureEvent::FolderCreated { path, .. } => {
                println!("saving frames to {}", path.display());
            }
            CaptureEvent::SpliceFailed { error, retry_in, .. } => {
                eprintln!("splice failed: {error} (retry in {}ms)", retry_in.as_millis());
            }
            CaptureEvent::QuotaReached { saved, failed, .. } => {
                println!("quota reached: {saved} saved, {failed} failed");
            }
            other => tracing::debug!(?other, "capture event"),
        })
        .start()
        .await?;

    let mut interrupted = false;
    while session.is_running() {
        tokio::select! {
            () = tokio::time::sleep(POLL_INTERVAL) => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "cannot listen for Ctrl+C");
                }
                interrupted = true;
                break;
            }
        }
    }

    let stats = session.stop().await?;
    if interrupted {
        println!("interrupted");
    }
    println!(
        "frames={} signals={} saved={} failed={} stream_errors={}",
        stats.frames_seen, stats.signals, stats.saved, stats.failed, stats.stream_errors
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("frame-saver: {e}");
            exit_code(&e)
        }
    }
}
