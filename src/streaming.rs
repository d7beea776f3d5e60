//! A live frame source built out of repeated still captures.
//!
//! Platforms that cannot push frames on their own get a dedicated capture
//! thread that grabs the whole display at a paced rate and hands every
//! frame to the session's [`FrameSink`]. The thread tolerates a bounded run
//! of transient errors before reporting the stream as failed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::backend::LiveCapture;
use crate::capture_session::FrameSink;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::CapturedFrame;

/// Configuration for a continuous capture stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Target frames per second. `0` means uncapped.
    pub target_fps: u32,
    /// Consecutive transient errors tolerated before the stream gives up.
    pub max_consecutive_errors: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            max_consecutive_errors: 30,
        }
    }
}

/// Live statistics about a polling stream, updated by the capture thread.
#[derive(Debug, Default)]
pub struct StreamStats {
    pub frames_captured: AtomicU64,
    pub errors_recovered: AtomicU64,
    /// Effective FPS over the last second, stored as `f64` bits.
    pub current_fps: AtomicU64,
    /// EWMA of per-frame capture latency in nanoseconds, stored as `f64`
    /// bits.
    pub capture_latency_avg_ns: AtomicU64,
}

impl StreamStats {
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            errors_recovered: self.errors_recovered.load(Ordering::Relaxed),
            current_fps: f64::from_bits(self.current_fps.load(Ordering::Relaxed)),
            capture_latency_avg: Duration::from_nanos(f64::from_bits(
                self.capture_latency_avg_ns.load(Ordering::Relaxed),
            ) as u64),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StreamStatsSnapshot {
    pub frames_captured: u64,
    pub errors_recovered: u64,
    pub current_fps: f64,
    pub capture_latency_avg: Duration,
}

/// Handle to a running polling stream. Stopping or dropping it joins the
/// capture thread.
pub struct PollingStream {
    stop_flag: Arc<AtomicBool>,
    target_fps: Arc<AtomicU32>,
    stats: Arc<StreamStats>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl PollingStream {
    /// Spawn the capture thread.
    ///
    /// `setup` runs on the capture thread and builds the per-frame capture
    /// closure, so platform handles that are not `Send` never cross
    /// threads. A `setup` failure is returned from this call instead of
    /// being reported through the sink.
    pub fn spawn<S, F>(
        thread_name: &str,
        config: StreamConfig,
        sink: FrameSink,
        setup: S,
    ) -> CaptureResult<Self>
    where
        S: FnOnce() -> CaptureResult<F> + Send + 'static,
        F: FnMut() -> CaptureResult<CapturedFrame>,
    {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let target_fps = Arc::new(AtomicU32::new(config.target_fps));
        let stats = Arc::new(StreamStats::default());
        let (ready_tx, ready_rx) = mpsc::channel::<CaptureResult<()>>();

        let stop = stop_flag.clone();
        let fps = target_fps.clone();
        let stats_clone = stats.clone();
        let max_consecutive_errors = config.max_consecutive_errors.max(1);

        let join_handle = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                let mut capture = match setup() {
                    Ok(capture) => {
                        let _ = ready_tx.send(Ok(()));
                        capture
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                stream_loop(
                    &mut capture,
                    max_consecutive_errors,
                    &sink,
                    &stop,
                    &fps,
                    &stats_clone,
                );
            })
            .map_err(|e| {
                CaptureError::Platform(anyhow::anyhow!(
                    "failed to spawn capture stream thread: {e}"
                ))
            })?;

        let ready = ready_rx.recv().map_err(|_| {
            CaptureError::Platform(anyhow::anyhow!(
                "capture stream thread exited before reporting readiness"
            ))
        });
        match ready.and_then(|result| result) {
            Ok(()) => Ok(Self {
                stop_flag,
                target_fps,
                stats,
                join_handle: Some(join_handle),
            }),
            Err(e) => {
                let _ = join_handle.join();
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> &Arc<StreamStats> {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

impl LiveCapture for PollingStream {
    fn reconfigure(&mut self, config: &StreamConfig) -> CaptureResult<()> {
        self.target_fps.store(config.target_fps, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) -> CaptureResult<()> {
        self.shutdown();
        Ok(())
    }
}

impl Drop for PollingStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn stream_loop<F>(
    capture: &mut F,
    max_consecutive_errors: usize,
    sink: &FrameSink,
    stop: &AtomicBool,
    target_fps: &AtomicU32,
    stats: &StreamStats,
) where
    F: FnMut() -> CaptureResult<CapturedFrame>,
{
    const LATENCY_ALPHA: f64 = 0.1;

    let mut consecutive_errors: usize = 0;
    let mut sequence: u64 = 0;
    let mut latency_avg_ns: f64 = 0.0;
    let mut fps_counter: u64 = 0;
    let mut fps_epoch = Instant::now();

    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }

        let frame_start = Instant::now();
        let result = capture();
        let capture_elapsed = frame_start.elapsed();

        match result {
            Ok(mut frame) => {
                consecutive_errors = 0;
                sequence = sequence.wrapping_add(1);
                frame.pixels.metadata.sequence = sequence;
                frame.pixels.metadata.capture_time = Some(Instant::now());
                frame.pixels.metadata.capture_duration = Some(capture_elapsed);

                let sample_ns = capture_elapsed.as_nanos() as f64;
                latency_avg_ns = LATENCY_ALPHA * sample_ns + (1.0 - LATENCY_ALPHA) * latency_avg_ns;
                stats
                    .capture_latency_avg_ns
                    .store(latency_avg_ns.to_bits(), Ordering::Relaxed);
                stats.frames_captured.fetch_add(1, Ordering::Relaxed);

                if !sink.submit(frame) {
                    // The session this thread feeds has been superseded.
                    break;
                }
            }
            Err(e) if e.is_retryable() => {
                consecutive_errors += 1;
                stats.errors_recovered.fetch_add(1, Ordering::Relaxed);
                if consecutive_errors >= max_consecutive_errors {
                    sink.fail(e);
                    break;
                }
                std::thread::sleep(Duration::from_millis(16));
                continue;
            }
            Err(e) => {
                sink.fail(e);
                break;
            }
        }

        fps_counter += 1;
        let fps_elapsed = fps_epoch.elapsed();
        if fps_elapsed >= Duration::from_secs(1) {
            let fps = fps_counter as f64 / fps_elapsed.as_secs_f64();
            stats.current_fps.store(fps.to_bits(), Ordering::Relaxed);
            fps_counter = 0;
            fps_epoch = Instant::now();
        }

        let fps = target_fps.load(Ordering::Acquire);
        if fps > 0 {
            let interval = Duration::from_secs_f64(1.0 / f64::from(fps));
            let elapsed = frame_start.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
    }
}
