//! Deterministic stand-ins for the platform used by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::backend::{CapturePlatform, DisplayChangeCallback, DisplayWatchGuard, LiveCapture};
use crate::capture_session::FrameSink;
use crate::display::{Display, DisplayId};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{CapturedFrame, Color, Frame};
use crate::geometry::{Point, Rect};
use crate::streaming::{PollingStream, StreamConfig};

/// Color of pixel (`x`, `y`) of the test pattern. Unique per pixel for
/// any realistic display size, and never black.
pub(crate) fn gradient_color(x: i64, y: i64) -> Color {
    let block = (x.div_euclid(256) * 8 + y.div_euclid(256)).rem_euclid(128);
    Color::rgb(
        x.rem_euclid(256) as u8,
        y.rem_euclid(256) as u8,
        (128 + block) as u8,
    )
}

pub(crate) fn gradient_frame(width: u32, height: u32) -> CaptureResult<Frame> {
    gradient_frame_at(0, 0, width, height)
}

/// Test pattern as seen through a window whose top-left pixel is
/// (`x0`, `y0`).
pub(crate) fn gradient_frame_at(x0: i64, y0: i64, width: u32, height: u32) -> CaptureResult<Frame> {
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..i64::from(height) {
        for x in 0..i64::from(width) {
            data.extend_from_slice(&gradient_color(x0 + x, y0 + y).to_bytes());
        }
    }
    Frame::from_rgba8(width, height, data)
}

pub(crate) fn display(
    id: u32,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    density: f64,
    primary: bool,
) -> Display {
    Display::new(
        DisplayId::from_raw(id),
        format!("mock-{id}"),
        Rect::new(x, y, width, height),
        density,
        primary,
    )
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum StillMode {
    /// Return the test pattern at the given density.
    Pattern(f64),
    Nothing,
    Fail,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StreamMode {
    /// Sinks are kept; tests push frames with `emit_frame`.
    Manual,
    /// A real polling thread producing the test pattern.
    Polling,
    /// A real polling thread whose every capture fails transiently.
    FailingPolling,
}

/// Poll `done` for up to five seconds.
pub(crate) fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Live handles handed out and not yet stopped.
#[derive(Default)]
struct LiveHandles {
    open: AtomicUsize,
    peak: AtomicUsize,
    stop_delay: Mutex<Duration>,
}

pub(crate) struct MockPlatform {
    displays: Mutex<Vec<Display>>,
    enumerate_calls: AtomicUsize,
    log: Arc<Mutex<Vec<String>>>,
    reconfigures: Arc<AtomicUsize>,
    double_stop: Arc<AtomicBool>,
    handles: Arc<LiveHandles>,
    sinks: Mutex<Vec<(FrameSink, Display)>>,
    deny_permission: AtomicBool,
    open_hook: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    stream_mode: Mutex<StreamMode>,
    still_mode: Mutex<StillMode>,
    still_calls: Mutex<Vec<Rect>>,
    pointer: Mutex<Option<Point>>,
    display_watch: Mutex<Option<DisplayChangeCallback>>,
}

impl MockPlatform {
    pub(crate) fn new(displays: Vec<Display>) -> Arc<Self> {
        Arc::new(Self {
            displays: Mutex::new(displays),
            enumerate_calls: AtomicUsize::new(0),
            log: Arc::new(Mutex::new(Vec::new())),
            reconfigures: Arc::new(AtomicUsize::new(0)),
            double_stop: Arc::new(AtomicBool::new(false)),
            handles: Arc::new(LiveHandles::default()),
            sinks: Mutex::new(Vec::new()),
            deny_permission: AtomicBool::new(false),
            open_hook: Mutex::new(None),
            stream_mode: Mutex::new(StreamMode::Manual),
            still_mode: Mutex::new(StillMode::Pattern(1.0)),
            still_calls: Mutex::new(Vec::new()),
            pointer: Mutex::new(None),
            display_watch: Mutex::new(None),
        })
    }

    /// Display 1 at [0,0,1000,1000] (primary) and display 2 to its right
    /// at [1000,0,1000,1000].
    pub(crate) fn two_displays() -> Arc<Self> {
        Self::new(vec![
            display(1, 0.0, 0.0, 1000.0, 1000.0, 1.0, true),
            display(2, 1000.0, 0.0, 1000.0, 1000.0, 1.0, false),
        ])
    }

    pub(crate) fn set_displays(&self, displays: Vec<Display>) {
        *self.displays.lock().unwrap() = displays;
    }

    pub(crate) fn display(&self, id: u32) -> Display {
        self.displays
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id() == DisplayId::from_raw(id))
            .cloned()
            .expect("unknown mock display")
    }

    /// What a full-display frame of `display` looks like.
    pub(crate) fn display_frame(display: &Display) -> CaptureResult<Frame> {
        let bounds = display.bounds();
        let density = display.scale_factor();
        gradient_frame(
            (bounds.width * density).round() as u32,
            (bounds.height * density).round() as u32,
        )
    }

    /// Color at display-local logical point (`x`, `y`) of `display`.
    pub(crate) fn local_color(display: &Display, x: f64, y: f64) -> Color {
        let density = display.scale_factor();
        gradient_color((x * density).floor() as i64, (y * density).floor() as i64)
    }

    pub(crate) fn enumerate_calls(&self) -> usize {
        self.enumerate_calls.load(Ordering::SeqCst)
    }

    /// `open:N` / `stop:N` entries in call order.
    pub(crate) fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.log().iter().filter(|e| e.starts_with("open:")).count()
    }

    pub(crate) fn stop_count(&self) -> usize {
        self.log().iter().filter(|e| e.starts_with("stop:")).count()
    }

    pub(crate) fn reconfigure_count(&self) -> usize {
        self.reconfigures.load(Ordering::SeqCst)
    }

    pub(crate) fn saw_double_stop(&self) -> bool {
        self.double_stop.load(Ordering::SeqCst)
    }

    /// Most live handles that were ever open at the same time.
    pub(crate) fn peak_live_handles(&self) -> usize {
        self.handles.peak.load(Ordering::SeqCst)
    }

    /// Make every `LiveCapture::stop` take at least `delay`.
    pub(crate) fn set_stop_delay(&self, delay: Duration) {
        *self.handles.stop_delay.lock().unwrap() = delay;
    }

    pub(crate) fn deny_permission(&self, deny: bool) {
        self.deny_permission.store(deny, Ordering::SeqCst);
    }

    /// Run `hook` inside every `open_stream`, before it returns.
    pub(crate) fn set_open_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.open_hook.lock().unwrap() = Some(Arc::new(hook));
    }

    pub(crate) fn clear_open_hook(&self) {
        *self.open_hook.lock().unwrap() = None;
    }

    pub(crate) fn set_stream_mode(&self, mode: StreamMode) {
        *self.stream_mode.lock().unwrap() = mode;
    }

    pub(crate) fn set_still_mode(&self, mode: StillMode) {
        *self.still_mode.lock().unwrap() = mode;
    }

    pub(crate) fn still_calls(&self) -> Vec<Rect> {
        self.still_calls.lock().unwrap().clone()
    }

    pub(crate) fn set_pointer(&self, pointer: Option<Point>) {
        *self.pointer.lock().unwrap() = pointer;
    }

    pub(crate) fn is_watching_displays(&self) -> bool {
        self.display_watch.lock().unwrap().is_some()
    }

    /// Fire the registered display-change callback, if any.
    pub(crate) fn trigger_display_change(&self) -> bool {
        let callback = self.display_watch.lock().unwrap().clone();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    pub(crate) fn last_sink(&self) -> Option<FrameSink> {
        self.sinks.lock().unwrap().last().map(|(sink, _)| sink.clone())
    }

    /// Push one full-display frame through the most recently opened sink.
    pub(crate) fn emit_frame(&self) -> bool {
        let last = self.sinks.lock().unwrap().last().cloned();
        let Some((sink, display)) = last else {
            return false;
        };
        let pixels = Self::display_frame(&display).expect("mock frame");
        sink.submit(CapturedFrame::whole_display(pixels, &display.bounds()))
    }

    /// Report an asynchronous failure through the most recent sink.
    pub(crate) fn fail_stream(&self, error: CaptureError) {
        if let Some(sink) = self.last_sink() {
            sink.fail(error);
        }
    }
}

impl CapturePlatform for MockPlatform {
    fn enumerate_displays(&self) -> CaptureResult<Vec<Display>> {
        self.enumerate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.displays.lock().unwrap().clone())
    }

    fn pointer_location(&self) -> Option<Point> {
        *self.pointer.lock().unwrap()
    }

    fn open_stream(
        &self,
        display: &Display,
        config: &StreamConfig,
        sink: FrameSink,
    ) -> CaptureResult<Box<dyn LiveCapture>> {
        if self.deny_permission.load(Ordering::SeqCst) {
            return Err(CaptureError::PermissionDenied);
        }
        let raw = display.id().raw();
        self.log.lock().unwrap().push(format!("open:{raw}"));

        let hook = self.open_hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook();
        }

        let mode = *self.stream_mode.lock().unwrap();
        let polling = match mode {
            StreamMode::Manual => {
                self.sinks.lock().unwrap().push((sink, display.clone()));
                None
            }
            StreamMode::Polling => {
                let display = display.clone();
                Some(PollingStream::spawn("mock-stream", config.clone(), sink, move || {
                    Ok(move || -> CaptureResult<CapturedFrame> {
                        let pixels = MockPlatform::display_frame(&display)?;
                        Ok(CapturedFrame::whole_display(pixels, &display.bounds()))
                    })
                })?)
            }
            StreamMode::FailingPolling => Some(PollingStream::spawn(
                "mock-stream",
                config.clone(),
                sink,
                || {
                    Ok(|| -> CaptureResult<CapturedFrame> {
                        Err(CaptureError::StreamFailed(anyhow::anyhow!("frame lost")))
                    })
                },
            )?),
        };

        let open = self.handles.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.handles.peak.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(MockLive {
            raw,
            log: self.log.clone(),
            reconfigures: self.reconfigures.clone(),
            double_stop: self.double_stop.clone(),
            handles: self.handles.clone(),
            stopped: false,
            polling,
        }))
    }

    fn capture_still(&self, rect: Rect) -> CaptureResult<Option<Frame>> {
        self.still_calls.lock().unwrap().push(rect);
        match *self.still_mode.lock().unwrap() {
            StillMode::Pattern(density) => Ok(Some(gradient_frame_at(
                (rect.x * density).floor() as i64,
                (rect.y * density).floor() as i64,
                (rect.width * density).round() as u32,
                (rect.height * density).round() as u32,
            )?)),
            StillMode::Nothing => Ok(None),
            StillMode::Fail => Err(CaptureError::Platform(anyhow::anyhow!("still failed"))),
        }
    }

    fn watch_display_changes(
        &self,
        on_change: DisplayChangeCallback,
    ) -> CaptureResult<Option<DisplayWatchGuard>> {
        *self.display_watch.lock().unwrap() = Some(on_change);
        Ok(Some(Box::new(())))
    }
}

struct MockLive {
    raw: u32,
    log: Arc<Mutex<Vec<String>>>,
    reconfigures: Arc<AtomicUsize>,
    double_stop: Arc<AtomicBool>,
    handles: Arc<LiveHandles>,
    stopped: bool,
    polling: Option<PollingStream>,
}

impl LiveCapture for MockLive {
    fn reconfigure(&mut self, config: &StreamConfig) -> CaptureResult<()> {
        self.reconfigures.fetch_add(1, Ordering::SeqCst);
        match self.polling.as_mut() {
            Some(polling) => polling.reconfigure(config),
            None => Ok(()),
        }
    }

    fn stop(&mut self) -> CaptureResult<()> {
        if self.stopped {
            self.double_stop.store(true, Ordering::SeqCst);
            return Ok(());
        }
        self.stopped = true;
        let delay = *self.handles.stop_delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if let Some(polling) = self.polling.as_mut() {
            polling.stop()?;
        }
        self.log.lock().unwrap().push(format!("stop:{}", self.raw));
        self.handles.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
