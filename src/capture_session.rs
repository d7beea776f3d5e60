//! The continuous capture session and the state machine around it.
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Idle
//!                       |  ^
//!                       v  |
//!                   Restarting   (display crossing / configuration change)
//! ```
//!
//! All transitions go through one mutex; slow platform calls (opening and
//! releasing a live capture, enumerating displays) run with the mutex
//! released. Every session start takes a fresh generation number. Anything
//! that completes for an older generation (an opened handle, a frame, a
//! stream error) is discarded, so a `stop()` that races a `start()` always
//! ends in `Idle` with nothing left running.
//!
//! At most one platform grant exists at a time: a handle counts from the
//! moment it is requested until its `stop()` has returned, and a new
//! request waits on the `released` condvar until the count is back to zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, Weak};

use crate::backend::{CapturePlatform, LiveCapture};
use crate::crop::{self, CropRequest};
use crate::display::{Display, DisplayId};
use crate::error::{CaptureError, CaptureResult};
use crate::event::{EngineEvent, EventHub};
use crate::frame::{CapturedFrame, Color, PreviewImage};
use crate::geometry::Point;
use crate::registry::{DisplayRegistry, DisplaySnapshot};
use crate::streaming::StreamConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Starting,
    Running,
    Stopping,
    /// Tearing down the current session and opening a new one.
    Restarting,
}

impl StreamState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Restarting => "restarting",
        }
    }
}

/// One live capture bound to one display.
pub struct CaptureSession {
    display: Display,
    live: Box<dyn LiveCapture>,
    crop: Arc<CropRequest>,
}

impl CaptureSession {
    pub fn display(&self) -> &Display {
        &self.display
    }

    pub fn crop(&self) -> &CropRequest {
        &self.crop
    }
}

struct ControlState {
    state: StreamState,
    generation: u64,
    session: Option<CaptureSession>,
    /// Last cursor position handed to the controller, capture space.
    cursor: Point,
    /// Cursor update that arrived while a start/restart was in flight.
    pending_cursor: Option<Point>,
    /// Handles of sessions that failed asynchronously; released on the
    /// next control call so that none is stopped from its own frame
    /// thread.
    orphans: Vec<Box<dyn LiveCapture>>,
    /// Live captures requested from the platform and not yet fully
    /// stopped.
    grants: usize,
}

/// Everything the frame-delivery side reads. Written only by the control
/// side, and only while holding the control mutex.
struct FrameState {
    generation: AtomicU64,
    crop: RwLock<Option<Arc<CropRequest>>>,
    latest: RwLock<Option<Arc<PreviewImage>>>,
}

#[derive(Debug, Default)]
struct SessionCounters {
    frames_delivered: AtomicU64,
    stale_frames: AtomicU64,
    sessions_started: AtomicU64,
    restarts: AtomicU64,
    stream_failures: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_delivered: u64,
    /// Frames that arrived for a session that was already superseded.
    pub stale_frames: u64,
    pub sessions_started: u64,
    pub restarts: u64,
    pub stream_failures: u64,
}

struct ControllerShared {
    control: Mutex<ControlState>,
    /// Signalled when a grant is returned or the generation moves.
    released: Condvar,
    frames: FrameState,
    counters: SessionCounters,
    events: Arc<EventHub>,
    output_size: u32,
    sentinel: Color,
}

impl ControllerShared {
    fn control(&self) -> MutexGuard<'_, ControlState> {
        self.control.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn bump_generation(&self, control: &mut ControlState) -> u64 {
        control.generation = control.generation.wrapping_add(1);
        self.frames
            .generation
            .store(control.generation, Ordering::Release);
        self.released.notify_all();
        control.generation
    }

    /// Wait until no other grant is outstanding, then take one. `None` if
    /// `generation` was superseded while waiting.
    fn acquire_grant(&self, generation: u64) -> Option<MutexGuard<'_, ControlState>> {
        let mut control = self
            .released
            .wait_while(self.control(), |c| c.grants > 0 && c.generation == generation)
            .unwrap_or_else(|p| p.into_inner());
        if control.generation != generation {
            return None;
        }
        control.grants += 1;
        Some(control)
    }

    fn return_grant(&self) {
        let mut control = self.control();
        control.grants = control.grants.saturating_sub(1);
        drop(control);
        self.released.notify_all();
    }

    fn set_crop(&self, crop: Option<Arc<CropRequest>>) {
        *self.frames.crop.write().unwrap_or_else(|p| p.into_inner()) = crop;
    }

    fn clear_frames(&self) {
        self.set_crop(None);
        *self.frames.latest.write().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

/// Where a live capture delivers its frames.
///
/// Stamped with the generation of the session it was opened for; once that
/// session is stopped or replaced, everything pushed through the sink is
/// dropped.
#[derive(Clone)]
pub struct FrameSink {
    shared: Weak<ControllerShared>,
    generation: u64,
}

impl FrameSink {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the session this sink belongs to is still the current one.
    pub fn is_current(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|s| s.frames.generation.load(Ordering::Acquire) == self.generation)
    }

    /// Crop `frame` with the latest crop window and publish the result as
    /// the current preview. Returns `false` once the session is gone; the
    /// producer should stop sending.
    pub fn submit(&self, frame: CapturedFrame) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        if shared.frames.generation.load(Ordering::Acquire) != self.generation {
            shared.counters.stale_frames.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let crop = shared
            .frames
            .crop
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        let Some(crop) = crop else {
            return true;
        };

        let preview = match crop::crop_and_pad(&frame, &crop, shared.sentinel) {
            Ok(preview) => preview,
            Err(e) => {
                log::warn!("dropping frame {}: {e}", frame.pixels.metadata.sequence);
                return true;
            }
        };

        let mut latest = shared
            .frames
            .latest
            .write()
            .unwrap_or_else(|p| p.into_inner());
        // Checked again under the write lock: a stop that cleared the
        // preview must not be undone by a frame that was already cropping.
        if shared.frames.generation.load(Ordering::Acquire) != self.generation {
            shared.counters.stale_frames.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        *latest = Some(Arc::new(preview));
        shared
            .counters
            .frames_delivered
            .fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Report that the live capture died. The controller drops to `Idle`
    /// and reports the error; `start()` may be called again.
    pub fn fail(&self, error: CaptureError) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let error = match error {
            CaptureError::Platform(inner) => CaptureError::StreamFailed(inner),
            other => other,
        };

        let display = {
            let mut control = shared.control();
            if control.generation != self.generation {
                log::debug!("ignoring failure of superseded session: {error}");
                return;
            }
            let session = control.session.take();
            control.state = StreamState::Idle;
            control.pending_cursor = None;
            shared.bump_generation(&mut control);
            shared.clear_frames();
            let display = session.as_ref().map(|s| s.display.id());
            if let Some(session) = session {
                control.orphans.push(session.live);
            }
            display
        };

        shared
            .counters
            .stream_failures
            .fetch_add(1, Ordering::Relaxed);
        match display {
            Some(display) => log::warn!("capture stream on {display} failed: {error}"),
            None => log::warn!("capture stream failed while starting: {error}"),
        }
        shared.events.publish(EngineEvent::StreamFailed(error));
    }
}

pub struct StreamController {
    shared: Arc<ControllerShared>,
    platform: Arc<dyn CapturePlatform>,
    registry: Arc<DisplayRegistry>,
    stream_config: Mutex<StreamConfig>,
}

impl StreamController {
    pub fn new(
        platform: Arc<dyn CapturePlatform>,
        registry: Arc<DisplayRegistry>,
        events: Arc<EventHub>,
        stream_config: StreamConfig,
        output_size: u32,
        sentinel: Color,
    ) -> Self {
        Self {
            shared: Arc::new(ControllerShared {
                control: Mutex::new(ControlState {
                    state: StreamState::Idle,
                    generation: 0,
                    session: None,
                    cursor: Point::default(),
                    pending_cursor: None,
                    orphans: Vec::new(),
                    grants: 0,
                }),
                released: Condvar::new(),
                frames: FrameState {
                    generation: AtomicU64::new(0),
                    crop: RwLock::new(None),
                    latest: RwLock::new(None),
                },
                counters: SessionCounters::default(),
                events,
                output_size,
                sentinel,
            }),
            platform,
            registry,
            stream_config: Mutex::new(stream_config),
        }
    }

    pub fn state(&self) -> StreamState {
        self.shared.control().state
    }

    pub fn generation(&self) -> u64 {
        self.shared.control().generation
    }

    pub fn active_display(&self) -> Option<Display> {
        self.shared
            .control()
            .session
            .as_ref()
            .map(|s| s.display.clone())
    }

    /// The crop window frames are currently cut with.
    pub fn current_crop(&self) -> Option<Arc<CropRequest>> {
        self.shared
            .frames
            .crop
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn latest_preview(&self) -> Option<Arc<PreviewImage>> {
        self.shared
            .frames
            .latest
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn stats(&self) -> SessionStats {
        let c = &self.shared.counters;
        SessionStats {
            frames_delivered: c.frames_delivered.load(Ordering::Relaxed),
            stale_frames: c.stale_frames.load(Ordering::Relaxed),
            sessions_started: c.sessions_started.load(Ordering::Relaxed),
            restarts: c.restarts.load(Ordering::Relaxed),
            stream_failures: c.stream_failures.load(Ordering::Relaxed),
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        self.stream_config
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Open a session on the display under `cursor` (capture space).
    /// Only valid from `Idle`.
    pub fn start(&self, cursor: Point) -> CaptureResult<()> {
        self.start_at(|_| cursor)
    }

    /// Like [`start`](Self::start), with the cursor picked by `locate`
    /// against the display set refreshed for this start.
    pub fn start_at(&self, locate: impl FnOnce(&DisplaySnapshot) -> Point) -> CaptureResult<()> {
        self.release_orphans();
        let generation = {
            let mut control = self.shared.control();
            if control.state != StreamState::Idle {
                return Err(CaptureError::InvalidState {
                    operation: "start",
                    state: control.state.as_str(),
                });
            }
            control.state = StreamState::Starting;
            self.shared.bump_generation(&mut control)
        };

        let snapshot = match self.registry.refresh() {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.abort_start(generation, e)),
        };
        let cursor = locate(&*snapshot);
        {
            let mut control = self.shared.control();
            if control.generation == generation {
                control.cursor = cursor;
            }
        }
        self.open_session(generation, cursor, None)
    }

    /// Follow the pointer. A move within the current display only swaps the
    /// crop window; a move onto another display rebuilds the session there.
    pub fn update_cursor(&self, point: Point) -> CaptureResult<()> {
        self.release_orphans();
        let mut control = self.shared.control();
        match control.state {
            StreamState::Running => {}
            StreamState::Starting | StreamState::Restarting => {
                // Superseded by any later update; applied once the session
                // is up.
                control.pending_cursor = Some(point);
                return Ok(());
            }
            StreamState::Stopping => return Ok(()),
            StreamState::Idle => {
                return Err(CaptureError::InvalidState {
                    operation: "update_cursor",
                    state: control.state.as_str(),
                });
            }
        }
        control.cursor = point;

        let snapshot = self.registry.snapshot();
        let target = snapshot
            .display_containing(point)
            .ok_or(CaptureError::NoDisplayFound)?
            .clone();
        let Some(session) = control.session.as_mut() else {
            return Err(CaptureError::InvalidState {
                operation: "update_cursor",
                state: "running without a session",
            });
        };

        if target.id() == session.display.id() {
            let crop = Arc::new(CropRequest::for_display(
                point,
                &session.display,
                self.shared.output_size,
            ));
            session.crop = crop.clone();
            self.shared.set_crop(Some(crop));
            return Ok(());
        }

        log::info!(
            "pointer moved from {} to {target}, restarting capture",
            session.display
        );
        self.restart(control, point, false)
    }

    /// Stop the session. A no-op when already idle; from `Starting` the
    /// in-flight start is abandoned and ends in `Idle`.
    pub fn stop(&self) -> CaptureResult<()> {
        self.release_orphans();
        let session = {
            let mut control = self.shared.control();
            match control.state {
                StreamState::Idle | StreamState::Stopping => return Ok(()),
                StreamState::Starting | StreamState::Restarting => {
                    control.state = StreamState::Idle;
                }
                StreamState::Running => {
                    control.state = StreamState::Stopping;
                }
            }
            control.pending_cursor = None;
            self.shared.bump_generation(&mut control);
            self.shared.clear_frames();
            control.session.take()
        };

        let Some(session) = session else {
            log::debug!("capture start abandoned before it completed");
            return Ok(());
        };

        let display = session.display.id();
        let result = self.release_grant(session.live);
        log::info!("capture stream on {} stopped", session.display);
        self.shared
            .events
            .publish(EngineEvent::SessionStopped { display });
        {
            let mut control = self.shared.control();
            if control.state == StreamState::Stopping {
                control.state = StreamState::Idle;
            }
        }
        result
    }

    /// Refresh the registry after displays were connected, removed or
    /// rearranged, and rebuild a running session against the new layout.
    pub fn display_configuration_changed(&self, cursor: Option<Point>) -> CaptureResult<()> {
        self.release_orphans();
        let control = self.shared.control();
        if control.state != StreamState::Running {
            drop(control);
            self.registry.refresh()?;
            return Ok(());
        }
        let cursor = cursor.unwrap_or(control.cursor);
        log::info!("display configuration changed, restarting capture");
        self.restart(control, cursor, true)
    }

    /// Store a new stream configuration and push it to the live capture.
    pub fn reconfigure(&self, config: StreamConfig) -> CaptureResult<()> {
        *self
            .stream_config
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = config.clone();
        let mut control = self.shared.control();
        if let Some(session) = control.session.as_mut() {
            session.live.reconfigure(&config)?;
        }
        Ok(())
    }

    fn restart(
        &self,
        mut control: MutexGuard<'_, ControlState>,
        cursor: Point,
        refresh_displays: bool,
    ) -> CaptureResult<()> {
        let old = control.session.take();
        control.state = StreamState::Restarting;
        control.cursor = cursor;
        let generation = self.shared.bump_generation(&mut control);
        self.shared.clear_frames();
        drop(control);

        self.shared.counters.restarts.fetch_add(1, Ordering::Relaxed);
        let from = old.as_ref().map(|s| s.display.id());
        if let Some(CaptureSession { display, mut live, .. }) = old {
            // Reported before the grant is returned, so it always precedes
            // the next session's start.
            if let Err(e) = live.stop() {
                log::warn!("releasing capture on {display} failed: {e}");
            }
            drop(live);
            self.shared.events.publish(EngineEvent::SessionStopped {
                display: display.id(),
            });
            self.shared.return_grant();
        }

        if self.shared.control().generation != generation {
            log::debug!("restart abandoned: stopped while tearing down");
            return Ok(());
        }
        if refresh_displays {
            if let Err(e) = self.registry.refresh() {
                return Err(self.abort_start(generation, e));
            }
        }
        self.open_session(generation, cursor, from)
    }

    fn open_session(
        &self,
        generation: u64,
        cursor: Point,
        previous: Option<DisplayId>,
    ) -> CaptureResult<()> {
        let display = match self.registry.display_containing(cursor) {
            Ok(display) => display,
            Err(e) => return Err(self.abort_start(generation, e)),
        };
        let crop = Arc::new(CropRequest::for_display(
            cursor,
            &display,
            self.shared.output_size,
        ));
        match self.shared.acquire_grant(generation) {
            Some(_control) => self.shared.set_crop(Some(crop.clone())),
            None => {
                log::debug!("capture on {display} superseded before it was requested");
                return Err(CaptureError::Canceled);
            }
        }

        let sink = FrameSink {
            shared: Arc::downgrade(&self.shared),
            generation,
        };
        let config = self.stream_config();
        let live = match self.platform.open_stream(&display, &config, sink) {
            Ok(live) => live,
            Err(e) => {
                self.shared.return_grant();
                if self.shared.control().generation != generation {
                    log::debug!("capture on {display} superseded while starting");
                    return Err(CaptureError::Canceled);
                }
                let e = match e {
                    CaptureError::Platform(inner) => CaptureError::SessionStartFailed(inner),
                    other => other,
                };
                return Err(self.abort_start(generation, e));
            }
        };

        let mut control = self.shared.control();
        if control.generation != generation {
            drop(control);
            if let Err(e) = self.release_grant(live) {
                log::warn!("releasing superseded capture on {display} failed: {e}");
            }
            log::debug!("capture on {display} superseded while starting");
            return Err(CaptureError::Canceled);
        }

        control.state = StreamState::Running;
        control.session = Some(CaptureSession {
            display: display.clone(),
            live,
            crop,
        });
        let pending = control.pending_cursor.take();
        drop(control);

        self.shared
            .counters
            .sessions_started
            .fetch_add(1, Ordering::Relaxed);
        log::info!("capture stream started on {display}");
        if let Some(from) = previous.filter(|from| *from != display.id()) {
            self.shared.events.publish(EngineEvent::DisplaySwitched {
                from,
                to: display.id(),
            });
        }
        self.shared
            .events
            .publish(EngineEvent::SessionStarted {
                display: display.id(),
            });

        match pending {
            Some(point) => self.update_cursor(point),
            None => Ok(()),
        }
    }

    /// Return to `Idle` after a failed start, unless something newer has
    /// taken over in the meantime.
    fn abort_start(&self, generation: u64, error: CaptureError) -> CaptureError {
        {
            let mut control = self.shared.control();
            if control.generation == generation {
                control.state = StreamState::Idle;
                control.pending_cursor = None;
                self.shared.set_crop(None);
            }
        }
        self.shared
            .events
            .publish(EngineEvent::StartFailed(error.to_sendable()));
        error
    }

    /// Stop `live` and give its grant back.
    fn release_grant(&self, mut live: Box<dyn LiveCapture>) -> CaptureResult<()> {
        let result = live.stop();
        drop(live);
        self.shared.return_grant();
        result
    }

    fn release_orphans(&self) {
        let orphans = std::mem::take(&mut self.shared.control().orphans);
        for live in orphans {
            if let Err(e) = self.release_grant(live) {
                log::warn!("releasing failed capture session: {e}");
            }
        }
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        let (session, orphans) = {
            let mut control = self.shared.control();
            control.state = StreamState::Idle;
            self.shared.bump_generation(&mut control);
            (control.session.take(), std::mem::take(&mut control.orphans))
        };
        for live in session.map(|s| s.live).into_iter().chain(orphans) {
            let _ = self.release_grant(live);
        }
    }
}
