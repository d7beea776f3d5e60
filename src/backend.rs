use std::sync::Arc;

use crate::capture_session::FrameSink;
use crate::display::Display;
use crate::error::CaptureResult;
use crate::frame::Frame;
use crate::geometry::{Point, Rect};
use crate::streaming::StreamConfig;

/// Invoked by the platform whenever displays are connected, disconnected,
/// rearranged or change resolution.
pub type DisplayChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Keeps a display-change subscription alive; dropping it unsubscribes.
pub type DisplayWatchGuard = Box<dyn Send + Sync>;

/// A live capture bound to one display. Frames flow into the
/// [`FrameSink`] it was opened with until `stop` returns.
pub trait LiveCapture: Send {
    /// Push a new stream configuration to the running capture.
    fn reconfigure(&mut self, _config: &StreamConfig) -> CaptureResult<()> {
        Ok(())
    }

    /// Release the platform capture. Called exactly once per handle, never
    /// from the thread that delivers frames.
    fn stop(&mut self) -> CaptureResult<()>;
}

/// Everything the engine needs from the environment.
pub trait CapturePlatform: Send + Sync {
    /// Currently capturable displays. May be slow and may trigger a
    /// permission check.
    fn enumerate_displays(&self) -> CaptureResult<Vec<Display>>;

    /// Pointer position in pointer space (bottom-left origin), when the
    /// platform can report it.
    fn pointer_location(&self) -> Option<Point> {
        None
    }

    /// Open a continuous capture of the whole of `display`. Every frame
    /// must be handed to `sink` as a [`crate::frame::CapturedFrame`]
    /// covering the full display.
    fn open_stream(
        &self,
        display: &Display,
        config: &StreamConfig,
        sink: FrameSink,
    ) -> CaptureResult<Box<dyn LiveCapture>>;

    /// Take a single still of `rect` (capture space). `Ok(None)` means the
    /// platform produced nothing.
    fn capture_still(&self, rect: Rect) -> CaptureResult<Option<Frame>>;

    /// Subscribe to display configuration changes. Platforms without a
    /// notification source return `Ok(None)`; the host then forwards
    /// changes through [`crate::CaptureEngine::display_configuration_changed`].
    fn watch_display_changes(
        &self,
        _on_change: DisplayChangeCallback,
    ) -> CaptureResult<Option<DisplayWatchGuard>> {
        Ok(None)
    }
}

pub fn default_platform() -> CaptureResult<Arc<dyn CapturePlatform>> {
    crate::platform::build_platform()
}
