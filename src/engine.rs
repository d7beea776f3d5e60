//! The public entry point: one engine per host process.

use std::sync::{Arc, Mutex, MutexGuard, Weak, mpsc};

use crate::activation::{PreviewActivation, StreamLifecycle};
use crate::backend::{self, CapturePlatform, DisplayChangeCallback, DisplayWatchGuard};
use crate::capture_session::{SessionStats, StreamController, StreamState};
use crate::display::Display;
use crate::env_config::{self, define_env_flag};
use crate::error::{CaptureError, CaptureResult};
use crate::event::{EngineEvent, EventHub};
use crate::frame::{Color, PreviewImage};
use crate::geometry::{self, Point};
use crate::one_shot;
use crate::registry::{DisplayRegistry, DisplaySnapshot};
use crate::streaming::StreamConfig;

/// Side of the preview square in output pixels.
pub const DEFAULT_CAPTURE_SIZE: u32 = 28;
const MAX_CAPTURE_SIZE: u32 = 1024;

const CAPTURE_SIZE_ENV: &str = "SNOW_PICKER_CAPTURE_SIZE";
const TARGET_FPS_ENV: &str = "SNOW_PICKER_TARGET_FPS";

define_env_flag!(enabled_unless(
    display_watch_enabled,
    "SNOW_PICKER_DISABLE_DISPLAY_WATCH"
));

#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub capture_size: u32,
    /// Fill for preview area outside every display.
    pub sentinel: Color,
    pub stream: StreamConfig,
    /// Subscribe to platform display-change notifications at build time.
    pub watch_display_changes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capture_size: DEFAULT_CAPTURE_SIZE,
            sentinel: Color::BLACK,
            stream: StreamConfig::default(),
            watch_display_changes: true,
        }
    }
}

impl EngineConfig {
    /// Apply `SNOW_PICKER_CAPTURE_SIZE`, `SNOW_PICKER_TARGET_FPS` and
    /// `SNOW_PICKER_DISABLE_DISPLAY_WATCH`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(size) = env_config::env_var_positive_u32(CAPTURE_SIZE_ENV) {
            self.capture_size = size;
        }
        if let Some(fps) = env_config::env_var_positive_u32(TARGET_FPS_ENV) {
            self.stream.target_fps = fps;
        }
        if !display_watch_enabled() {
            self.watch_display_changes = false;
        }
        self
    }

    pub fn validate(&self) -> CaptureResult<()> {
        if self.capture_size == 0 || self.capture_size > MAX_CAPTURE_SIZE {
            return Err(CaptureError::InvalidConfig(format!(
                "capture size must be within 1..={MAX_CAPTURE_SIZE}, got {}",
                self.capture_size
            )));
        }
        if self.stream.max_consecutive_errors == 0 {
            return Err(CaptureError::InvalidConfig(
                "max_consecutive_errors must be > 0".into(),
            ));
        }
        Ok(())
    }
}

pub struct CaptureEngineBuilder {
    platform: Option<Arc<dyn CapturePlatform>>,
    config: EngineConfig,
}

impl CaptureEngineBuilder {
    fn new() -> Self {
        Self {
            platform: None,
            config: EngineConfig::default().with_env_overrides(),
        }
    }

    /// Use `platform` instead of the one compiled in for this target.
    pub fn with_platform(mut self, platform: Arc<dyn CapturePlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn capture_size(mut self, size: u32) -> Self {
        self.config.capture_size = size;
        self
    }

    pub fn sentinel(mut self, color: Color) -> Self {
        self.config.sentinel = color;
        self
    }

    pub fn target_fps(mut self, fps: u32) -> Self {
        self.config.stream.target_fps = fps;
        self
    }

    pub fn max_consecutive_errors(mut self, max: usize) -> Self {
        self.config.stream.max_consecutive_errors = max;
        self
    }

    pub fn watch_display_changes(mut self, enabled: bool) -> Self {
        self.config.watch_display_changes = enabled;
        self
    }

    pub fn build(self) -> CaptureResult<CaptureEngine> {
        self.config.validate()?;
        let platform = match self.platform {
            Some(platform) => platform,
            None => backend::default_platform()?,
        };
        let registry = Arc::new(DisplayRegistry::new(platform.clone()));
        let events = Arc::new(EventHub::default());
        let controller = StreamController::new(
            platform.clone(),
            registry.clone(),
            events.clone(),
            self.config.stream.clone(),
            self.config.capture_size,
            self.config.sentinel,
        );
        let watch = self.config.watch_display_changes;
        let shared = Arc::new(EngineShared {
            platform,
            registry,
            controller,
            activation: PreviewActivation::new(),
            events,
            config: self.config,
            last_cursor: Mutex::new(None),
        });

        let display_watch = if watch {
            watch_displays(&shared)
        } else {
            None
        };

        Ok(CaptureEngine {
            display_watch,
            shared,
        })
    }
}

fn watch_displays(shared: &Arc<EngineShared>) -> Option<DisplayWatchGuard> {
    let weak: Weak<EngineShared> = Arc::downgrade(shared);
    let on_change: DisplayChangeCallback = Arc::new(move || {
        if let Some(shared) = weak.upgrade() {
            if let Err(e) = shared.display_configuration_changed() {
                log::warn!("handling display change failed: {e}");
            }
        }
    });
    match shared.platform.watch_display_changes(on_change) {
        Ok(guard) => {
            if guard.is_none() {
                log::debug!("platform has no display-change notifications");
            }
            guard
        }
        Err(e) => {
            log::warn!("display-change notifications unavailable: {e}");
            None
        }
    }
}

struct EngineShared {
    platform: Arc<dyn CapturePlatform>,
    registry: Arc<DisplayRegistry>,
    controller: StreamController,
    activation: PreviewActivation,
    events: Arc<EventHub>,
    config: EngineConfig,
    /// Last cursor seen by the engine, capture space.
    last_cursor: Mutex<Option<Point>>,
}

impl EngineShared {
    fn last_cursor(&self) -> MutexGuard<'_, Option<Point>> {
        self.last_cursor.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Where a new session should be centered: the live pointer when the
    /// platform can report it, else the last cursor seen, else the middle
    /// of the primary display.
    fn start_cursor(&self, snapshot: &DisplaySnapshot) -> Point {
        if let (Some(pointer), Some(primary_height)) =
            (self.platform.pointer_location(), snapshot.primary_height())
        {
            return geometry::to_capture_space(pointer, primary_height);
        }
        if let Some(cursor) = *self.last_cursor() {
            return cursor;
        }
        snapshot
            .primary()
            .or_else(|| snapshot.displays().first())
            .map(|d| {
                let b = d.bounds();
                Point::new(b.x + b.width / 2.0, b.y + b.height / 2.0)
            })
            .unwrap_or_default()
    }

    fn display_configuration_changed(&self) -> CaptureResult<()> {
        let cursor = *self.last_cursor();
        let result = self.controller.display_configuration_changed(cursor);
        let count = self.registry.snapshot().displays().len();
        self.events.publish(EngineEvent::DisplaysChanged { count });
        result
    }
}

impl StreamLifecycle for EngineShared {
    fn start_stream(&self) -> CaptureResult<()> {
        self.controller.start_at(|snapshot| {
            let cursor = self.start_cursor(snapshot);
            *self.last_cursor() = Some(cursor);
            cursor
        })
    }

    fn stop_stream(&self) -> CaptureResult<()> {
        self.controller.stop()
    }
}

/// Pointer-following screen capture for color picking.
///
/// Hosts call [`start_preview`](Self::start_preview) /
/// [`stop_preview`](Self::stop_preview) as preview consumers come and go,
/// feed pointer moves through [`cursor_moved`](Self::cursor_moved), and
/// read [`current_preview_image`](Self::current_preview_image) or
/// [`current_sampled_color`](Self::current_sampled_color) whenever they
/// redraw.
pub struct CaptureEngine {
    // Dropped first so that no display callback runs during teardown.
    display_watch: Option<DisplayWatchGuard>,
    shared: Arc<EngineShared>,
}

impl CaptureEngine {
    pub fn builder() -> CaptureEngineBuilder {
        CaptureEngineBuilder::new()
    }

    /// An engine on the platform compiled in for this target, configured
    /// from defaults and environment.
    pub fn new() -> CaptureResult<Self> {
        Self::builder().build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &DisplayRegistry {
        &self.shared.registry
    }

    pub fn is_watching_displays(&self) -> bool {
        self.display_watch.is_some()
    }

    /// A preview consumer appeared. The first one starts the stream.
    pub fn start_preview(&self) -> CaptureResult<()> {
        self.shared.activation.consumer_appeared(&*self.shared)
    }

    /// A preview consumer went away. The last one stops the stream.
    pub fn stop_preview(&self) -> CaptureResult<()> {
        self.shared.activation.consumer_disappeared(&*self.shared)
    }

    pub fn preview_consumers(&self) -> usize {
        self.shared.activation.consumers()
    }

    /// The pointer moved to `point` (capture space, top-left origin).
    /// Remembered even while no stream is running.
    pub fn cursor_moved(&self, point: Point) -> CaptureResult<()> {
        *self.shared.last_cursor() = Some(point);
        match self.shared.controller.update_cursor(point) {
            Err(CaptureError::InvalidState { .. }) => Ok(()),
            other => other,
        }
    }

    /// The pointer moved to `point` in pointer space (bottom-left origin
    /// at the primary display).
    pub fn pointer_moved(&self, point: Point) -> CaptureResult<()> {
        let primary_height = self
            .shared
            .registry
            .snapshot_or_refresh()?
            .primary_height()
            .ok_or(CaptureError::NoDisplayFound)?;
        self.cursor_moved(geometry::to_capture_space(point, primary_height))
    }

    /// Latest preview delivered by the stream, if any.
    pub fn current_preview_image(&self) -> Option<Arc<PreviewImage>> {
        self.shared.controller.latest_preview()
    }

    /// Color under the pointer in the latest preview, or the sentinel when
    /// no frame has arrived yet.
    pub fn current_sampled_color(&self) -> Color {
        self.current_preview_image()
            .map(|preview| preview.center_color())
            .unwrap_or(self.shared.config.sentinel)
    }

    /// Take a one-off preview around `point` (capture space). Works
    /// whether or not the stream is running.
    pub fn capture_once(&self, point: Point) -> CaptureResult<PreviewImage> {
        let snapshot = self.shared.registry.snapshot_or_refresh()?;
        one_shot::capture_once(
            &*self.shared.platform,
            &snapshot,
            point,
            self.shared.config.capture_size,
            self.shared.config.sentinel,
        )
    }

    /// Color of the single pixel at `point` (capture space).
    pub fn color_at(&self, point: Point) -> CaptureResult<Color> {
        Ok(self.capture_once(point)?.center_color())
    }

    /// Displays were connected, removed or rearranged. Only needed on
    /// platforms without their own notifications.
    pub fn display_configuration_changed(&self) -> CaptureResult<()> {
        self.shared.display_configuration_changed()
    }

    pub fn set_target_fps(&self, fps: u32) -> CaptureResult<()> {
        let config = StreamConfig {
            target_fps: fps,
            ..self.shared.controller.stream_config()
        };
        self.shared.controller.reconfigure(config)
    }

    pub fn stream_state(&self) -> StreamState {
        self.shared.controller.state()
    }

    pub fn active_display(&self) -> Option<Display> {
        self.shared.controller.active_display()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.controller.stats()
    }

    pub fn subscribe(&self) -> mpsc::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    #[cfg(feature = "tokio-stream")]
    pub fn subscribe_async(&self) -> tokio::sync::mpsc::UnboundedReceiver<EngineEvent> {
        self.shared.events.subscribe_async()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayId;
    use crate::geometry::PixelRect;
    use crate::test_support::{MockPlatform, display};

    fn build_engine(platform: &Arc<MockPlatform>) -> CaptureResult<CaptureEngine> {
        CaptureEngine::builder()
            .with_config(EngineConfig::default())
            .with_platform(platform.clone())
            .build()
    }

    #[test]
    fn invalid_capture_size_is_rejected() {
        let platform = MockPlatform::two_displays();
        let result = CaptureEngine::builder()
            .with_platform(platform.clone())
            .capture_size(0)
            .build();
        assert!(matches!(result, Err(CaptureError::InvalidConfig(_))));
    }

    #[test]
    fn preview_consumers_share_one_stream() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let engine = build_engine(&platform)?;

        engine.start_preview()?;
        engine.start_preview()?;
        assert_eq!(engine.stream_state(), StreamState::Running);
        assert_eq!(platform.open_count(), 1);

        engine.stop_preview()?;
        assert_eq!(engine.stream_state(), StreamState::Running);
        engine.stop_preview()?;
        assert_eq!(engine.stream_state(), StreamState::Idle);
        assert_eq!(platform.log(), vec!["open:1", "stop:1"]);

        engine.stop_preview()?;
        assert_eq!(engine.preview_consumers(), 0);
        Ok(())
    }

    #[test]
    fn start_uses_live_pointer_location() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        // Pointer space: y grows upwards from the primary's bottom edge.
        platform.set_pointer(Some(Point::new(1500.0, 900.0)));
        let engine = build_engine(&platform)?;

        engine.start_preview()?;
        assert_eq!(
            engine.active_display().map(|d| d.id()),
            Some(DisplayId::from_raw(2))
        );
        platform.emit_frame();
        assert_eq!(
            engine.current_sampled_color(),
            MockPlatform::local_color(&platform.display(2), 500.0, 100.0)
        );
        Ok(())
    }

    #[test]
    fn each_start_enumerates_displays_once() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        platform.set_pointer(Some(Point::new(1500.0, 900.0)));
        let engine = build_engine(&platform)?;

        engine.start_preview()?;
        assert_eq!(platform.enumerate_calls(), 1);
        assert_eq!(
            engine.active_display().map(|d| d.id()),
            Some(DisplayId::from_raw(2))
        );

        engine.stop_preview()?;
        platform.set_pointer(None);
        engine.start_preview()?;
        assert_eq!(platform.enumerate_calls(), 2);
        // No live pointer: the last cursor is reused.
        assert_eq!(
            engine.active_display().map(|d| d.id()),
            Some(DisplayId::from_raw(2))
        );
        Ok(())
    }

    #[test]
    fn start_falls_back_to_last_cursor_then_primary_center() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let engine = build_engine(&platform)?;

        engine.cursor_moved(Point::new(1700.0, 20.0))?;
        engine.start_preview()?;
        assert_eq!(
            engine.active_display().map(|d| d.id()),
            Some(DisplayId::from_raw(2))
        );
        engine.stop_preview()?;

        let fresh = build_engine(&platform)?;
        fresh.start_preview()?;
        assert_eq!(
            fresh.active_display().map(|d| d.id()),
            Some(DisplayId::from_raw(1))
        );
        platform.emit_frame();
        assert_eq!(
            fresh.current_sampled_color(),
            MockPlatform::local_color(&platform.display(1), 500.0, 500.0)
        );
        Ok(())
    }

    #[test]
    fn pointer_moves_are_flipped_into_capture_space() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let engine = build_engine(&platform)?;
        engine.start_preview()?;

        engine.pointer_moved(Point::new(250.0, 750.0))?;
        platform.emit_frame();
        assert_eq!(
            engine.current_sampled_color(),
            MockPlatform::local_color(&platform.display(1), 250.0, 250.0)
        );
        Ok(())
    }

    #[test]
    fn sampled_color_is_sentinel_without_frames() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let sentinel = Color::rgb(255, 0, 255);
        let engine = CaptureEngine::builder()
            .with_config(EngineConfig::default())
            .with_platform(platform.clone())
            .sentinel(sentinel)
            .build()?;

        assert_eq!(engine.current_sampled_color(), sentinel);
        assert!(engine.current_preview_image().is_none());
        engine.start_preview()?;
        assert_eq!(engine.current_sampled_color(), sentinel);
        Ok(())
    }

    #[test]
    fn cursor_moves_while_idle_are_accepted() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let engine = build_engine(&platform)?;
        engine.cursor_moved(Point::new(10.0, 10.0))?;
        assert_eq!(platform.open_count(), 0);
        Ok(())
    }

    #[test]
    fn one_shot_capture_runs_beside_the_stream() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let engine = build_engine(&platform)?;

        let color = engine.color_at(Point::new(1999.0, 999.0))?;
        assert_eq!(color, crate::test_support::gradient_color(1999, 999));

        engine.start_preview()?;
        let image = engine.capture_once(Point::new(1999.0, 999.0))?;
        assert_eq!(image.size(), 28);
        // Everything right of / below the desktop is padding.
        assert_eq!(image.pixel(27, 27), Some(Color::BLACK));
        assert_eq!(platform.open_count(), 1);
        Ok(())
    }

    #[test]
    fn display_watch_restarts_running_stream() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let engine = build_engine(&platform)?;
        assert!(engine.is_watching_displays());
        let rx = engine.subscribe();

        engine.cursor_moved(Point::new(1500.0, 500.0))?;
        engine.start_preview()?;
        platform.set_displays(vec![
            display(1, 0.0, 0.0, 1000.0, 1000.0, 1.0, true),
            display(2, 1000.0, 0.0, 1000.0, 1000.0, 2.0, false),
        ]);
        assert!(platform.trigger_display_change());

        assert_eq!(platform.log(), vec!["open:2", "stop:2", "open:2"]);
        assert_eq!(engine.registry().scale_factor(DisplayId::from_raw(2)), Some(2.0));
        assert!(
            rx.try_iter()
                .any(|e| matches!(e, EngineEvent::DisplaysChanged { count: 2 }))
        );

        platform.emit_frame();
        assert_eq!(engine.current_preview_image().map(|p| p.size()), Some(28));
        assert_eq!(engine.stats().restarts, 1);
        Ok(())
    }

    #[test]
    fn display_watch_can_be_disabled() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let engine = CaptureEngine::builder()
            .with_config(EngineConfig::default())
            .with_platform(platform.clone())
            .watch_display_changes(false)
            .build()?;
        assert!(!engine.is_watching_displays());
        assert!(!platform.is_watching_displays());

        engine.display_configuration_changed()?;
        assert_eq!(platform.enumerate_calls(), 1);
        Ok(())
    }

    #[test]
    fn retina_display_crop_uses_frame_density() -> CaptureResult<()> {
        let platform = MockPlatform::new(vec![display(1, 0.0, 0.0, 1000.0, 1000.0, 2.0, true)]);
        let engine = build_engine(&platform)?;
        engine.cursor_moved(Point::new(400.0, 300.0))?;
        engine.start_preview()?;
        platform.emit_frame();

        let preview = engine.current_preview_image().expect("frame delivered");
        assert_eq!(preview.size(), 28);
        assert_eq!(
            preview.center_color(),
            MockPlatform::local_color(&platform.display(1), 400.0, 300.0)
        );
        Ok(())
    }

    #[test]
    fn target_fps_is_forwarded() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let engine = build_engine(&platform)?;
        engine.start_preview()?;
        engine.set_target_fps(15)?;
        assert_eq!(platform.reconfigure_count(), 1);
        Ok(())
    }

    #[test]
    fn crop_follows_engine_cursor() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let engine = build_engine(&platform)?;
        engine.start_preview()?;
        engine.cursor_moved(Point::new(14.0, 14.0))?;
        assert_eq!(
            engine.shared.controller.current_crop().map(|c| c.pixel_rect),
            Some(PixelRect::new(0, 0, 28, 28))
        );
        Ok(())
    }

    #[cfg(feature = "tokio-stream")]
    #[tokio::test]
    async fn async_subscribers_see_session_events() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let engine = build_engine(&platform)?;
        let mut rx = engine.subscribe_async();

        engine.start_preview()?;
        let event = rx.recv().await.expect("event published");
        assert!(matches!(event, EngineEvent::SessionStarted { .. }));
        Ok(())
    }
}
