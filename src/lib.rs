pub mod activation;
pub mod backend;
pub mod capture_session;
pub mod crop;
pub mod display;
pub mod engine;
pub(crate) mod env_config;
pub mod error;
pub mod event;
pub mod frame;
pub mod geometry;
pub mod one_shot;
mod platform;
pub mod registry;
pub mod streaming;

#[cfg(test)]
mod test_support;

use error::CaptureResult;

pub use backend::{CapturePlatform, LiveCapture};
pub use capture_session::{FrameSink, SessionStats, StreamState};
pub use display::{Display, DisplayId};
pub use engine::{CaptureEngine, CaptureEngineBuilder, DEFAULT_CAPTURE_SIZE, EngineConfig};
pub use error::{CaptureError, CaptureErrorClass};
pub use event::EngineEvent;
pub use frame::{CapturedFrame, Color, Frame, PreviewImage};
pub use geometry::{PixelRect, Point, Rect};
pub use registry::{DisplayRegistry, DisplaySnapshot};
pub use streaming::{PollingStream, StreamConfig, StreamStats, StreamStatsSnapshot};

/// Capture the default-size preview around `point` (capture space) on the
/// platform compiled in for this target, without keeping an engine around.
pub fn capture_once(point: Point) -> CaptureResult<PreviewImage> {
    let platform = backend::default_platform()?;
    let registry = DisplayRegistry::new(platform.clone());
    let displays = registry.refresh()?;
    one_shot::capture_once(
        &*platform,
        &displays,
        point,
        DEFAULT_CAPTURE_SIZE,
        Color::BLACK,
    )
}
