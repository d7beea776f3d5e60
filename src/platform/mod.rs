use std::sync::Arc;

use crate::backend::CapturePlatform;
#[cfg(any(test, not(feature = "xcap")))]
use crate::backend::LiveCapture;
#[cfg(any(test, not(feature = "xcap")))]
use crate::capture_session::FrameSink;
#[cfg(any(test, not(feature = "xcap")))]
use crate::display::Display;
#[cfg(any(test, not(feature = "xcap")))]
use crate::error::CaptureError;
use crate::error::CaptureResult;
#[cfg(any(test, not(feature = "xcap")))]
use crate::frame::Frame;
#[cfg(any(test, not(feature = "xcap")))]
use crate::geometry::Rect;
#[cfg(any(test, not(feature = "xcap")))]
use crate::streaming::StreamConfig;

#[cfg(all(windows, feature = "xcap"))]
pub(crate) mod windows;
#[cfg(feature = "xcap")]
mod xcap_backend;

#[cfg(any(test, not(feature = "xcap")))]
fn unsupported_error() -> CaptureError {
    CaptureError::BackendUnavailable(
        "no capture platform compiled in; enable the `xcap` feature".into(),
    )
}

/// Stand-in when no platform is compiled in. Every call fails.
#[cfg(any(test, not(feature = "xcap")))]
struct UnsupportedPlatform;

#[cfg(any(test, not(feature = "xcap")))]
impl CapturePlatform for UnsupportedPlatform {
    fn enumerate_displays(&self) -> CaptureResult<Vec<Display>> {
        Err(unsupported_error())
    }

    fn open_stream(
        &self,
        _display: &Display,
        _config: &StreamConfig,
        _sink: FrameSink,
    ) -> CaptureResult<Box<dyn LiveCapture>> {
        Err(unsupported_error())
    }

    fn capture_still(&self, _rect: Rect) -> CaptureResult<Option<Frame>> {
        Err(unsupported_error())
    }
}

#[cfg(feature = "xcap")]
pub(crate) fn build_platform() -> CaptureResult<Arc<dyn CapturePlatform>> {
    Ok(Arc::new(xcap_backend::XcapPlatform::new()))
}

#[cfg(not(feature = "xcap"))]
pub(crate) fn build_platform() -> CaptureResult<Arc<dyn CapturePlatform>> {
    log::debug!("no capture platform compiled in");
    Ok(Arc::new(UnsupportedPlatform))
}
