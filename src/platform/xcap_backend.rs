//! Capture through the `xcap` crate.
//!
//! xcap has no push-based stream, so live captures poll whole-monitor
//! stills on a [`PollingStream`] thread. Monitor positions are taken as
//! reported, so capture space is whatever unit xcap uses on this target;
//! the density of each frame is derived from the delivered buffer.

use anyhow::Context;
use xcap::Monitor;

use crate::backend::{CapturePlatform, DisplayChangeCallback, DisplayWatchGuard, LiveCapture};
use crate::capture_session::FrameSink;
use crate::display::{Display, DisplayId};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{self, CapturedFrame, Color, Frame};
use crate::geometry::Rect;
use crate::streaming::{PollingStream, StreamConfig};

pub(crate) struct XcapPlatform;

impl XcapPlatform {
    pub(crate) fn new() -> Self {
        Self
    }
}

fn describe(monitor: &Monitor) -> anyhow::Result<Display> {
    let id = monitor.id().context("monitor id")?;
    let bounds = Rect::new(
        f64::from(monitor.x().context("monitor x")?),
        f64::from(monitor.y().context("monitor y")?),
        f64::from(monitor.width().context("monitor width")?),
        f64::from(monitor.height().context("monitor height")?),
    );
    Ok(Display::new(
        DisplayId::from_raw(id),
        monitor.name().unwrap_or_else(|_| format!("monitor {id}")),
        bounds,
        f64::from(monitor.scale_factor().unwrap_or(1.0)),
        monitor.is_primary().unwrap_or(false),
    ))
}

fn all_monitors() -> CaptureResult<Vec<Monitor>> {
    Monitor::all()
        .context("enumerating monitors")
        .map_err(CaptureError::Platform)
}

fn find_monitor(id: DisplayId) -> CaptureResult<Monitor> {
    for monitor in all_monitors()? {
        if monitor.id().ok() == Some(id.raw()) {
            return Ok(monitor);
        }
    }
    Err(CaptureError::SessionStartFailed(anyhow::anyhow!(
        "{id} is no longer connected"
    )))
}

fn grab(monitor: &Monitor) -> anyhow::Result<Frame> {
    let image = monitor.capture_image().context("capturing monitor image")?;
    let (width, height) = image.dimensions();
    Frame::from_rgba8(width, height, image.into_raw()).map_err(|e| anyhow::anyhow!("{e}"))
}

impl CapturePlatform for XcapPlatform {
    fn enumerate_displays(&self) -> CaptureResult<Vec<Display>> {
        let mut displays = Vec::new();
        for monitor in all_monitors()? {
            match describe(&monitor) {
                Ok(display) => displays.push(display),
                Err(e) => log::warn!("skipping monitor that cannot be described: {e:#}"),
            }
        }
        Ok(displays)
    }

    fn open_stream(
        &self,
        display: &Display,
        config: &StreamConfig,
        sink: FrameSink,
    ) -> CaptureResult<Box<dyn LiveCapture>> {
        let id = display.id();
        let bounds = display.bounds();
        let stream = PollingStream::spawn(
            &format!("snow-picker-{id}"),
            config.clone(),
            sink,
            move || {
                // Built on the capture thread; xcap handles need not be Send.
                let monitor = find_monitor(id)?;
                Ok(move || -> CaptureResult<CapturedFrame> {
                    let pixels = grab(&monitor).map_err(CaptureError::StreamFailed)?;
                    Ok(CapturedFrame::whole_display(pixels, &bounds))
                })
            },
        )?;
        log::debug!("polling capture opened on {display}");
        Ok(Box::new(stream))
    }

    fn capture_still(&self, rect: Rect) -> CaptureResult<Option<Frame>> {
        let width = rect.width.round() as u32;
        let height = rect.height.round() as u32;
        if width == 0 || height == 0 {
            return Ok(None);
        }

        let mut out = Frame::filled(width, height, Color::BLACK)?;
        let mut covered = false;
        for monitor in all_monitors()? {
            let display = describe(&monitor).map_err(CaptureError::Platform)?;
            let bounds = display.bounds();
            if rect.intersection(&bounds).is_none() {
                continue;
            }
            let image = grab(&monitor).map_err(CaptureError::Platform)?;
            let density = frame::density_of(image.width(), bounds.width);
            composite_into(&mut out, &rect, &image, &bounds, density);
            covered = true;
        }
        Ok(covered.then_some(out))
    }

    #[cfg(windows)]
    fn watch_display_changes(
        &self,
        on_change: DisplayChangeCallback,
    ) -> CaptureResult<Option<DisplayWatchGuard>> {
        let listener = super::windows::display_change::DisplayChangeListener::spawn(on_change)?;
        Ok(Some(Box::new(listener)))
    }

    #[cfg(not(windows))]
    fn watch_display_changes(
        &self,
        _on_change: DisplayChangeCallback,
    ) -> CaptureResult<Option<DisplayWatchGuard>> {
        Ok(None)
    }
}

/// Nearest-sample the part of `image` (covering `bounds` at `density`)
/// that falls inside `rect` into `out`, one output pixel per logical unit.
fn composite_into(out: &mut Frame, rect: &Rect, image: &Frame, bounds: &Rect, density: f64) {
    for oy in 0..out.height() {
        let y = rect.y + f64::from(oy) + 0.5;
        if y < bounds.y || y >= bounds.bottom() {
            continue;
        }
        let sy = (((y - bounds.y) * density) as u32).min(image.height().saturating_sub(1));
        for ox in 0..out.width() {
            let x = rect.x + f64::from(ox) + 0.5;
            if x < bounds.x || x >= bounds.right() {
                continue;
            }
            let sx = (((x - bounds.x) * density) as u32).min(image.width().saturating_sub(1));
            out.put_pixel(ox, oy, image.pixel_bytes(sx, sy));
        }
    }
}
