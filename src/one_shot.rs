//! Single-frame capture, independent of any running stream.

use crate::backend::CapturePlatform;
use crate::crop::{self, CropRequest};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{self, CapturedFrame, Color, PreviewImage};
use crate::geometry::{self, PixelRect, Point};
use crate::registry::DisplaySnapshot;

/// Capture the `size`×`size` window centered on `point` (capture space).
///
/// The window is clamped to the union of all display bounds before the
/// platform is asked for pixels; the clamped-off part is filled with
/// `sentinel`. A window entirely off-screen yields a sentinel image without
/// touching the platform.
pub fn capture_once(
    platform: &dyn CapturePlatform,
    displays: &DisplaySnapshot,
    point: Point,
    size: u32,
    sentinel: Color,
) -> CaptureResult<PreviewImage> {
    if size == 0 {
        return Err(CaptureError::InvalidConfig("preview size must be > 0".into()));
    }
    let requested = geometry::requested_rect(point, f64::from(size));
    let clamped = displays
        .combined_bounds()
        .and_then(|desktop| requested.intersection(&desktop));
    let Some(clamped) = clamped else {
        log::debug!("still at {point:?} lies outside every display");
        return PreviewImage::sentinel(size, sentinel);
    };

    let still = platform
        .capture_still(clamped)
        .map_err(|e| CaptureError::CaptureOnceFailed(format!("{e:#}")))?
        .ok_or_else(|| CaptureError::CaptureOnceFailed("platform returned no image".into()))?;

    // Stills come back at whatever density the platform picked.
    let density = frame::density_of(still.width(), clamped.width);
    let bounds = PixelRect::new(
        (clamped.x * density).floor() as i64,
        (clamped.y * density).floor() as i64,
        still.width(),
        still.height(),
    );
    let request = CropRequest::for_capture_space(point, density, size);
    crop::crop_and_pad(&CapturedFrame::new(still, bounds, density), &request, sentinel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::test_support::{MockPlatform, StillMode, display, gradient_color};

    fn snapshot(platform: &MockPlatform) -> CaptureResult<DisplaySnapshot> {
        Ok(DisplaySnapshot::new(platform.enumerate_displays()?))
    }

    #[test]
    fn inside_one_display() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let displays = snapshot(&platform)?;
        let image = capture_once(&*platform, &displays, Point::new(400.0, 300.0), 28, Color::BLACK)?;

        assert_eq!(platform.still_calls(), vec![Rect::new(386.0, 286.0, 28.0, 28.0)]);
        assert_eq!(image.size(), 28);
        assert_eq!(image.center_color(), gradient_color(400, 300));
        assert_eq!(image.pixel(0, 0), Some(gradient_color(386, 286)));
        Ok(())
    }

    #[test]
    fn odd_size_centers_on_the_pointer_pixel() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let displays = snapshot(&platform)?;
        let image = capture_once(&*platform, &displays, Point::new(500.0, 500.0), 27, Color::BLACK)?;

        assert_eq!(platform.still_calls(), vec![Rect::new(487.0, 487.0, 27.0, 27.0)]);
        assert_eq!(image.size(), 27);
        assert_eq!(image.center_color(), gradient_color(500, 500));
        assert_eq!(image.pixel(0, 0), Some(gradient_color(487, 487)));
        Ok(())
    }

    #[test]
    fn fractional_pointer_samples_the_pixel_it_is_over() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let displays = snapshot(&platform)?;
        for size in [27, 28] {
            let image =
                capture_once(&*platform, &displays, Point::new(400.6, 300.3), size, Color::BLACK)?;
            assert_eq!(image.center_color(), gradient_color(400, 300), "size {size}");
        }
        Ok(())
    }

    #[test]
    fn window_straddling_two_displays_is_not_padded() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let displays = snapshot(&platform)?;
        let image = capture_once(&*platform, &displays, Point::new(1000.0, 500.0), 28, Color::BLACK)?;

        assert_eq!(platform.still_calls(), vec![Rect::new(986.0, 486.0, 28.0, 28.0)]);
        assert!(!image.frame().as_rgba_bytes().chunks_exact(4).any(|px| px == [0, 0, 0, 255]));
        Ok(())
    }

    #[test]
    fn desktop_corner_is_clamped_and_padded() -> CaptureResult<()> {
        let platform = MockPlatform::new(vec![display(1, 0.0, 0.0, 1000.0, 1000.0, 1.0, true)]);
        let displays = snapshot(&platform)?;
        let image = capture_once(&*platform, &displays, Point::new(998.0, 998.0), 28, Color::BLACK)?;

        assert_eq!(platform.still_calls(), vec![Rect::new(984.0, 984.0, 16.0, 16.0)]);
        for y in 0..28u32 {
            for x in 0..28u32 {
                let expected = if x < 16 && y < 16 {
                    gradient_color(i64::from(984 + x), i64::from(984 + y))
                } else {
                    Color::BLACK
                };
                assert_eq!(image.pixel(x, y), Some(expected), "({x},{y})");
            }
        }
        Ok(())
    }

    #[test]
    fn retina_still_is_resampled_to_preview_size() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        platform.set_still_mode(StillMode::Pattern(2.0));
        let displays = snapshot(&platform)?;
        let image = capture_once(&*platform, &displays, Point::new(400.0, 300.0), 28, Color::BLACK)?;

        assert_eq!(image.size(), 28);
        // Nearest neighbour: preview pixel (i, j) samples still pixel (2i, 2j).
        assert_eq!(image.pixel(0, 0), Some(gradient_color(772, 572)));
        assert_eq!(image.center_color(), gradient_color(800, 600));
        Ok(())
    }

    #[test]
    fn fully_off_screen_never_calls_the_platform() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let displays = snapshot(&platform)?;
        let sentinel = Color::rgba(1, 2, 3, 4);
        let image = capture_once(&*platform, &displays, Point::new(5000.0, 5000.0), 28, sentinel)?;

        assert!(image.is_uniform(sentinel));
        assert!(platform.still_calls().is_empty());
        Ok(())
    }

    #[test]
    fn no_displays_yields_sentinel() -> CaptureResult<()> {
        let platform = MockPlatform::new(Vec::new());
        let image = capture_once(
            &*platform,
            &DisplaySnapshot::new(Vec::new()),
            Point::new(0.0, 0.0),
            28,
            Color::BLACK,
        )?;
        assert!(image.is_uniform(Color::BLACK));
        Ok(())
    }

    #[test]
    fn platform_failures_become_capture_once_failed() -> CaptureResult<()> {
        let platform = MockPlatform::two_displays();
        let displays = snapshot(&platform)?;

        platform.set_still_mode(StillMode::Fail);
        let err = capture_once(&*platform, &displays, Point::new(10.0, 10.0), 28, Color::BLACK)
            .unwrap_err();
        assert!(matches!(err, CaptureError::CaptureOnceFailed(ref m) if m.contains("still failed")));

        platform.set_still_mode(StillMode::Nothing);
        assert!(matches!(
            capture_once(&*platform, &displays, Point::new(10.0, 10.0), 28, Color::BLACK),
            Err(CaptureError::CaptureOnceFailed(_))
        ));
        Ok(())
    }
}
