//! Cropping a captured buffer down to the preview window, padding whatever
//! falls outside the buffer with the sentinel color.
//!
//! The same routine serves the live stream (buffer = one whole display,
//! display-local pixels) and the one-shot path (buffer = a still of the
//! clamped window, capture-space pixels). Only the coordinate frame of the
//! [`CropRequest`] differs.

use crate::display::{Display, DisplayId};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{CapturedFrame, Color, Frame, PreviewImage};
use crate::geometry::{self, PixelRect, Point, Rect};

/// Source/destination rectangle pair for a straight RGBA copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BlitRegion {
    pub src_x: u32,
    pub src_y: u32,
    pub width: u32,
    pub height: u32,
    pub dst_x: u32,
    pub dst_y: u32,
}

/// The window around the pointer that a preview should show.
#[derive(Clone, Debug, PartialEq)]
pub struct CropRequest {
    /// Display the window was resolved against, if any.
    pub display: Option<DisplayId>,
    /// The window in capture space.
    pub requested: Rect,
    /// The window in the buffer's own logical frame (display-local for
    /// stream frames).
    pub local: Rect,
    pub density: f64,
    /// `local` scaled by `density`.
    pub pixel_rect: PixelRect,
    /// Output edge length, in preview pixels.
    pub output_size: u32,
}

impl CropRequest {
    /// Window centered on `cursor` (capture space), expressed in
    /// `display`'s local pixel grid.
    pub fn for_display(cursor: Point, display: &Display, output_size: u32) -> Self {
        let requested = geometry::requested_rect(cursor, f64::from(output_size));
        let local_origin = geometry::localize(requested.origin(), &display.bounds());
        let local = Rect::new(
            local_origin.x,
            local_origin.y,
            requested.width,
            requested.height,
        );
        Self::build(Some(display.id()), requested, local, display.scale_factor(), output_size)
    }

    /// Window centered on `cursor` in capture space, with no display
    /// translation. Used for stills, whose pixels are addressed in
    /// capture space directly.
    pub fn for_capture_space(cursor: Point, density: f64, output_size: u32) -> Self {
        let requested = geometry::requested_rect(cursor, f64::from(output_size));
        Self::build(None, requested, requested, density, output_size)
    }

    /// Same window, re-expressed at another density.
    pub fn at_density(&self, density: f64) -> Self {
        Self::build(self.display, self.requested, self.local, density, self.output_size)
    }

    fn build(
        display: Option<DisplayId>,
        requested: Rect,
        local: Rect,
        density: f64,
        output_size: u32,
    ) -> Self {
        Self {
            display,
            requested,
            local,
            density,
            pixel_rect: geometry::scale(&local, density),
            output_size,
        }
    }
}

/// Produce the `output_size`×`output_size` preview for `request` out of
/// `frame`.
///
/// Pixels of the window that are not covered by the frame are filled with
/// `sentinel`, so the result always has the full size.
pub fn crop_and_pad(
    frame: &CapturedFrame,
    request: &CropRequest,
    sentinel: Color,
) -> CaptureResult<PreviewImage> {
    if request.output_size == 0 {
        return Err(CaptureError::InvalidConfig(
            "preview size must be > 0".into(),
        ));
    }
    let request = if (frame.density - request.density).abs() > f64::EPSILON {
        request.at_density(frame.density)
    } else {
        request.clone()
    };
    let size = request.output_size;
    let requested = request.pixel_rect;

    let Some(clamped) = requested.intersection(&frame.bounds) else {
        return PreviewImage::sentinel(size, sentinel);
    };

    let extracted = extract(frame, clamped)?;

    if clamped == requested {
        return Ok(PreviewImage::from_frame(resample(&extracted, size)?));
    }

    let mut canvas = Frame::filled(size, size, sentinel)?;
    composite(&mut canvas, &extracted, &requested, &clamped);
    Ok(PreviewImage::from_frame(canvas))
}

/// Copy `rect` (same pixel grid as `frame.bounds`) out of the buffer.
fn extract(frame: &CapturedFrame, rect: PixelRect) -> CaptureResult<Frame> {
    let mut out = Frame::filled(rect.width, rect.height, Color::BLACK)?;
    let blit = BlitRegion {
        src_x: u32::try_from(rect.x - frame.bounds.x).map_err(|_| CaptureError::BufferOverflow)?,
        src_y: u32::try_from(rect.y - frame.bounds.y).map_err(|_| CaptureError::BufferOverflow)?,
        width: rect.width,
        height: rect.height,
        dst_x: 0,
        dst_y: 0,
    };
    copy_region_rgba(&frame.pixels, blit, &mut out)?;
    Ok(out)
}

/// Nearest-neighbour resample of a square-ish buffer to `size`×`size`.
/// Identity when the buffer already has that size.
fn resample(src: &Frame, size: u32) -> CaptureResult<Frame> {
    if src.dimensions() == (size, size) {
        let bytes = src.as_rgba_bytes().to_vec();
        return Frame::from_rgba8(size, size, bytes);
    }
    let ratio_x = f64::from(src.width()) / f64::from(size);
    let ratio_y = f64::from(src.height()) / f64::from(size);
    let mut out = Frame::filled(size, size, Color::BLACK)?;
    for oy in 0..size {
        let sy = ((f64::from(oy) * ratio_y) as u32).min(src.height() - 1);
        for ox in 0..size {
            let sx = ((f64::from(ox) * ratio_x) as u32).min(src.width() - 1);
            out.put_pixel(ox, oy, src.pixel_bytes(sx, sy));
        }
    }
    Ok(out)
}

/// Draw `sub` (the pixels of `clamped`) into the preview canvas at the
/// position `clamped` occupies inside `requested`, converting pixel
/// offsets back to preview units.
fn composite(canvas: &mut Frame, sub: &Frame, requested: &PixelRect, clamped: &PixelRect) {
    let size = canvas.width();
    let ratio_x = f64::from(requested.width) / f64::from(size);
    let ratio_y = f64::from(requested.height) / f64::from(size);
    let dx = clamped.x - requested.x;
    let dy = clamped.y - requested.y;

    for oy in 0..size {
        let sy = (f64::from(oy) * ratio_y) as i64 - dy;
        if sy < 0 || sy >= i64::from(sub.height()) {
            continue;
        }
        for ox in 0..size {
            let sx = (f64::from(ox) * ratio_x) as i64 - dx;
            if sx < 0 || sx >= i64::from(sub.width()) {
                continue;
            }
            canvas.put_pixel(ox, oy, sub.pixel_bytes(sx as u32, sy as u32));
        }
    }
}

pub(crate) fn copy_region_rgba(src: &Frame, blit: BlitRegion, dst: &mut Frame) -> CaptureResult<()> {
    if blit.width == 0 || blit.height == 0 {
        return Ok(());
    }

    let src_w = src.width() as usize;
    let src_h = src.height() as usize;
    let dst_w = dst.width() as usize;
    let dst_h = dst.height() as usize;

    let src_x = blit.src_x as usize;
    let src_y = blit.src_y as usize;
    let dst_x = blit.dst_x as usize;
    let dst_y = blit.dst_y as usize;
    let copy_w = blit.width as usize;
    let copy_h = blit.height as usize;

    let src_right = src_x
        .checked_add(copy_w)
        .ok_or(CaptureError::BufferOverflow)?;
    let src_bottom = src_y
        .checked_add(copy_h)
        .ok_or(CaptureError::BufferOverflow)?;
    let dst_right = dst_x
        .checked_add(copy_w)
        .ok_or(CaptureError::BufferOverflow)?;
    let dst_bottom = dst_y
        .checked_add(copy_h)
        .ok_or(CaptureError::BufferOverflow)?;

    if src_right > src_w || src_bottom > src_h || dst_right > dst_w || dst_bottom > dst_h {
        return Err(CaptureError::BufferOverflow);
    }

    let src_stride = src_w.checked_mul(4).ok_or(CaptureError::BufferOverflow)?;
    let dst_stride = dst_w.checked_mul(4).ok_or(CaptureError::BufferOverflow)?;
    let row_bytes = copy_w.checked_mul(4).ok_or(CaptureError::BufferOverflow)?;

    let src_bytes = src.as_rgba_bytes();
    if src_bytes.len() < src_stride * src_h {
        return Err(CaptureError::BufferOverflow);
    }
    let dst_bytes = dst.as_mut_rgba_bytes();

    let mut src_row_start = src_y * src_stride + src_x * 4;
    let mut dst_row_start = dst_y * dst_stride + dst_x * 4;
    for _ in 0..copy_h {
        dst_bytes[dst_row_start..dst_row_start + row_bytes]
            .copy_from_slice(&src_bytes[src_row_start..src_row_start + row_bytes]);
        src_row_start += src_stride;
        dst_row_start += dst_stride;
    }
    Ok(())
}
