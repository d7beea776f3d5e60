use std::time::{Duration, Instant};

use crate::error::{CaptureError, CaptureResult};
use crate::geometry::{PixelRect, Rect};

/// An 8-bit device-native RGBA sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    /// Fill for preview area that lies outside every display.
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    fn from_slice(px: &[u8]) -> Self {
        Self::rgba(px[0], px[1], px[2], px[3])
    }
}

/// Per-frame metadata stamped by whoever produced the pixels.
#[derive(Clone, Debug, Default)]
pub struct FrameMetadata {
    /// Monotonic timestamp taken right after the platform returned the
    /// pixels.
    pub capture_time: Option<Instant>,
    /// Time spent inside the platform capture call.
    pub capture_duration: Option<Duration>,
    /// Incremented for each frame a stream produces.
    pub sequence: u64,
}

/// A tightly packed RGBA8 pixel buffer.
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    pub metadata: FrameMetadata,
}

impl Frame {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            width: 0,
            height: 0,
            metadata: FrameMetadata::default(),
        }
    }

    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> CaptureResult<Self> {
        let expected = rgba_len(width, height)?;
        if data.len() != expected {
            return Err(CaptureError::InvalidConfig(format!(
                "RGBA frame data length mismatch: got {}, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }

        Ok(Self {
            data,
            width,
            height,
            metadata: FrameMetadata::default(),
        })
    }

    /// A `width`×`height` frame where every pixel is `color`.
    pub fn filled(width: u32, height: u32, color: Color) -> CaptureResult<Self> {
        let len = rgba_len(width, height)?;
        let px = color.to_bytes();
        let data = px.iter().copied().cycle().take(len).collect();
        Self::from_rgba8(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_rgba_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_rgba_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_rgba_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        Some(Color::from_slice(&self.data[offset..offset + 4]))
    }

    pub(crate) fn put_pixel(&mut self, x: u32, y: u32, px: &[u8]) {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        self.data[offset..offset + 4].copy_from_slice(&px[..4]);
    }

    pub(crate) fn pixel_bytes(&self, x: u32, y: u32) -> &[u8] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        &self.data[offset..offset + 4]
    }
}

fn rgba_len(width: u32, height: u32) -> CaptureResult<usize> {
    let w = usize::try_from(width).map_err(|_| CaptureError::BufferOverflow)?;
    let h = usize::try_from(height).map_err(|_| CaptureError::BufferOverflow)?;
    w.checked_mul(h)
        .and_then(|px| px.checked_mul(4))
        .ok_or(CaptureError::BufferOverflow)
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("data_len", &self.data.len())
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// A raw buffer plus what is needed to crop it: which pixel rectangle of
/// the display-local (or capture-space, for stills) pixel grid it covers,
/// and at what density.
#[derive(Debug)]
pub struct CapturedFrame {
    pub pixels: Frame,
    pub bounds: PixelRect,
    pub density: f64,
}

impl CapturedFrame {
    pub fn new(pixels: Frame, bounds: PixelRect, density: f64) -> Self {
        Self {
            pixels,
            bounds,
            density,
        }
    }

    /// A frame covering a whole display whose logical bounds are `display`.
    ///
    /// The density is derived from the buffer itself rather than trusted
    /// from the display record; some platforms report a backing scale that
    /// does not match what they actually deliver.
    pub fn whole_display(pixels: Frame, display: &Rect) -> Self {
        let density = density_of(pixels.width(), display.width);
        let bounds = PixelRect::new(0, 0, pixels.width(), pixels.height());
        Self::new(pixels, bounds, density)
    }
}

pub(crate) fn density_of(pixel_width: u32, logical_width: f64) -> f64 {
    if logical_width > 0.0 && pixel_width > 0 {
        f64::from(pixel_width) / logical_width
    } else {
        1.0
    }
}

/// The fixed-size magnified preview around the pointer.
///
/// Always square, always exactly the configured capture size, always fully
/// populated.
#[derive(Debug)]
pub struct PreviewImage {
    frame: Frame,
}

impl PreviewImage {
    pub(crate) fn from_frame(frame: Frame) -> Self {
        debug_assert_eq!(frame.width(), frame.height());
        Self { frame }
    }

    pub fn sentinel(size: u32, sentinel: Color) -> CaptureResult<Self> {
        Ok(Self::from_frame(Frame::filled(size, size, sentinel)?))
    }

    pub fn size(&self) -> u32 {
        self.frame.width()
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        self.frame.pixel(x, y)
    }

    /// The pixel directly under the pointer.
    pub fn center_color(&self) -> Color {
        let center = self.size() / 2;
        self.frame.pixel(center, center).unwrap_or(Color::BLACK)
    }

    /// Whether every pixel equals `color`.
    pub fn is_uniform(&self, color: Color) -> bool {
        let px = color.to_bytes();
        self.frame
            .as_rgba_bytes()
            .chunks_exact(4)
            .all(|chunk| chunk == px)
    }
}
