//! Coordinate spaces and rectangle math.
//!
//! Three spaces are in play:
//!
//! * **pointer space**: what the windowing system reports for the mouse,
//!   origin at the bottom-left of the primary display, y grows upwards;
//! * **capture space**: origin at the top-left of the primary display,
//!   y grows downwards, logical units; display bounds live here;
//! * **display-local pixel space**: origin at the top-left of one display,
//!   scaled by that display's density.
//!
//! Everything here is pure. The only external input is the primary
//! display height, which the caller obtains from the registry.

/// A point in logical units. Which space it belongs to is decided by the
/// function that produced it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A rectangle in logical units.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge (exclusive).
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge (exclusive).
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Half-open containment: the left/top edges belong to the rectangle,
    /// the right/bottom edges belong to its neighbour.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if x < right && y < bottom {
            Some(Rect::new(x, y, right - x, bottom - y))
        } else {
            None
        }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(x, y, right - x, bottom - y)
    }
}

/// A rectangle of whole pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i64 {
        self.x + i64::from(self.width)
    }

    pub fn bottom(&self) -> i64 {
        self.y + i64::from(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn intersection(&self, other: &PixelRect) -> Option<PixelRect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if x < right && y < bottom {
            Some(PixelRect::new(x, y, (right - x) as u32, (bottom - y) as u32))
        } else {
            None
        }
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}

/// Pointer space → capture space.
pub fn to_capture_space(pointer: Point, primary_height: f64) -> Point {
    Point::new(pointer.x, primary_height - pointer.y)
}

/// Capture space → pointer space. The flip is its own inverse.
pub fn to_pointer_space(capture: Point, primary_height: f64) -> Point {
    Point::new(capture.x, primary_height - capture.y)
}

/// Express a capture-space point relative to a display's origin.
pub fn localize(point: Point, display_bounds: &Rect) -> Point {
    Point::new(point.x - display_bounds.x, point.y - display_bounds.y)
}

/// Multiply a logical rectangle by a density, snapping to whole pixels.
///
/// The origin is floored so that a fractional pointer position samples the
/// pixel it is actually over; the size is rounded so that `size * density`
/// never loses a pixel to float error.
pub fn scale(rect: &Rect, density: f64) -> PixelRect {
    PixelRect::new(
        (rect.x * density).floor() as i64,
        (rect.y * density).floor() as i64,
        (rect.width * density).round().max(0.0) as u32,
        (rect.height * density).round().max(0.0) as u32,
    )
}

/// The `size`×`size` window around `center`.
///
/// The origin sits `floor(size / 2)` before the center on each axis, so the
/// pixel under `center` lands at index `size / 2` for odd sizes as well.
pub fn requested_rect(center: Point, size: f64) -> Rect {
    let half = (size / 2.0).floor();
    Rect::new(center.x - half, center.y - half, size, size)
}
