use std::fmt;

use crate::geometry::{Point, Rect};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayId(u32);

impl DisplayId {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "display-{}", self.0)
    }
}

/// One capturable display as seen at the last registry refresh.
#[derive(Clone, Debug, PartialEq)]
pub struct Display {
    id: DisplayId,
    name: String,
    /// Bounds in capture space, logical units.
    bounds: Rect,
    /// Physical pixels per logical unit.
    scale_factor: f64,
    is_primary: bool,
}

impl Display {
    pub fn new(
        id: DisplayId,
        name: impl Into<String>,
        bounds: Rect,
        scale_factor: f64,
        is_primary: bool,
    ) -> Self {
        // A zero or non-finite density would collapse every crop to nothing.
        let scale_factor = if scale_factor.is_finite() && scale_factor > 0.0 {
            scale_factor
        } else {
            1.0
        };
        Self {
            id,
            name: name.into(),
            bounds,
            scale_factor,
            is_primary,
        }
    }

    pub fn id(&self) -> DisplayId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn contains(&self, point: Point) -> bool {
        self.bounds.contains(point)
    }
}

impl fmt::Display for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} ({})", self.name, self.id)
        }
    }
}
