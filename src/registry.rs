//! Cached view of the connected displays.
//!
//! Enumerating displays is comparatively expensive (and on some platforms
//! triggers a permission check), so the registry only re-queries when told
//! to: at session start and on display-configuration changes. Between
//! refreshes readers share one immutable [`DisplaySnapshot`]; a refresh
//! swaps in a new snapshot wholesale.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::backend::CapturePlatform;
use crate::display::{Display, DisplayId};
use crate::error::{CaptureError, CaptureResult};
use crate::geometry::{Point, Rect};

#[derive(Debug, Default)]
pub struct DisplaySnapshot {
    /// Sorted by ascending id; lookups walk this order, so the lowest id
    /// wins when displays overlap (mirroring).
    displays: Vec<Display>,
    index: FxHashMap<DisplayId, usize>,
    refreshed_at: Option<Instant>,
}

impl DisplaySnapshot {
    pub fn new(mut displays: Vec<Display>) -> Self {
        displays.sort_by_key(|d| d.id());
        displays.dedup_by_key(|d| d.id());
        let index = displays
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id(), i))
            .collect();
        Self {
            displays,
            index,
            refreshed_at: Some(Instant::now()),
        }
    }

    pub fn displays(&self) -> &[Display] {
        &self.displays
    }

    pub fn is_empty(&self) -> bool {
        self.displays.is_empty()
    }

    pub fn refreshed_at(&self) -> Option<Instant> {
        self.refreshed_at
    }

    pub fn display(&self, id: DisplayId) -> Option<&Display> {
        self.index.get(&id).map(|&i| &self.displays[i])
    }

    /// The designated primary display, or the first one if none claims it.
    pub fn primary(&self) -> Option<&Display> {
        self.displays
            .iter()
            .find(|d| d.is_primary())
            .or_else(|| self.displays.first())
    }

    /// The display whose bounds contain `point` (capture space).
    ///
    /// The pointer can transiently report positions outside every display
    /// while the configuration changes, so a miss falls back to the primary
    /// display and then to any display.
    pub fn display_containing(&self, point: Point) -> Option<&Display> {
        if let Some(hit) = self.displays.iter().find(|d| d.contains(point)) {
            return Some(hit);
        }
        let fallback = self.primary();
        if let Some(display) = fallback {
            log::debug!(
                "point ({}, {}) is outside every display, falling back to {display}",
                point.x,
                point.y
            );
        }
        fallback
    }

    pub fn primary_height(&self) -> Option<f64> {
        self.primary().map(|d| d.bounds().height)
    }

    /// Bounding box of every display, in capture space.
    pub fn combined_bounds(&self) -> Option<Rect> {
        let mut iter = self.displays.iter().map(Display::bounds);
        let first = iter.next()?;
        Some(iter.fold(first, |acc, b| acc.union(&b)))
    }
}

pub struct DisplayRegistry {
    platform: Arc<dyn CapturePlatform>,
    state: RwLock<Arc<DisplaySnapshot>>,
    generation: AtomicU64,
}

impl DisplayRegistry {
    /// Create an empty registry. Nothing is enumerated until the first
    /// [`refresh`](Self::refresh).
    pub fn new(platform: Arc<dyn CapturePlatform>) -> Self {
        Self {
            platform,
            state: RwLock::new(Arc::new(DisplaySnapshot::default())),
            generation: AtomicU64::new(0),
        }
    }

    /// Bumped on every successful refresh.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Re-query the platform and replace the cached snapshot.
    pub fn refresh(&self) -> CaptureResult<Arc<DisplaySnapshot>> {
        let displays = self.platform.enumerate_displays()?;
        let snapshot = Arc::new(DisplaySnapshot::new(displays));
        {
            let mut state = self.state.write().map_err(|_| {
                CaptureError::Platform(anyhow::anyhow!("display registry rwlock was poisoned"))
            })?;
            *state = snapshot.clone();
        }
        self.generation.fetch_add(1, Ordering::Release);
        log::debug!(
            "display registry refreshed: {} display(s)",
            snapshot.displays().len()
        );
        Ok(snapshot)
    }

    /// The current snapshot, without touching the platform.
    pub fn snapshot(&self) -> Arc<DisplaySnapshot> {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The current snapshot, enumerating once if the registry has never
    /// been refreshed.
    pub fn snapshot_or_refresh(&self) -> CaptureResult<Arc<DisplaySnapshot>> {
        let snapshot = self.snapshot();
        if snapshot.refreshed_at().is_none() {
            return self.refresh();
        }
        Ok(snapshot)
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn display_containing(&self, point: Point) -> CaptureResult<Display> {
        self.snapshot()
            .display_containing(point)
            .cloned()
            .ok_or(CaptureError::NoDisplayFound)
    }

    pub fn display(&self, id: DisplayId) -> Option<Display> {
        self.snapshot().display(id).cloned()
    }

    pub fn scale_factor(&self, id: DisplayId) -> Option<f64> {
        self.snapshot().display(id).map(Display::scale_factor)
    }

    pub fn primary_height(&self) -> Option<f64> {
        self.snapshot().primary_height()
    }

    pub fn combined_bounds(&self) -> Option<Rect> {
        self.snapshot().combined_bounds()
    }
}
