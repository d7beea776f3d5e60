//! Reference counting of preview consumers.
//!
//! The stream runs while at least one consumer (a visible magnifier, a
//! picker overlay) is present. Only the first consumer to appear starts it
//! and only the last one to go away stops it.

use std::sync::{Mutex, MutexGuard};

use crate::error::CaptureResult;

/// What [`PreviewActivation`] drives.
pub trait StreamLifecycle {
    fn start_stream(&self) -> CaptureResult<()>;
    fn stop_stream(&self) -> CaptureResult<()>;
}

#[derive(Debug, Default)]
pub struct PreviewActivation {
    consumers: Mutex<usize>,
}

impl PreviewActivation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consumers(&self) -> usize {
        *self.lock()
    }

    /// Register a consumer. Starts the stream on the 0 -> 1 transition.
    ///
    /// The consumer is counted even when the start fails.
    pub fn consumer_appeared(&self, stream: &dyn StreamLifecycle) -> CaptureResult<()> {
        let mut consumers = self.lock();
        *consumers += 1;
        if *consumers == 1 {
            log::debug!("first preview consumer appeared, starting stream");
            stream.start_stream()
        } else {
            Ok(())
        }
    }

    /// Unregister a consumer. Stops the stream on the 1 -> 0 transition;
    /// unmatched calls are ignored.
    pub fn consumer_disappeared(&self, stream: &dyn StreamLifecycle) -> CaptureResult<()> {
        let mut consumers = self.lock();
        match *consumers {
            0 => {
                log::debug!("preview consumer disappeared without appearing");
                Ok(())
            }
            1 => {
                *consumers = 0;
                log::debug!("last preview consumer gone, stopping stream");
                stream.stop_stream()
            }
            _ => {
                *consumers -= 1;
                Ok(())
            }
        }
    }

    // Held across start/stop so that transitions never interleave.
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.consumers.lock().unwrap_or_else(|p| p.into_inner())
    }
}
