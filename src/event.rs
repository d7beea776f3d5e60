use std::sync::{Mutex, mpsc};

use crate::display::DisplayId;
use crate::error::CaptureError;

/// Diagnostics emitted by the engine. None of these require action from
/// the host; they exist for logging and UI status.
#[derive(Debug)]
pub enum EngineEvent {
    /// A continuous session is now delivering frames from `display`.
    SessionStarted { display: DisplayId },
    /// The continuous session on `display` was torn down, on request or
    /// ahead of a restart.
    SessionStopped { display: DisplayId },
    /// The pointer crossed onto another display and the session was
    /// rebuilt there.
    DisplaySwitched { from: DisplayId, to: DisplayId },
    /// The display configuration changed and the registry was refreshed.
    DisplaysChanged { count: usize },
    /// A session could not be started.
    StartFailed(CaptureError),
    /// A running session died asynchronously. The stream is idle now and
    /// may be started again.
    StreamFailed(CaptureError),
}

impl Clone for EngineEvent {
    fn clone(&self) -> Self {
        match self {
            Self::SessionStarted { display } => Self::SessionStarted { display: *display },
            Self::SessionStopped { display } => Self::SessionStopped { display: *display },
            Self::DisplaySwitched { from, to } => Self::DisplaySwitched {
                from: *from,
                to: *to,
            },
            Self::DisplaysChanged { count } => Self::DisplaysChanged { count: *count },
            Self::StartFailed(e) => Self::StartFailed(e.to_sendable()),
            Self::StreamFailed(e) => Self::StreamFailed(e.to_sendable()),
        }
    }
}

/// Fan-out of [`EngineEvent`]s to any number of subscribers. Subscribers
/// whose receiver was dropped are pruned on the next publish.
#[derive(Default)]
pub struct EventHub {
    senders: Mutex<Vec<mpsc::Sender<EngineEvent>>>,
    #[cfg(feature = "tokio-stream")]
    async_senders: Mutex<Vec<tokio::sync::mpsc::UnboundedSender<EngineEvent>>>,
}

impl EventHub {
    pub fn subscribe(&self) -> mpsc::Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel();
        self.senders
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(tx);
        rx
    }

    #[cfg(feature = "tokio-stream")]
    pub fn subscribe_async(&self) -> tokio::sync::mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.async_senders
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(tx);
        rx
    }

    pub fn publish(&self, event: EngineEvent) {
        match &event {
            EngineEvent::StartFailed(e) => log::warn!("capture session failed to start: {e}"),
            EngineEvent::StreamFailed(e) => log::warn!("capture stream failed: {e}"),
            other => log::debug!("engine event: {other:?}"),
        }

        {
            let mut senders = self.senders.lock().unwrap_or_else(|p| p.into_inner());
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
        #[cfg(feature = "tokio-stream")]
        {
            let mut senders = self.async_senders.lock().unwrap_or_else(|p| p.into_inner());
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}
