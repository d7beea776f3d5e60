use std::fmt;

#[derive(Debug)]
pub enum CaptureError {
    /// The platform refused screen capture access. Surfaced once and not
    /// retried automatically.
    PermissionDenied,

    NoDisplayFound,

    SessionStartFailed(anyhow::Error),

    /// The live stream died after it was started (capture revoked,
    /// display disappeared).
    StreamFailed(anyhow::Error),

    CaptureOnceFailed(String),

    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    InvalidConfig(String),

    BufferOverflow,

    /// A start was superseded by a `stop()` issued while it was in flight.
    Canceled,

    BackendUnavailable(String),

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureErrorClass {
    InvalidInput,
    Unsupported,
    Transient,
    Fatal,
}

impl CaptureError {
    pub fn class(&self) -> CaptureErrorClass {
        match self {
            Self::InvalidState { .. } | Self::InvalidConfig(_) | Self::NoDisplayFound => {
                CaptureErrorClass::InvalidInput
            }
            Self::PermissionDenied | Self::BackendUnavailable(_) => CaptureErrorClass::Unsupported,
            Self::SessionStartFailed(_)
            | Self::StreamFailed(_)
            | Self::CaptureOnceFailed(_)
            | Self::Canceled => CaptureErrorClass::Transient,
            Self::BufferOverflow | Self::Platform(_) => CaptureErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), CaptureErrorClass::Transient)
    }

    /// Create a string-based copy of this error suitable for sending
    /// through channels. Variants carrying an `anyhow::Error` keep the
    /// formatted chain but lose the typed sources.
    pub fn to_sendable(&self) -> Self {
        match self {
            Self::PermissionDenied => Self::PermissionDenied,
            Self::NoDisplayFound => Self::NoDisplayFound,
            Self::SessionStartFailed(inner) => {
                Self::SessionStartFailed(anyhow::anyhow!("{inner:#}"))
            }
            Self::StreamFailed(inner) => Self::StreamFailed(anyhow::anyhow!("{inner:#}")),
            Self::CaptureOnceFailed(s) => Self::CaptureOnceFailed(s.clone()),
            Self::InvalidState { operation, state } => Self::InvalidState {
                operation,
                state,
            },
            Self::InvalidConfig(s) => Self::InvalidConfig(s.clone()),
            Self::BufferOverflow => Self::BufferOverflow,
            Self::Canceled => Self::Canceled,
            Self::BackendUnavailable(s) => Self::BackendUnavailable(s.clone()),
            Self::Platform(inner) => Self::Platform(anyhow::anyhow!("{inner:#}")),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "screen capture permission was not granted"),
            Self::NoDisplayFound => write!(f, "no capturable display found"),
            Self::SessionStartFailed(inner) => {
                write!(f, "failed to start capture session: {inner}")
            }
            Self::StreamFailed(inner) => write!(f, "capture stream failed: {inner}"),
            Self::CaptureOnceFailed(message) => {
                write!(f, "single-frame capture failed: {message}")
            }
            Self::InvalidState { operation, state } => {
                write!(f, "`{operation}` is not valid while the stream is {state}")
            }
            Self::InvalidConfig(message) => write!(f, "invalid capture configuration: {message}"),
            Self::BufferOverflow => write!(f, "frame buffer size overflow"),
            Self::Canceled => write!(f, "capture session start was canceled"),
            Self::BackendUnavailable(message) => {
                write!(f, "no available capture platform: {message}")
            }
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SessionStartFailed(inner) | Self::StreamFailed(inner) | Self::Platform(inner) => {
                Some(inner.as_ref())
            }
            _ => None,
        }
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;
