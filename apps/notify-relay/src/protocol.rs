use std::fmt;
use std::sync::Arc;

use serde::de::IgnoredAny;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("notification body is empty")]
    Empty,
    #[error("notification body is not UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("notification body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// One already-serialized event. The relay never looks inside it; clones
/// share the same buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct NotificationPayload(Arc<str>);

impl NotificationPayload {
    /// Accepts a request body as-is once it parses as a JSON document.
    pub fn from_json_bytes(body: &[u8]) -> Result<Self, PayloadError> {
        let text = std::str::from_utf8(body)?;
        if text.trim().is_empty() {
            return Err(PayloadError::Empty);
        }
        serde_json::from_str::<IgnoredAny>(text)?;
        Ok(Self(Arc::from(text)))
    }

    /// Rebuilds a payload that was validated before it was persisted.
    pub(crate) fn from_stored(text: String) -> Self {
        Self(Arc::from(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for NotificationPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 64;
        if self.0.len() <= PREVIEW {
            write!(f, "NotificationPayload({})", self.0)
        } else {
            let cut = (0..=PREVIEW)
                .rev()
                .find(|idx| self.0.is_char_boundary(*idx))
                .unwrap_or(0);
            write!(f, "NotificationPayload({}… {} bytes)", &self.0[..cut], self.0.len())
        }
    }
}

/// Frames the relay writes to a peer. Liveness replies are produced by the
/// peer's WebSocket stack and only ever arrive inbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(NotificationPayload),
    Probe,
    Close,
}
