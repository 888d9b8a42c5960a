use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::GenerationStatus;

/// Progress notification delivered to the caller's channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// A run moved to a new status
    Status {
        id: String,
        status: GenerationStatus,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// A fenced code block completed while the code was streaming
    CodeBlock {
        id: String,
        index: usize,
        language: String,
        code: String,
        timestamp: DateTime<Utc>,
    },
}

impl GenerationEvent {
    pub fn status(id: &str, status: GenerationStatus, message: &str) -> Self {
        Self::Status {
            id: id.to_string(),
            status,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Id of the expectation the event belongs to
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Status { id, .. } | Self::CodeBlock { id, .. } => id,
        }
    }
}

/// Deliver `event`; a closed receiver is logged and otherwise ignored.
/// Returns whether the receiver is still open.
pub(crate) fn emit(sink: Option<&UnboundedSender<GenerationEvent>>, event: GenerationEvent) -> bool {
    let Some(sink) = sink else {
        return true;
    };
    match sink.send(event) {
        Ok(()) => true,
        Err(e) => {
            debug!(id = %e.0.id(), "Event receiver closed, dropping event");
            false
        }
    }
}
