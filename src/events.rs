use crate::session::OutputChunk;
use serde_json::{json, Value};

/// One frame of a deployment progress stream: zero or more `Text` frames,
/// then exactly one terminal frame (`Error` or `Done`).
#[derive(Debug, Clone, PartialEq)]
pub enum DeployEvent {
    Text { text: String, stderr: bool },
    Error { message: String },
    Done { success: bool },
}

impl DeployEvent {
    pub fn from_chunk(chunk: OutputChunk) -> Self {
        DeployEvent::Text {
            // chunks arrive line-split; put the newline back for the viewer
            text: format!("{}\n", chunk.text),
            stderr: chunk.stderr,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        DeployEvent::Text {
            text: text.into(),
            stderr: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployEvent::Error { .. } | DeployEvent::Done { .. })
    }

    /// Wire shape consumed by the dashboard. `stderr` is only present when
    /// true, matching what the frontend already expects.
    pub fn to_json(&self) -> Value {
        match self {
            DeployEvent::Text { text, stderr } => {
                if *stderr {
                    json!({ "text": text, "stderr": true })
                } else {
                    json!({ "text": text })
                }
            }
            DeployEvent::Error { message } => json!({ "error": message }),
            DeployEvent::Done { success } => json!({ "done": true, "success": success }),
        }
    }

    pub fn to_sse(&self) -> axum::response::sse::Event {
        axum::response::sse::Event::default().data(self.to_json().to_string())
    }
}
