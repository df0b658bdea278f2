//! Shared types between the mentor core and any frontend
//!
//! These types are used by:
//! - the chat session controller and document stores (native Rust)
//! - the persistence service contract (JSON over HTTP)
//! - the streamed chat response (UI message stream frames over SSE)
//!
//! Serializable with serde; frontend-facing types export TypeScript bindings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

// ============================================================================
// Identifiers
// ============================================================================

/// Generate a new sortable message/part identifier (ULID).
pub fn new_message_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Generate a new thread identifier (UUID v4).
pub fn new_thread_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// Completion state of a message or a streamed part.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum StreamState {
    Streaming,
    #[default]
    Done,
}

/// Tool execution state inside a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum ToolState {
    InputStreaming,
    InputAvailable,
    OutputAvailable,
    OutputError,
}

/// Atomic content unit inside a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum MessagePart {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<StreamState>,
    },

    Reasoning {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<StreamState>,
    },

    #[serde(rename = "tool-invocation")]
    Tool {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        state: ToolState,
        /// Raw input text accumulated while the input streams.
        #[serde(rename = "inputText", default, skip_serializing_if = "String::is_empty")]
        input_text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        #[ts(type = "unknown")]
        input: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        #[ts(type = "unknown")]
        output: Option<Value>,
        #[serde(rename = "errorText", default, skip_serializing_if = "Option::is_none")]
        error_text: Option<String>,
    },

    /// Custom data payload (from a `data-*` frame that is not document-related).
    Data {
        name: String,
        #[ts(type = "unknown")]
        data: Value,
    },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            state: None,
        }
    }
}

/// One turn of a thread.
///
/// `parent_id` is a weak reference used only to rebuild the active path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub status: StreamState,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            id: new_message_id(),
            role: MessageRole::User,
            parts: vec![MessagePart::text(text)],
            parent_id,
            status: StreamState::Done,
            created_at: Utc::now(),
        }
    }

    /// Empty assistant message that is about to be streamed into.
    pub fn assistant(id: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::Assistant,
            parts: Vec::new(),
            parent_id,
            status: StreamState::Streaming,
            created_at: Utc::now(),
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

// ============================================================================
// Threads and votes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct Vote {
    pub message_id: String,
    pub is_upvoted: bool,
}

/// Persisted thread detail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct Thread {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub selected_leaf_id: Option<String>,
    #[serde(default)]
    pub votes: Vec<Vote>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct ThreadSummary {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

/// Sidebar group ("Today", "Last 7 days", ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct ThreadGroup {
    pub label: String,
    pub threads: Vec<ThreadSummary>,
}

// ============================================================================
// Documents
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum DocumentKind {
    #[default]
    Text,
    Code,
    Sheet,
    Image,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Text => "text",
            DocumentKind::Code => "code",
            DocumentKind::Sheet => "sheet",
            DocumentKind::Image => "image",
        }
    }
}

/// Immutable snapshot addressed by `(id, version_number)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub kind: DocumentKind,
    pub version_number: u32,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Request bodies
// ============================================================================

/// Chat stream request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct SendMessageRequest {
    /// Thread id
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default)]
    pub previous_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub greeting: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct SaveDocumentRequest {
    pub content: String,
    pub title: String,
    pub kind: DocumentKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct VoteRequest {
    pub is_upvoted: bool,
}

// ============================================================================
// Artifact overlay
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A `width` x `height` rectangle centered inside `self`.
    pub fn centered(&self, width: f64, height: f64) -> Self {
        Self {
            x: self.x + (self.width - width) / 2.0,
            y: self.y + (self.height - height) / 2.0,
            width,
            height,
        }
    }
}

/// `"kind:documentId"`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct ArtifactId(pub String);

impl ArtifactId {
    pub fn new(kind: DocumentKind, document_id: &str) -> Self {
        Self(format!("{}:{}", kind.as_str(), document_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn document_id(&self) -> &str {
        self.0.split_once(':').map(|(_, id)| id).unwrap_or(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct ArtifactOverlay {
    pub artifact_id: ArtifactId,
    pub anchor: Rect,
    pub title: String,
    pub visible: bool,
}

// ============================================================================
// Stream frames
// ============================================================================

/// One discrete typed unit of the streamed chat response.
///
/// Follows the UI message stream protocol: `{"type": "...", ...}` per frame,
/// with custom payloads carried as `data-<name>` frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamFrame {
    Start {
        #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(rename = "messageMetadata", default, skip_serializing_if = "Option::is_none")]
        message_metadata: Option<Value>,
    },

    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },

    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },

    ToolInputStart {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
    },
    ToolInputDelta {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "inputTextDelta")]
        input_text_delta: String,
    },
    ToolInputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },
    ToolOutputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        output: Value,
    },
    ToolOutputError {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "errorText")]
        error_text: String,
    },

    StartStep,
    FinishStep,

    Finish {
        #[serde(rename = "finishReason", default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
        #[serde(rename = "messageMetadata", default, skip_serializing_if = "Option::is_none")]
        message_metadata: Option<Value>,
    },
    Abort {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },

    /// Custom data frame (`data-*`).
    #[serde(untagged)]
    Data {
        #[serde(rename = "type")]
        data_type: String,
        data: Value,
    },
}

/// Frame type names with a fixed shape; anything else that is not `data-*`
/// is an unknown frame.
pub const KNOWN_FRAME_TYPES: &[&str] = &[
    "start",
    "text-start",
    "text-delta",
    "text-end",
    "reasoning-start",
    "reasoning-delta",
    "reasoning-end",
    "tool-input-start",
    "tool-input-delta",
    "tool-input-available",
    "tool-output-available",
    "tool-output-error",
    "start-step",
    "finish-step",
    "finish",
    "abort",
    "error",
];

pub const FRAME_DOCUMENT_CREATE: &str = "data-document-create";
pub const FRAME_DOCUMENT_UPDATE: &str = "data-document-update";
pub const FRAME_DOCUMENT_DELTA: &str = "data-document-delta";
pub const FRAME_DOCUMENT_FINISH: &str = "data-document-finish";

impl StreamFrame {
    pub fn start(message_id: Option<String>) -> Self {
        Self::Start {
            message_id,
            message_metadata: None,
        }
    }

    pub fn text_start(id: impl Into<String>) -> Self {
        Self::TextStart { id: id.into() }
    }

    pub fn text_delta(id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::TextDelta {
            id: id.into(),
            delta: delta.into(),
        }
    }

    pub fn text_end(id: impl Into<String>) -> Self {
        Self::TextEnd { id: id.into() }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self::Finish {
            finish_reason: Some(reason.into()),
            message_metadata: None,
        }
    }

    pub fn error(error_text: impl Into<String>) -> Self {
        Self::Error {
            error_text: error_text.into(),
        }
    }

    pub fn data(name: impl Into<String>, data: Value) -> Self {
        Self::Data {
            data_type: format!("data-{}", name.into()),
            data,
        }
    }

    /// Frames after which the server sends nothing more.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamFrame::Finish { .. } | StreamFrame::Abort { .. } | StreamFrame::Error { .. }
        )
    }

    /// Typed view of a `data-document-*` frame.
    ///
    /// Returns `Ok(None)` for every other frame and `Err` when a document
    /// frame carries a malformed payload.
    pub fn document_frame(&self) -> Result<Option<DocumentFrame>, serde_json::Error> {
        let StreamFrame::Data { data_type, data } = self else {
            return Ok(None);
        };
        let frame = match data_type.as_str() {
            FRAME_DOCUMENT_CREATE => {
                let payload: DocumentCreatePayload = serde_json::from_value(data.clone())?;
                DocumentFrame::Create {
                    id: payload.id,
                    title: payload.title,
                    kind: payload.kind.unwrap_or_default(),
                }
            }
            FRAME_DOCUMENT_UPDATE => {
                let payload: DocumentIdPayload = serde_json::from_value(data.clone())?;
                DocumentFrame::Update { id: payload.id }
            }
            FRAME_DOCUMENT_DELTA => {
                let payload: DocumentDeltaPayload = serde_json::from_value(data.clone())?;
                DocumentFrame::Delta {
                    id: payload.id,
                    delta: payload.delta,
                }
            }
            FRAME_DOCUMENT_FINISH => {
                let payload: DocumentIdPayload = serde_json::from_value(data.clone())?;
                DocumentFrame::Finish { id: payload.id }
            }
            _ => return Ok(None),
        };
        Ok(Some(frame))
    }
}

/// Document-related data frames routed to the draft store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentFrame {
    Create {
        id: String,
        title: String,
        kind: DocumentKind,
    },
    Update {
        id: String,
    },
    Delta {
        id: String,
        delta: String,
    },
    Finish {
        id: String,
    },
}

impl DocumentFrame {
    pub fn id(&self) -> &str {
        match self {
            DocumentFrame::Create { id, .. }
            | DocumentFrame::Update { id }
            | DocumentFrame::Delta { id, .. }
            | DocumentFrame::Finish { id } => id,
        }
    }

    /// Wire representation as a `data-document-*` frame.
    pub fn into_frame(self) -> StreamFrame {
        match self {
            DocumentFrame::Create { id, title, kind } => StreamFrame::Data {
                data_type: FRAME_DOCUMENT_CREATE.to_string(),
                data: serde_json::json!({ "id": id, "title": title, "kind": kind }),
            },
            DocumentFrame::Update { id } => StreamFrame::Data {
                data_type: FRAME_DOCUMENT_UPDATE.to_string(),
                data: serde_json::json!({ "id": id }),
            },
            DocumentFrame::Delta { id, delta } => StreamFrame::Data {
                data_type: FRAME_DOCUMENT_DELTA.to_string(),
                data: serde_json::json!({ "id": id, "delta": delta }),
            },
            DocumentFrame::Finish { id } => StreamFrame::Data {
                data_type: FRAME_DOCUMENT_FINISH.to_string(),
                data: serde_json::json!({ "id": id }),
            },
        }
    }
}

#[derive(Deserialize)]
struct DocumentCreatePayload {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    kind: Option<DocumentKind>,
}

#[derive(Deserialize)]
struct DocumentIdPayload {
    id: String,
}

#[derive(Deserialize)]
struct DocumentDeltaPayload {
    id: String,
    delta: String,
}

// ============================================================================
// Tests
// ============================================================================
