//! Stream event vocabulary.
//!
//! A generator yields [`StreamUnit`]s. The server wraps each one into a
//! [`StreamEvent`], adds the terminal `done`/`error` events itself, and puts
//! every event on the wire as one SSE frame: the `event:` field carries
//! [`StreamEvent::event_type`], the `data:` field carries the JSON payload
//! from [`StreamEvent::to_data`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Event type tags
// ─────────────────────────────────────────────────────────────────────────────

/// SSE `event:` tags.
pub mod event_type {
    pub const TEXT_DELTA: &str = "text-delta";
    pub const TOOL_CALL: &str = "tool-call";
    pub const TOOL_RESULT: &str = "tool-result";
    pub const STEP_START: &str = "step-start";
    pub const STEP_FINISH: &str = "step-finish";
    pub const FINISH: &str = "finish";
    pub const DONE: &str = "done";
    pub const ERROR: &str = "error";
}

/// Token usage reported with the final result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream Unit
// ─────────────────────────────────────────────────────────────────────────────

/// One unit produced by a generator.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUnit {
    /// Text being streamed.
    TextDelta { text: String },
    /// The model requested a tool call.
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    /// A tool call finished.
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: Value,
        success: bool,
    },
    /// A generation step began.
    StepStart { step: u32 },
    /// A generation step ended.
    StepFinish {
        step: u32,
        finish_reason: Option<String>,
    },
    /// The final result of the generation.
    Finish { text: String, usage: Option<Usage> },
}

impl StreamUnit {
    /// Create a text delta.
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    /// Create a tool call.
    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self::ToolCall {
            tool_call_id: id.into(),
            tool_name: name.into(),
            input,
        }
    }

    /// Create a tool result.
    pub fn tool_result(
        id: impl Into<String>,
        name: impl Into<String>,
        output: Value,
        success: bool,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: id.into(),
            tool_name: name.into(),
            output,
            success,
        }
    }

    /// Create a finish unit.
    pub fn finish(text: impl Into<String>) -> Self {
        Self::Finish {
            text: text.into(),
            usage: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream Event
// ─────────────────────────────────────────────────────────────────────────────

/// An event as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        output: Value,
        #[serde(default = "default_true")]
        success: bool,
    },
    StepStart {
        step: u32,
    },
    StepFinish {
        step: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
    Finish {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    /// The stream completed normally.
    Done,
    /// The generation failed.
    Error {
        error: String,
    },
}

fn default_true() -> bool {
    true
}

/// Error decoding an SSE frame into a [`StreamEvent`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame data for '{0}' is not a JSON object")]
    NotAnObject(String),

    #[error("invalid '{event_type}' frame: {source}")]
    Invalid {
        event_type: String,
        source: serde_json::Error,
    },
}

impl StreamEvent {
    /// Create an error event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// SSE `event:` tag for this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => event_type::TEXT_DELTA,
            Self::ToolCall { .. } => event_type::TOOL_CALL,
            Self::ToolResult { .. } => event_type::TOOL_RESULT,
            Self::StepStart { .. } => event_type::STEP_START,
            Self::StepFinish { .. } => event_type::STEP_FINISH,
            Self::Finish { .. } => event_type::FINISH,
            Self::Done => event_type::DONE,
            Self::Error { .. } => event_type::ERROR,
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }

    /// JSON payload for the SSE `data:` field (the event without its tag).
    pub fn to_data(&self) -> Result<String, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(ref mut map) = value {
            map.remove("type");
        }
        serde_json::to_string(&value)
    }

    /// Rebuild an event from an SSE frame's `event:` and `data:` fields.
    ///
    /// Empty data is accepted for payload-less events such as `done`.
    pub fn from_frame(event_type: &str, data: &str) -> Result<Self, FrameError> {
        let mut value = if data.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(data).map_err(|source| FrameError::Invalid {
                event_type: event_type.to_string(),
                source,
            })?
        };

        let Value::Object(ref mut map) = value else {
            return Err(FrameError::NotAnObject(event_type.to_string()));
        };
        map.insert("type".to_string(), Value::String(event_type.to_string()));

        serde_json::from_value(value).map_err(|source| FrameError::Invalid {
            event_type: event_type.to_string(),
            source,
        })
    }
}

impl From<StreamUnit> for StreamEvent {
    fn from(unit: StreamUnit) -> Self {
        match unit {
            StreamUnit::TextDelta { text } => Self::TextDelta { text },
            StreamUnit::ToolCall {
                tool_call_id,
                tool_name,
                input,
            } => Self::ToolCall {
                tool_call_id,
                tool_name,
                input,
            },
            StreamUnit::ToolResult {
                tool_call_id,
                tool_name,
                output,
                success,
            } => Self::ToolResult {
                tool_call_id,
                tool_name,
                output,
                success,
            },
            StreamUnit::StepStart { step } => Self::StepStart { step },
            StreamUnit::StepFinish {
                step,
                finish_reason,
            } => Self::StepFinish {
                step,
                finish_reason,
            },
            StreamUnit::Finish { text, usage } => Self::Finish { text, usage },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_payload_shape() {
        let event = StreamEvent::error("model overloaded");
        assert_eq!(event.event_type(), "error");
        assert_eq!(event.to_data().unwrap(), r#"{"error":"model overloaded"}"#);
    }

    #[test]
    fn test_done_has_empty_payload() {
        assert_eq!(StreamEvent::Done.to_data().unwrap(), "{}");
        assert_eq!(StreamEvent::from_frame("done", "").unwrap(), StreamEvent::Done);
        assert_eq!(
            StreamEvent::from_frame("done", "{}").unwrap(),
            StreamEvent::Done
        );
    }

    #[test]
    fn test_tool_call_frame_decodes() {
        let event = StreamEvent::from_frame(
            "tool-call",
            r#"{"tool_call_id":"c1","tool_name":"search","input":{"q":"rust"}}"#,
        )
        .unwrap();

        assert_eq!(
            event,
            StreamEvent::ToolCall {
                tool_call_id: "c1".to_string(),
                tool_name: "search".to_string(),
                input: json!({"q": "rust"}),
            }
        );
    }

    #[test]
    fn test_data_omits_type_tag() {
        let data = StreamEvent::TextDelta {
            text: "hi".to_string(),
        }
        .to_data()
        .unwrap();
        assert_eq!(data, r#"{"text":"hi"}"#);
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let err = StreamEvent::from_frame("mystery", "{}").unwrap_err();
        assert!(matches!(err, FrameError::Invalid { .. }));
    }

    #[test]
    fn test_non_object_data_rejected() {
        let err = StreamEvent::from_frame("text-delta", "[1,2]").unwrap_err();
        assert!(matches!(err, FrameError::NotAnObject(_)));
    }

    #[test]
    fn test_terminal_events() {
        assert!(StreamEvent::Done.is_terminal());
        assert!(StreamEvent::error("x").is_terminal());
        assert!(!StreamEvent::from(StreamUnit::finish("all")).is_terminal());
    }

    #[test]
    fn test_unit_conversion_keeps_fields() {
        let event = StreamEvent::from(StreamUnit::tool_result("c1", "search", json!([1]), false));
        assert_eq!(event.event_type(), "tool-result");
        match event {
            StreamEvent::ToolResult {
                success, output, ..
            } => {
                assert!(!success);
                assert_eq!(output, json!([1]));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
