//! Assembles streamed content frames into the in-progress assistant message.

use std::collections::HashMap;

use shared_types::{Message, MessagePart, StreamFrame, StreamState, ToolState};

/// Part bookkeeping for one assistant message: frame ids map to part
/// indices so deltas land in the part that opened them.
#[derive(Debug, Clone)]
pub struct MessageAssembler {
    message_id: String,
    text: HashMap<String, usize>,
    reasoning: HashMap<String, usize>,
    tools: HashMap<String, usize>,
}

impl MessageAssembler {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            text: HashMap::new(),
            reasoning: HashMap::new(),
            tools: HashMap::new(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Apply one content frame. Returns whether the message changed.
    pub fn apply(&mut self, message: &mut Message, frame: &StreamFrame) -> bool {
        match frame {
            StreamFrame::TextStart { id } => {
                open_part(&mut self.text, message, id, streaming_text);
                true
            }
            StreamFrame::TextDelta { id, delta } => {
                let index = open_part(&mut self.text, message, id, streaming_text);
                if let Some(MessagePart::Text { text, .. }) = message.parts.get_mut(index) {
                    text.push_str(delta);
                }
                true
            }
            StreamFrame::TextEnd { id } => close_part(&self.text, message, id),

            StreamFrame::ReasoningStart { id } => {
                open_part(&mut self.reasoning, message, id, streaming_reasoning);
                true
            }
            StreamFrame::ReasoningDelta { id, delta } => {
                let index = open_part(&mut self.reasoning, message, id, streaming_reasoning);
                if let Some(MessagePart::Reasoning { text, .. }) = message.parts.get_mut(index) {
                    text.push_str(delta);
                }
                true
            }
            StreamFrame::ReasoningEnd { id } => close_part(&self.reasoning, message, id),

            StreamFrame::ToolInputStart {
                tool_call_id,
                tool_name,
            } => {
                self.tool(message, tool_call_id, tool_name);
                true
            }
            StreamFrame::ToolInputDelta {
                tool_call_id,
                input_text_delta,
            } => {
                if let MessagePart::Tool { input_text, .. } = self.tool(message, tool_call_id, "") {
                    input_text.push_str(input_text_delta);
                }
                true
            }
            StreamFrame::ToolInputAvailable {
                tool_call_id,
                tool_name,
                input: value,
            } => {
                if let MessagePart::Tool { state, input, .. } =
                    self.tool(message, tool_call_id, tool_name)
                {
                    *state = ToolState::InputAvailable;
                    *input = Some(value.clone());
                }
                true
            }
            StreamFrame::ToolOutputAvailable {
                tool_call_id,
                output: value,
            } => {
                if let MessagePart::Tool { state, output, .. } =
                    self.tool(message, tool_call_id, "")
                {
                    *state = ToolState::OutputAvailable;
                    *output = Some(value.clone());
                }
                true
            }
            StreamFrame::ToolOutputError {
                tool_call_id,
                error_text: text,
            } => {
                if let MessagePart::Tool {
                    state, error_text, ..
                } = self.tool(message, tool_call_id, "")
                {
                    *state = ToolState::OutputError;
                    *error_text = Some(text.clone());
                }
                true
            }

            StreamFrame::Data { data_type, data } => {
                let name = data_type
                    .strip_prefix("data-")
                    .unwrap_or(data_type)
                    .to_string();
                message.parts.push(MessagePart::Data {
                    name,
                    data: data.clone(),
                });
                true
            }

            StreamFrame::Start { .. }
            | StreamFrame::StartStep
            | StreamFrame::FinishStep
            | StreamFrame::Finish { .. }
            | StreamFrame::Abort { .. }
            | StreamFrame::Error { .. } => false,
        }
    }

    /// Mark the message and every still-open part as done.
    pub fn finish(&self, message: &mut Message) {
        message.status = StreamState::Done;
        for part in &mut message.parts {
            match part {
                MessagePart::Text { state, .. } | MessagePart::Reasoning { state, .. } => {
                    if *state == Some(StreamState::Streaming) {
                        *state = Some(StreamState::Done);
                    }
                }
                _ => {}
            }
        }
    }

    fn tool<'m>(
        &mut self,
        message: &'m mut Message,
        tool_call_id: &str,
        tool_name: &str,
    ) -> &'m mut MessagePart {
        let index = *self.tools.entry(tool_call_id.to_string()).or_insert_with(|| {
            message.parts.push(MessagePart::Tool {
                tool_call_id: tool_call_id.to_string(),
                tool_name: tool_name.to_string(),
                state: ToolState::InputStreaming,
                input_text: String::new(),
                input: None,
                output: None,
                error_text: None,
            });
            message.parts.len() - 1
        });
        &mut message.parts[index]
    }
}

fn streaming_text() -> MessagePart {
    MessagePart::Text {
        text: String::new(),
        state: Some(StreamState::Streaming),
    }
}

fn streaming_reasoning() -> MessagePart {
    MessagePart::Reasoning {
        text: String::new(),
        state: Some(StreamState::Streaming),
    }
}

fn open_part(
    parts: &mut HashMap<String, usize>,
    message: &mut Message,
    id: &str,
    empty: fn() -> MessagePart,
) -> usize {
    *parts.entry(id.to_string()).or_insert_with(|| {
        message.parts.push(empty());
        message.parts.len() - 1
    })
}

fn close_part(parts: &HashMap<String, usize>, message: &mut Message, id: &str) -> bool {
    let Some(index) = parts.get(id) else {
        return false;
    };
    match message.parts.get_mut(*index) {
        Some(MessagePart::Text { state, .. }) | Some(MessagePart::Reasoning { state, .. }) => {
            *state = Some(StreamState::Done);
            true
        }
        _ => false,
    }
}
