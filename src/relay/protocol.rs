//! Websocket wire format. One JSON object per frame, discriminated by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};

/// Client frame exactly as it appears on the wire.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    ChatMessage {
        #[serde(default)]
        message: String,
        file_url: Option<String>,
        message_id: Option<String>,
    },
    MarkRead,
    Typing {
        #[serde(default)]
        typing: bool,
    },
    DeleteMessage {
        message_id: String,
    },
}

/// A validated client event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    SendText { text: String },
    /// The message row was created by the upload endpoint; only relay it.
    SendFileAck { message_id: Uuid, file_url: String },
    MarkRead,
    Typing { typing: bool },
    Delete { message_id: Uuid },
}

fn parse_message_id(raw: &str) -> ChatResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| ChatError::malformed(format!("message_id {raw:?}: {e}")))
}

impl Inbound {
    /// A JSON object without `type` is read as a `chat_message`.
    pub fn parse(frame: &[u8]) -> ChatResult<Inbound> {
        let mut value: Value =
            serde_json::from_slice(frame).map_err(|e| ChatError::malformed(e.to_string()))?;
        if let Some(object) = value.as_object_mut() {
            object.entry("type").or_insert_with(|| Value::from("chat_message"));
        }
        let frame: ClientFrame =
            serde_json::from_value(value).map_err(|e| ChatError::malformed(e.to_string()))?;

        Ok(match frame {
            ClientFrame::ChatMessage { file_url: Some(file_url), message_id: Some(id), .. } => {
                Inbound::SendFileAck { message_id: parse_message_id(&id)?, file_url }
            }
            ClientFrame::ChatMessage { message, .. } => {
                let text = message.trim();
                if text.is_empty() {
                    return Err(ChatError::malformed("empty chat_message"));
                }
                Inbound::SendText { text: text.to_owned() }
            }
            ClientFrame::MarkRead => Inbound::MarkRead,
            ClientFrame::Typing { typing } => Inbound::Typing { typing },
            ClientFrame::DeleteMessage { message_id } => {
                Inbound::Delete { message_id: parse_message_id(&message_id)? }
            }
        })
    }
}

/// Events published to a room and written verbatim to every member socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    ChatMessage {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
        sender: String,
        sender_id: Uuid,
        timestamp: String,
        message_id: Uuid,
    },
    MessagesRead {
        user_id: Uuid,
    },
    UserTyping {
        user_id: Uuid,
        typing: bool,
    },
    MessageDeleted {
        message_id: Uuid,
    },
}

impl Outbound {
    pub fn to_json(&self) -> String {
        // plain enum of strings, uuids and bools: serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}
