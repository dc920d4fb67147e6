use crate::api::models::Pin;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Events the client emits on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    JoinWithPin { pin: Pin },
    StartPrivateChat { target_pin: Pin },
    SendPrivateMessage { target_pin: Pin, text: String },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinWithPin { .. } => "join_with_pin",
            Self::StartPrivateChat { .. } => "start_private_chat",
            Self::SendPrivateMessage { .. } => "send_private_message",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::JoinWithPin { pin } => json!({ "pin": pin }),
            Self::StartPrivateChat { target_pin } => json!({ "target_pin": target_pin }),
            Self::SendPrivateMessage { target_pin, text } => {
                json!({ "target_pin": target_pin, "text": text })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(alias = "sender")]
    pub from_pin: Pin,
    #[serde(default, alias = "receiver")]
    pub to_pin: Option<Pin>,
    #[serde(alias = "message")]
    pub text: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNotice {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub time: Option<String>,
}

/// Events the backend pushes to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    ReceiveMessage(ChatMessage),
    SystemMessage(SystemNotice),
}

impl InboundEvent {
    /// Map a named socket event to an inbound event. Unknown names yield
    /// `Ok(None)`; known names with a bad payload are an error.
    pub fn from_event(name: &str, data: Value) -> Result<Option<Self>, serde_json::Error> {
        match name {
            "receive_message" => Ok(Some(Self::ReceiveMessage(serde_json::from_value(data)?))),
            "system_message" => Ok(Some(Self::SystemMessage(serde_json::from_value(data)?))),
            _ => Ok(None),
        }
    }
}
