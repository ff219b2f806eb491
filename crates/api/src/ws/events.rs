//! JSON event envelope spoken over the WebSocket.
//!
//! Every text frame is `{"event": "<name>", "data": {...}}`.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sofi_engine::ResultDocument;

pub const SEND_MODEL: &str = "send-model";
pub const SEND_MODEL_UPDATE: &str = "send-model-update";
pub const MESSAGE: &str = "message";
pub const SEND_FILE: &str = "send-file";
pub const SEND_FILE_UPDATE: &str = "send-file-update";

/// Prefix of every human-readable notification.
const SERVICE_NAME: &str = "Sofi-Service";

/// A model submitted for calculation.
///
/// The correlation ids are opaque to the service and echoed back unchanged.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSubmission {
    /// Model text.
    pub file_data: String,
    #[serde(default)]
    pub viewer_session_id: Value,
    #[serde(default)]
    pub project_id: Value,
    #[serde(default)]
    pub original_params: Value,
    #[serde(default)]
    pub frontend_session_id: Value,
}

/// Events a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    SendModel(ModelSubmission),
    SendModelUpdate(ModelSubmission),
    Message(Value),
}

/// Human-readable progress notification.
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub project_id: Value,
}

/// The engine's result artifact plus the caller's correlation ids.
#[derive(Debug, Clone, Serialize)]
pub struct FileDelivery {
    /// Raw artifact bytes, base64 encoded.
    pub file_data: String,
    pub viewer_session_id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_params: Option<Value>,
    pub frontend_session_id: Value,
    pub project_id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<ResultDocument>,
}

/// Events the server sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    Message(Notice),
    SendFile(FileDelivery),
    SendFileUpdate(FileDelivery),
}

impl OutboundEvent {
    pub fn notice(message: impl AsRef<str>, project_id: &Value) -> Self {
        Self::Message(Notice {
            message: format!("{SERVICE_NAME}: {}", message.as_ref()),
            project_id: project_id.clone(),
        })
    }

    pub fn greeting(session_id: &str) -> Self {
        Self::Message(Notice {
            message: format!(
                "Hello, you are now connected to the {SERVICE_NAME}. Your id is {session_id}."
            ),
            project_id: Value::Null,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => MESSAGE,
            Self::SendFile(_) => SEND_FILE,
            Self::SendFileUpdate(_) => SEND_FILE_UPDATE,
        }
    }

    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}
