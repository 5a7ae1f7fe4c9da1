//! The VTube Studio public API wire format.
//!
//! Every frame in both directions is one JSON envelope. The field names
//! are fixed by the service, including the `requestID` capitalization.

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

pub const API_NAME: &str = "VTubeStudioPublicAPI";
pub const API_VERSION: &str = "1.0";

pub const AUTHENTICATION_REQUEST: &str = "AuthenticationRequest";
pub const AUTHENTICATION_RESPONSE: &str = "AuthenticationResponse";
pub const HOTKEY_TRIGGER_REQUEST: &str = "HotkeyTriggerRequest";
pub const API_ERROR: &str = "APIError";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "apiName")]
    pub api_name: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    #[serde(rename = "requestID")]
    pub request_id: String,
    #[serde(rename = "messageType")]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Envelope {
    pub fn request(message_type: &str, request_id: String, data: serde_json::Value) -> Self {
        Self {
            api_name: API_NAME.to_string(),
            api_version: API_VERSION.to_string(),
            request_id,
            message_type: message_type.to_string(),
            data: Some(data),
        }
    }

    /// The plugin-identity handshake sent right after connecting.
    pub fn authentication_request(plugin_name: &str, plugin_developer: &str) -> Self {
        Self::request(
            AUTHENTICATION_REQUEST,
            Uuid::new_v4().to_string(),
            json!({
                "pluginName": plugin_name,
                "pluginDeveloper": plugin_developer,
            }),
        )
    }

    /// An expression change, encoded as a hotkey trigger. The request id
    /// carries the mood so the frame is traceable in VTS logs.
    pub fn hotkey_trigger(mood: &str, hotkey_id: &str) -> Self {
        Self::request(
            HOTKEY_TRIGGER_REQUEST,
            format!("setExpression-{mood}"),
            json!({ "hotkeyID": hotkey_id }),
        )
    }

    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn is_auth_response(&self) -> bool {
        self.message_type == AUTHENTICATION_RESPONSE
    }

    pub fn is_api_error(&self) -> bool {
        self.message_type == API_ERROR
    }

    /// The `authenticated` flag of an auth response; false when absent.
    pub fn authenticated(&self) -> bool {
        self.data_field("authenticated")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Human-readable reason attached to a rejection or API error.
    pub fn reason(&self) -> Option<&str> {
        self.data_field("reason")
            .or_else(|| self.data_field("message"))
            .and_then(serde_json::Value::as_str)
    }

    fn data_field(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.as_ref().and_then(|d| d.get(key))
    }
}
