//! Dashboard channel frames
//!
//! Server to client: `{type, endpoint?, tenantId?, timestamp, data}`.
//! Client to server: `{action, start_date?, end_date?}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FinPulseError, Result};
use crate::types::usage::DateRange;

/// Kind of a server frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Data,
    Status,
    Error,
    Ack,
}

/// Frame pushed to a dashboard client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(rename = "tenantId", default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Unix milliseconds
    pub timestamp: i64,

    #[serde(default)]
    pub data: Value,
}

impl ServerMessage {
    fn now(kind: MessageType, endpoint: Option<String>, tenant_id: Option<String>, data: Value) -> Self {
        Self {
            kind,
            endpoint,
            tenant_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            data,
        }
    }

    /// Endpoint response pushed after a successful call
    pub fn data(endpoint: impl Into<String>, tenant_id: Option<String>, data: Value) -> Self {
        Self::now(MessageType::Data, Some(endpoint.into()), tenant_id, data)
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::now(
            MessageType::Status,
            None,
            None,
            serde_json::json!({ "message": message.into() }),
        )
    }

    /// Failure report; `kind` is a short error class, never credential material
    pub fn error(
        endpoint: Option<String>,
        tenant_id: Option<String>,
        kind: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::now(
            MessageType::Error,
            endpoint,
            tenant_id,
            serde_json::json!({ "kind": kind, "message": message.into() }),
        )
    }

    pub fn ack(action: &str) -> Self {
        Self::now(
            MessageType::Ack,
            None,
            None,
            serde_json::json!({ "action": action }),
        )
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Action requested by a dashboard client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAction {
    /// Compute metrics for the requesting connection
    FetchMetrics,
    /// Compute metrics and broadcast to every connection
    Refresh,
    #[serde(other)]
    Unknown,
}

impl ClientAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientAction::FetchMetrics => "fetch_metrics",
            ClientAction::Refresh => "refresh",
            ClientAction::Unknown => "unknown",
        }
    }
}

/// Frame received from a dashboard client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub action: ClientAction,

    #[serde(default)]
    pub start_date: Option<String>,

    #[serde(default)]
    pub end_date: Option<String>,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| FinPulseError::Parse(format!("invalid client message: {}", e)))
    }

    pub fn date_range(&self) -> Result<DateRange> {
        DateRange::parse(self.start_date.as_deref(), self.end_date.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_message_shape() {
        let msg = ServerMessage::data("list_sessions", Some("org-1".into()), json!([1, 2]));
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "data");
        assert_eq!(value["endpoint"], "list_sessions");
        assert_eq!(value["tenantId"], "org-1");
        assert_eq!(value["data"], json!([1, 2]));
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_optional_fields_omitted_and_null_data_kept() {
        let msg = ServerMessage::data("audit_logs", None, Value::Null);
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert!(value.get("tenantId").is_none());
        assert!(value.get("data").unwrap().is_null());
    }

    #[test]
    fn test_parse_client_actions() {
        let msg = ClientMessage::parse(r#"{"action":"fetch_metrics","start_date":"2024-01-01"}"#).unwrap();
        assert_eq!(msg.action, ClientAction::FetchMetrics);
        assert!(msg.date_range().unwrap().start.is_some());

        let msg = ClientMessage::parse(r#"{"action":"dance"}"#).unwrap();
        assert_eq!(msg.action, ClientAction::Unknown);

        assert!(ClientMessage::parse("not json").is_err());
    }
}
