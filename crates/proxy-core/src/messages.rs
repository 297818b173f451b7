//! Wire payloads exchanged over the queue transport
//!
//! Field names are fixed for interoperability with existing consumers and
//! must not change.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// A REST call requested by a consumer, delivered on a dialogue's command queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub unique_id: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub body: String,
}

impl Command {
    /// Decode a command read from a commands queue
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// The outcome of a [`Command`], returned with the same `unique_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub unique_id: String,
    pub status_code: u16,
    pub response_body: String,
}

impl CommandResult {
    /// Result for a command whose REST call never produced a response.
    ///
    /// Status 0 and an empty body mirror what an HTTP client reports when
    /// no response was received.
    pub fn failed(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            status_code: 0,
            response_body: String::new(),
        }
    }
}

/// Published on an application's control queue whenever a dialogue is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDialogueAnnouncement {
    #[serde(rename = "Application")]
    pub application: String,
    #[serde(rename = "dialog_id")]
    pub dialogue_id: String,
    pub server_id: String,
}

/// A protocol event forwarded to a dialogue's event queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub server_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub ari_body: serde_json::Value,
}

impl EventEnvelope {
    /// Envelope stamped with the current time
    pub fn new(server_id: &str, event_type: &str, ari_body: serde_json::Value) -> Self {
        Self {
            server_id: server_id.to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            ari_body,
        }
    }
}

/// Which of a dialogue's outbound queues a message belongs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Event,
    Response,
}

/// Outbound traffic pushed into a dialogue
#[derive(Debug, Clone, PartialEq)]
pub enum DialogueMessage {
    Event(EventEnvelope),
    Response(CommandResult),
}

impl DialogueMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            DialogueMessage::Event(_) => MessageKind::Event,
            DialogueMessage::Response(_) => MessageKind::Response,
        }
    }

    /// Serialize for publishing
    pub fn encode(&self) -> Result<Bytes> {
        let bytes = match self {
            DialogueMessage::Event(envelope) => serde_json::to_vec(envelope)?,
            DialogueMessage::Response(result) => serde_json::to_vec(result)?,
        };
        Ok(Bytes::from(bytes))
    }
}
