//! ARI event model
//!
//! Events arrive as JSON objects tagged by `type`. Each one is classified
//! into an [`EventPayload`] category that carries the embedded entity the
//! proxy correlates on, while the untouched JSON body is kept for
//! forwarding to consumers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ProxyError, Result};
use crate::proxy::correlation::{CorrelationKey, EntityKind};

/// Channel object as carried in ARI events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
}

/// Bridge object as carried in ARI events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bridge {
    pub id: String,
    #[serde(default)]
    pub bridge_type: String,
}

/// Live recording; `target_uri` names the recorded channel or bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveRecording {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub target_uri: String,
    #[serde(default)]
    pub state: String,
}

/// Playback; `target_uri` names the channel or bridge played to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playback {
    pub id: String,
    #[serde(default)]
    pub target_uri: String,
    #[serde(default)]
    pub state: String,
}

/// Event categories the proxy distinguishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// A channel entered the Stasis application
    StasisStart { channel: Channel },
    /// A channel left the Stasis application
    StasisEnd { channel: Channel },
    Channel { channel: Option<Channel> },
    Bridge { bridge: Option<Bridge> },
    Recording { recording: Option<LiveRecording> },
    Playback { playback: Option<Playback> },
    /// Dial progress; not correlated
    Dial,
    Other,
}

/// An ARI event: its type tag, the entities the proxy looks at, and the
/// untouched JSON body that is forwarded to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct AriEvent {
    event_type: String,
    application: Option<String>,
    payload: EventPayload,
    body: Value,
}

impl AriEvent {
    /// Parse one WebSocket text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Classify an already parsed event body.
    ///
    /// Fails when the `type` tag is missing or when a Stasis event lacks its
    /// channel.
    pub fn from_value(body: Value) -> Result<Self> {
        let event_type = body
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProxyError::EventStream("event without a type tag".to_string()))?
            .to_string();
        let application = body
            .get("application")
            .and_then(Value::as_str)
            .map(str::to_string);

        let tag = event_type.to_ascii_lowercase();
        let payload = match tag.as_str() {
            "stasisstart" => EventPayload::StasisStart {
                channel: required(&body, "channel", &event_type)?,
            },
            "stasisend" => EventPayload::StasisEnd {
                channel: required(&body, "channel", &event_type)?,
            },
            t if t.starts_with("bridge") => EventPayload::Bridge {
                bridge: optional(&body, "bridge"),
            },
            t if t.starts_with("channel") => EventPayload::Channel {
                channel: optional(&body, "channel"),
            },
            t if t.starts_with("recording") => EventPayload::Recording {
                recording: optional(&body, "recording"),
            },
            t if t.starts_with("playback") => EventPayload::Playback {
                playback: optional(&body, "playback"),
            },
            t if t.starts_with("dial") => EventPayload::Dial,
            _ => EventPayload::Other,
        };

        Ok(Self {
            event_type,
            application,
            payload,
            body,
        })
    }

    /// The ARI `type` tag
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Stasis application the event was delivered to
    pub fn application(&self) -> Option<&str> {
        self.application.as_deref()
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// The event exactly as received
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// The entity this event should be correlated on, if it carries one.
    ///
    /// First entry of [`correlation_keys`](Self::correlation_keys).
    pub fn correlation_key(&self) -> Option<CorrelationKey> {
        self.correlation_keys().into_iter().next()
    }

    /// Candidate keys in lookup order.
    ///
    /// Recordings are matched on the channel or bridge they target. A
    /// playback tries its target first, then its own id, so playbacks started
    /// on an entity the table does not know still reach their dialogue.
    pub fn correlation_keys(&self) -> Vec<CorrelationKey> {
        match &self.payload {
            EventPayload::StasisStart { channel } | EventPayload::StasisEnd { channel } => {
                vec![CorrelationKey::channel(&channel.id)]
            }
            EventPayload::Channel { channel } => channel
                .iter()
                .map(|c| CorrelationKey::channel(&c.id))
                .collect(),
            EventPayload::Bridge { bridge } => bridge.iter().map(|b| CorrelationKey::bridge(&b.id)).collect(),
            EventPayload::Recording { recording } => recording
                .iter()
                .filter_map(|r| parse_target_uri(&r.target_uri))
                .collect(),
            EventPayload::Playback { playback } => {
                let Some(p) = playback else {
                    return Vec::new();
                };
                let mut keys: Vec<CorrelationKey> = parse_target_uri(&p.target_uri).into_iter().collect();
                if !p.id.is_empty() {
                    keys.push(CorrelationKey::new(EntityKind::Playback, &p.id));
                }
                keys
            }
            EventPayload::Dial | EventPayload::Other => Vec::new(),
        }
    }
}

/// Strip the `channel:`/`bridge:` scheme from an ARI target reference
pub fn parse_target_uri(uri: &str) -> Option<CorrelationKey> {
    if let Some(id) = uri.strip_prefix("channel:") {
        (!id.is_empty()).then(|| CorrelationKey::channel(id))
    } else if let Some(id) = uri.strip_prefix("bridge:") {
        (!id.is_empty()).then(|| CorrelationKey::bridge(id))
    } else {
        None
    }
}

fn required<T: DeserializeOwned>(body: &Value, field: &str, event_type: &str) -> Result<T> {
    let value = body
        .get(field)
        .ok_or_else(|| ProxyError::EventStream(format!("{} event without '{}'", event_type, field)))?;
    Ok(serde_json::from_value(value.clone())?)
}

fn optional<T: DeserializeOwned>(body: &Value, field: &str) -> Option<T> {
    body.get(field)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}
