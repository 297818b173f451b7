//! Translation of dialogue commands into ARI REST requests

use serde_json::{Map, Value};

use super::correlation::{CorrelationKey, EntityKind};
use crate::ari::{AriRequest, Method};
use crate::errors::{ProxyError, Result};
use crate::messages::Command;

/// Collections whose members can be created with a client supplied id
const CREATABLE_COLLECTIONS: &[(&str, EntityKind)] = &[
    ("channels", EntityKind::Channel),
    ("bridges", EntityKind::Bridge),
];

/// A command ready to be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    pub request: AriRequest,
    /// `playbackId` requested in the command body
    pub playback_id: Option<String>,
}

/// The entity a `POST /<collection>/<id>` command creates, if any.
pub fn creation_target(method: &str, url: &str) -> Option<CorrelationKey> {
    if !method.eq_ignore_ascii_case("POST") {
        return None;
    }

    let path = url.split('?').next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let [collection, id] = segments.as_slice() else {
        return None;
    };

    CREATABLE_COLLECTIONS
        .iter()
        .find(|(name, _)| name == collection)
        .map(|(_, kind)| CorrelationKey::new(*kind, id))
}

/// Replace quoted `"True"`/`"False"` property values with JSON booleans.
///
/// Array elements are left alone; objects nested in arrays are still walked.
pub fn normalize_booleans(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for property in map.values_mut() {
                let flag = match property.as_str() {
                    Some("True") => Some(true),
                    Some("False") => Some(false),
                    _ => None,
                };
                match flag {
                    Some(flag) => *property = Value::Bool(flag),
                    None => normalize_booleans(property),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_booleans),
        _ => {}
    }
}

/// Build the REST request for `command`.
///
/// A GET body becomes query parameters; any other body must be a JSON
/// object and is sent with booleans normalized.
pub fn prepare(command: &Command) -> Result<PreparedCommand> {
    let method = Method::from_bytes(command.method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| ProxyError::Rest(format!("invalid method '{}'", command.method)))?;

    let path = if command.url.starts_with('/') {
        command.url.clone()
    } else {
        format!("/{}", command.url)
    };
    let mut request = AriRequest::new(method.clone(), path);
    let body = command.body.trim();

    if method == Method::GET {
        // Read requests carry their arguments in the query string.
        if body.len() > 2 {
            for (name, value) in parse_object(body)? {
                let value = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                request = request.with_query(name, value);
            }
        }
        return Ok(PreparedCommand {
            request,
            playback_id: None,
        });
    }

    if body.is_empty() {
        return Ok(PreparedCommand {
            request,
            playback_id: None,
        });
    }

    let mut object = parse_object(body)?;
    let playback_id = object
        .get("playbackId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    let mut body = Value::Object(object);
    normalize_booleans(&mut body);
    request = request.with_body(body.to_string());

    Ok(PreparedCommand {
        request,
        playback_id,
    })
}

/// The `id` of the resource described by a REST response body
pub fn response_entity_id(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn parse_object(body: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(body)? {
        Value::Object(map) => Ok(map),
        _ => Err(ProxyError::Rest("command body is not a JSON object".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(method: &str, url: &str, body: &str) -> Command {
        Command {
            unique_id: "abc".to_string(),
            url: url.to_string(),
            method: method.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_creation_target() {
        assert_eq!(creation_target("POST", "/channels/NEWID"), Some(CorrelationKey::channel("NEWID")));
        assert_eq!(creation_target("post", "bridges/B1?type=mixing"), Some(CorrelationKey::bridge("B1")));
        assert_eq!(creation_target("POST", "/channels"), None);
        assert_eq!(creation_target("POST", "/channels/C1/answer"), None);
        assert_eq!(creation_target("GET", "/channels/C1"), None);
        assert_eq!(creation_target("POST", "/sounds/hello"), None);
    }

    #[test]
    fn test_normalize_booleans() {
        let mut body = json!({"x": "True", "nested": {"y": "False"}, "z": "true"});
        normalize_booleans(&mut body);
        assert_eq!(body, json!({"x": true, "nested": {"y": false}, "z": "true"}));

        let mut listed = json!({"list": ["True", {"flag": "False"}]});
        normalize_booleans(&mut listed);
        assert_eq!(listed, json!({"list": ["True", {"flag": false}]}));

        let mut bare = json!("True");
        normalize_booleans(&mut bare);
        assert_eq!(bare, json!("True"));

        let mut already = json!({"x": true, "y": false});
        normalize_booleans(&mut already);
        assert_eq!(already, json!({"x": true, "y": false}));
    }

    #[test]
    fn test_get_body_becomes_query() {
        let prepared = prepare(&command("GET", "/channels/C1/variable", r#"{"variable":"FOO","n":3}"#)).unwrap();
        assert_eq!(prepared.request.method, Method::GET);
        assert!(prepared.request.body.is_none());
        assert!(prepared.request.query.contains(&("variable".to_string(), "FOO".to_string())));
        assert!(prepared.request.query.contains(&("n".to_string(), "3".to_string())));
    }

    #[test]
    fn test_get_with_empty_object_has_no_query() {
        let prepared = prepare(&command("GET", "/channels", "{}")).unwrap();
        assert!(prepared.request.query.is_empty());
    }

    #[test]
    fn test_body_normalized_and_playback_detected() {
        let prepared = prepare(&command(
            "post",
            "/channels/C1/play",
            r#"{"media":"sound:hello","playbackId":"P1","beep":"True"}"#,
        ))
        .unwrap();

        assert_eq!(prepared.request.method, Method::POST);
        assert_eq!(prepared.playback_id.as_deref(), Some("P1"));
        let sent: Value = serde_json::from_str(prepared.request.body.as_deref().unwrap()).unwrap();
        assert_eq!(sent["beep"], json!(true));
        assert_eq!(sent["media"], json!("sound:hello"));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(prepare(&command("GE T", "/channels", "")).is_err());
        assert!(prepare(&command("POST", "/channels", "[1,2]")).is_err());
        assert!(prepare(&command("POST", "/channels", "not json")).is_err());
    }

    #[test]
    fn test_response_entity_id() {
        assert_eq!(response_entity_id(r#"{"id":"B1","bridge_type":"mixing"}"#).as_deref(), Some("B1"));
        assert_eq!(response_entity_id(""), None);
        assert_eq!(response_entity_id("[]"), None);
        assert_eq!(response_entity_id("plain text"), None);
    }
}
