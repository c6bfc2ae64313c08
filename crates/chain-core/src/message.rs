//! Wire codec for socket messages (component G of the design).
//!
//! The wire form is a comma-separated sequence of JSON-encoded fields; which
//! fields appear depends on the leading `kind` tag. Splitting respects JSON
//! string escaping and brace/bracket depth so payload objects containing
//! commas are not mistaken for field separators.

use serde_json::Value;

use crate::error::{ChainError, ChainResult};

const KIND_PUSH: u8 = 0;
const KIND_REPLY: u8 = 1;
const KIND_BROADCAST: u8 = 2;

/// Reply status, carried as a bare `0`/`1` integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    Error = 1,
}

impl Status {
    fn from_u8(v: u8) -> ChainResult<Self> {
        match v {
            0 => Ok(Status::Ok),
            1 => Ok(Status::Error),
            other => Err(ChainError::DecodeError(format!("unknown status {other}"))),
        }
    }
}

/// A decoded or pending-encode socket message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Push {
        join_ref: i64,
        r#ref: i64,
        topic: String,
        event: String,
        payload: Option<Value>,
    },
    Reply {
        join_ref: i64,
        r#ref: i64,
        status: Status,
        payload: Option<Value>,
    },
    Broadcast {
        topic: String,
        event: String,
        payload: Option<Value>,
    },
}

/// Split `s` on top-level commas: commas inside a JSON string, object, or
/// array are not split points. A backslash escapes the next character while
/// inside a string.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0usize;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => depth -= 1,
            ',' if !in_string && depth == 0 => {
                fields.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(&s[start..]);
    fields
}

fn parse_field<T: serde::de::DeserializeOwned>(field: &str) -> ChainResult<T> {
    serde_json::from_str(field.trim())
        .map_err(|e| ChainError::DecodeError(format!("bad field '{field}': {e}")))
}

fn parse_payload(field: Option<&&str>) -> ChainResult<Option<Value>> {
    match field {
        None => Ok(None),
        Some(f) => parse_field(f).map(Some),
    }
}

impl Message {
    /// Decode one wire-format message.
    pub fn decode(s: &str) -> ChainResult<Self> {
        let fields = split_top_level(s);
        if fields.is_empty() {
            return Err(ChainError::DecodeError("empty message".to_string()));
        }
        let kind: u8 = parse_field(fields[0])?;
        match kind {
            KIND_PUSH => {
                if fields.len() < 5 || fields.len() > 6 {
                    return Err(ChainError::DecodeError("malformed push".to_string()));
                }
                Ok(Message::Push {
                    join_ref: parse_field(fields[1])?,
                    r#ref: parse_field(fields[2])?,
                    topic: parse_field(fields[3])?,
                    event: parse_field(fields[4])?,
                    payload: parse_payload(fields.get(5))?,
                })
            }
            KIND_REPLY => {
                if fields.len() < 4 || fields.len() > 5 {
                    return Err(ChainError::DecodeError("malformed reply".to_string()));
                }
                let status_raw: u8 = parse_field(fields[3])?;
                Ok(Message::Reply {
                    join_ref: parse_field(fields[1])?,
                    r#ref: parse_field(fields[2])?,
                    status: Status::from_u8(status_raw)?,
                    payload: parse_payload(fields.get(4))?,
                })
            }
            KIND_BROADCAST => {
                if fields.len() < 3 || fields.len() > 4 {
                    return Err(ChainError::DecodeError("malformed broadcast".to_string()));
                }
                Ok(Message::Broadcast {
                    topic: parse_field(fields[1])?,
                    event: parse_field(fields[2])?,
                    payload: parse_payload(fields.get(3))?,
                })
            }
            other => Err(ChainError::DecodeError(format!("unknown kind {other}"))),
        }
    }

    /// Encode to the wire format, omitting the payload field entirely when
    /// `payload` is `None` rather than emitting a JSON `null`.
    pub fn encode(&self) -> String {
        match self {
            Message::Push {
                join_ref,
                r#ref,
                topic,
                event,
                payload,
            } => {
                let mut out = format!(
                    "{},{},{},{},{}",
                    KIND_PUSH,
                    join_ref,
                    r#ref,
                    serde_json::to_string(topic).expect("string serialization cannot fail"),
                    serde_json::to_string(event).expect("string serialization cannot fail"),
                );
                if let Some(p) = payload {
                    out.push(',');
                    out.push_str(&serde_json::to_string(p).expect("value serialization cannot fail"));
                }
                out
            }
            Message::Reply {
                join_ref,
                r#ref,
                status,
                payload,
            } => {
                let mut out = format!("{},{},{},{}", KIND_REPLY, join_ref, r#ref, *status as u8);
                if let Some(p) = payload {
                    out.push(',');
                    out.push_str(&serde_json::to_string(p).expect("value serialization cannot fail"));
                }
                out
            }
            Message::Broadcast { topic, event, payload } => {
                let mut out = format!(
                    "{},{},{}",
                    KIND_BROADCAST,
                    serde_json::to_string(topic).expect("string serialization cannot fail"),
                    serde_json::to_string(event).expect("string serialization cannot fail"),
                );
                if let Some(p) = payload {
                    out.push(',');
                    out.push_str(&serde_json::to_string(p).expect("value serialization cannot fail"));
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_push_example_from_the_wire_protocol() {
        let msg = Message::decode(r#"0,2,3,"room:1234","stx_join",{"param1":"foo"}"#).unwrap();
        assert_eq!(
            msg,
            Message::Push {
                join_ref: 2,
                r#ref: 3,
                topic: "room:1234".to_string(),
                event: "stx_join".to_string(),
                payload: Some(json!({"param1": "foo"})),
            }
        );
    }

    #[test]
    fn push_without_payload_round_trips() {
        let msg = Message::Push {
            join_ref: 1,
            r#ref: 1,
            topic: "chat:lobby".to_string(),
            event: "stx_leave".to_string(),
            payload: None,
        };
        let wire = msg.encode();
        assert_eq!(wire, r#"0,1,1,"chat:lobby","stx_leave""#);
        assert_eq!(Message::decode(&wire).unwrap(), msg);
    }

    #[test]
    fn reply_round_trips_with_nested_payload_commas() {
        let msg = Message::Reply {
            join_ref: 1,
            r#ref: 1,
            status: Status::Ok,
            payload: Some(json!({"a": 1, "b": [1, 2, 3]})),
        };
        let wire = msg.encode();
        assert_eq!(Message::decode(&wire).unwrap(), msg);
    }

    #[test]
    fn broadcast_round_trips() {
        let msg = Message::Broadcast {
            topic: "chat:lobby".to_string(),
            event: "msg".to_string(),
            payload: Some(json!({"t": "hi"})),
        };
        assert_eq!(msg.encode(), r#"2,"chat:lobby","msg",{"t":"hi"}"#);
        assert_eq!(Message::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(Message::decode("9,1,2").is_err());
    }

    #[test]
    fn rejects_malformed_field_count() {
        assert!(Message::decode("0,1,2").is_err());
    }

    #[test]
    fn string_fields_may_contain_escaped_commas_and_quotes() {
        let msg = Message::Broadcast {
            topic: "chat:lobby".to_string(),
            event: "msg".to_string(),
            payload: Some(json!("a, \"quoted\", b")),
        };
        let wire = msg.encode();
        assert_eq!(Message::decode(&wire).unwrap(), msg);
    }
}
