//! Frame parser and encoder.
//!
//! A frame is `[id,command,payload]`. The three fields are located with a
//! quote and bracket aware scan and then parsed independently, so each field
//! gets its static type and a failure names the field that caused it.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::message::{Message, Payload};

/// Number of fields in a frame.
pub const FIELD_COUNT: usize = 3;

/// Frame field, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Command,
    Payload,
}

impl Field {
    pub fn index(self) -> usize {
        match self {
            Field::Id => 0,
            Field::Command => 1,
            Field::Payload => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Command => "command",
            Field::Payload => "payload",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (field {})", self.name(), self.index())
    }
}

/// Frame decoding errors.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The line is not shaped like `[a,b,c]`.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// One field is not valid JSON of the expected type.
    #[error("failed to parse {field}: {source}")]
    FieldParse {
        field: Field,
        #[source]
        source: serde_json::Error,
    },
}

/// A message field could not be serialized.
#[derive(Debug, Error)]
#[error("failed to encode {field}: {source}")]
pub struct EncodeError {
    pub field: Field,
    #[source]
    pub source: serde_json::Error,
}

/// Decode one line into a message.
///
/// Surrounding whitespace, including the line terminator, is ignored.
pub fn decode(line: &str) -> Result<Message, DecodeError> {
    let inner = line
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or(DecodeError::MalformedFrame("missing enclosing brackets"))?;

    let [id, command, payload] = split_fields(inner)?;

    Ok(Message {
        id: parse_field(Field::Id, id)?,
        command: parse_field(Field::Command, command)?,
        payload: parse_field::<Payload>(Field::Payload, payload)?,
    })
}

/// Encode a message as a single frame, without the trailing newline.
pub fn encode(message: &Message) -> Result<String, EncodeError> {
    let id = encode_field(Field::Id, &message.id)?;
    let command = encode_field(Field::Command, &message.command)?;
    let payload = encode_field(Field::Payload, &message.payload)?;

    Ok(format!("[{id},{command},{payload}]"))
}

fn parse_field<T: DeserializeOwned>(field: Field, text: &str) -> Result<T, DecodeError> {
    serde_json::from_str(text).map_err(|source| DecodeError::FieldParse { field, source })
}

fn encode_field<T: Serialize + ?Sized>(field: Field, value: &T) -> Result<String, EncodeError> {
    serde_json::to_string(value).map_err(|source| EncodeError { field, source })
}

/// Split the inside of a frame into its three fields.
///
/// Only commas outside strings and nested arrays/objects separate fields.
/// Scanning stops after the second separator; the rest is the payload.
fn split_fields(inner: &str) -> Result<[&str; FIELD_COUNT], DecodeError> {
    let bytes = inner.as_bytes();
    let mut separators = [0usize; FIELD_COUNT - 1];
    let mut found = 0;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or(DecodeError::MalformedFrame("unbalanced brackets"))?;
            }
            b',' if depth == 0 => {
                separators[found] = i;
                found += 1;
                if found == separators.len() {
                    break;
                }
            }
            _ => {}
        }
    }

    if found < separators.len() {
        return Err(DecodeError::MalformedFrame("expected 3 fields"));
    }

    let [first, second] = separators;
    Ok([
        &inner[..first],
        &inner[first + 1..second],
        &inner[second + 1..],
    ])
}
