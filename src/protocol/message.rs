//! Protocol message types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Peer asks the client to shut down.
pub const CLOSE: &str = "client.close";

/// Peer cancels everything; handled like [`CLOSE`].
pub const CANCEL_ALL: &str = "client.cancel-all";

/// Prefix of evaluation commands (`editor.eval.<lang>`).
pub const EVAL_PREFIX: &str = "editor.eval.";

/// Suffix appended to a request command to name its response.
pub const RESULT_SUFFIX: &str = ".result";

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Correlation id supplied by the peer.
    pub id: i64,
    /// Command name used for routing.
    pub command: String,
    /// Command arguments or results.
    pub payload: Payload,
}

impl Message {
    pub fn new(id: i64, command: impl Into<String>, payload: Payload) -> Self {
        Self {
            id,
            command: command.into(),
            payload,
        }
    }

    /// Classify this message's command.
    pub fn kind(&self) -> CommandKind {
        CommandKind::classify(&self.command)
    }
}

/// How the dispatcher treats a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// `client.close` or `client.cancel-all`.
    Shutdown,
    /// `editor.eval.<lang>`.
    Eval,
    /// Anything else; ignored.
    Other,
}

impl CommandKind {
    pub fn classify(command: &str) -> Self {
        match command {
            CLOSE | CANCEL_ALL => CommandKind::Shutdown,
            _ => match command.strip_prefix(EVAL_PREFIX) {
                Some(lang) if !lang.is_empty() && !command.ends_with(RESULT_SUFFIX) => {
                    CommandKind::Eval
                }
                _ => CommandKind::Other,
            },
        }
    }
}

/// Name of the response command for `command`.
pub fn result_command(command: &str) -> String {
    format!("{command}{RESULT_SUFFIX}")
}

/// Cursor position in the editor buffer.
///
/// Missing coordinates decode as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    pub line: i64,
    #[serde(rename = "ch")]
    pub column: i64,
}

#[cfg(test)]
impl Position {
    pub fn new(line: i64, column: i64) -> Self {
        Self { line, column }
    }
}

/// Offsets of the evaluated region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaRange {
    pub start: i64,
    pub end: i64,
}

/// Frame payload.
///
/// Every field is optional and omitted from the wire when absent. Keys this
/// type does not know about are kept in `extra` and written back out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(
        rename = "line-ending",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub line_ending: Option<String>,

    #[serde(rename = "meta", default, skip_serializing_if = "Option::is_none")]
    pub meta_range: Option<MetaRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(rename = "pos", default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    #[serde(rename = "type-name", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Payload {
    /// Payload of an evaluation response.
    pub fn result(text: impl Into<String>, position: Option<Position>) -> Self {
        Self {
            result: Some(text.into()),
            position,
            ..Self::default()
        }
    }

    /// Source text to evaluate, if any was sent.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref().filter(|code| !code.is_empty())
    }
}
