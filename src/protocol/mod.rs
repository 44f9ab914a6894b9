//! Editor host wire protocol.
//!
//! Every request and response is one line holding a three element JSON
//! array:
//!
//! ```text
//! [<id>,<command>,<payload>]\n
//!
//! Example:
//! Request:  [7,"editor.eval.rust",{"code":"x+1","pos":{"line":0,"ch":2}}]
//! Response: [7,"editor.eval.rust.result",{"pos":{"line":0,"ch":2},"result":"x+1"}]
//! ```
//!
//! - `id` is an integer chosen by the peer and echoed back verbatim.
//! - `command` routes the frame (`editor.eval.<lang>`, `client.close`, ...).
//! - `payload` is a JSON object whose fields are all optional.
//!
//! The only line that is not an array is the handshake, which the client
//! sends once as a bare JSON object right after connecting.

pub mod message;
pub mod parser;

pub use message::{CommandKind, Message, Payload, Position};
pub use parser::{decode, encode};
