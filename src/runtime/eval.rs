//! Evaluation tasks.
//!
//! Each `editor.eval.<lang>` request runs as its own task: ask the
//! [`Evaluator`] for a result, wrap it in a `<command>.result` frame with the
//! request id and write it back. A response is produced for every request,
//! including when the evaluator fails.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::session::Session;
use crate::evaluator::{EvalError, Evaluation, Evaluator};
use crate::protocol::message::result_command;
use crate::protocol::{encode, Message, Payload, Position};

/// Result text for a request that carried no code.
pub const NOTHING_SELECTED: &str = "Nothing selected. Line echo not implemented yet.";

/// Builds and sends responses to evaluation requests.
#[derive(Clone)]
pub struct EvalHandler {
    evaluator: Arc<dyn Evaluator>,
    timeout: Option<Duration>,
}

impl EvalHandler {
    pub fn new(evaluator: Arc<dyn Evaluator>, timeout: Option<Duration>) -> Self {
        Self { evaluator, timeout }
    }

    /// Evaluate `request` and send the response frame.
    ///
    /// Meant to be spawned on the session's task group.
    pub async fn run(self, session: Arc<Session>, request: Message) {
        let response = self.respond(&request).await;

        let frame = match encode(&response) {
            Ok(frame) => frame,
            Err(e) => {
                error!(id = request.id, error = %e, "Failed to encode response");
                return;
            }
        };

        match session.writer().write_frame(&frame).await {
            Ok(()) => debug!(id = response.id, command = %response.command, "Sent result"),
            Err(e) => warn!(id = response.id, error = %e, "Failed to send result"),
        }
    }

    /// Build the response message for `request`.
    pub async fn respond(&self, request: &Message) -> Message {
        let position = request.payload.position;

        let (text, position) = match request.payload.code() {
            None => (NOTHING_SELECTED.to_string(), position),
            Some(code) => match self.evaluate(code, position).await {
                Ok(evaluation) => (evaluation.result, evaluation.position),
                Err(e) => {
                    warn!(id = request.id, error = %e, "Evaluation failed");
                    (format!("error: {e}"), position)
                }
            },
        };

        Message::new(
            request.id,
            result_command(&request.command),
            Payload::result(text, position),
        )
    }

    /// Run the evaluator on its own task so a panic still yields a response.
    async fn evaluate(
        &self,
        code: &str,
        position: Option<Position>,
    ) -> Result<Evaluation, EvalError> {
        let evaluator = Arc::clone(&self.evaluator);
        let code = code.to_string();
        let mut task = tokio::spawn(async move { evaluator.evaluate(&code, position).await });

        let joined = match self.timeout {
            None => (&mut task).await,
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    return Err(EvalError::TimedOut(limit));
                }
            },
        };

        joined.map_err(|e| EvalError::Failed(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::EchoEvaluator;
    use crate::protocol::decode;
    use crate::runtime::connection;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};

    struct FailingEvaluator;

    #[async_trait]
    impl Evaluator for FailingEvaluator {
        async fn evaluate(
            &self,
            _code: &str,
            _position: Option<Position>,
        ) -> Result<Evaluation, EvalError> {
            Err(EvalError::Failed("syntax error".to_string()))
        }
    }

    struct PanickingEvaluator;

    #[async_trait]
    impl Evaluator for PanickingEvaluator {
        async fn evaluate(
            &self,
            code: &str,
            _position: Option<Position>,
        ) -> Result<Evaluation, EvalError> {
            panic!("cannot evaluate {code}");
        }
    }

    struct HangingEvaluator;

    #[async_trait]
    impl Evaluator for HangingEvaluator {
        async fn evaluate(
            &self,
            _code: &str,
            _position: Option<Position>,
        ) -> Result<Evaluation, EvalError> {
            std::future::pending().await
        }
    }

    fn echo() -> EvalHandler {
        EvalHandler::new(Arc::new(EchoEvaluator), None)
    }

    #[tokio::test]
    async fn test_payload_passthrough() {
        let request =
            decode(r#"[5,"editor.eval.go",{"code":"x+1","pos":{"line":0,"ch":2}}]"#).unwrap();
        let response = echo().respond(&request).await;

        assert_eq!(response.id, 5);
        assert_eq!(response.command, "editor.eval.go.result");
        assert_eq!(
            serde_json::to_value(&response.payload).unwrap(),
            json!({"result": "x+1", "pos": {"line": 0, "ch": 2}})
        );
    }

    #[tokio::test]
    async fn test_missing_code_uses_placeholder() {
        let request = decode(r#"[6,"editor.eval.go",{}]"#).unwrap();
        let response = echo().respond(&request).await;

        assert_eq!(response.payload.result.as_deref(), Some(NOTHING_SELECTED));
        assert_eq!(response.payload.position, None);
    }

    #[tokio::test]
    async fn test_empty_code_uses_placeholder() {
        let request =
            decode(r#"[7,"editor.eval.go",{"code":"","pos":{"line":3,"ch":0}}]"#).unwrap();
        let response = echo().respond(&request).await;

        assert_eq!(response.payload.result.as_deref(), Some(NOTHING_SELECTED));
        assert_eq!(response.payload.position, Some(Position::new(3, 0)));
    }

    #[tokio::test]
    async fn test_failure_becomes_text() {
        let handler = EvalHandler::new(Arc::new(FailingEvaluator), None);
        let request =
            decode(r#"[8,"editor.eval.go",{"code":"(","pos":{"line":1,"ch":1}}]"#).unwrap();
        let response = handler.respond(&request).await;

        assert_eq!(response.id, 8);
        assert_eq!(
            response.payload.result.as_deref(),
            Some("error: evaluation failed: syntax error")
        );
        assert_eq!(response.payload.position, Some(Position::new(1, 1)));
    }

    #[tokio::test]
    async fn test_panic_becomes_text() {
        let handler = EvalHandler::new(Arc::new(PanickingEvaluator), None);
        let request =
            decode(r#"[10,"editor.eval.go",{"code":"boom","pos":{"line":2,"ch":5}}]"#).unwrap();
        let response = handler.respond(&request).await;

        assert_eq!(response.id, 10);
        let result = response.payload.result.unwrap();
        assert!(result.starts_with("error: evaluation failed: "), "{result}");
        assert!(result.contains("panicked"), "{result}");
        assert_eq!(response.payload.position, Some(Position::new(2, 5)));
    }

    #[tokio::test]
    async fn test_timeout_becomes_text() {
        let handler = EvalHandler::new(Arc::new(HangingEvaluator), Some(Duration::from_millis(10)));
        let request = decode(r#"[9,"editor.eval.go",{"code":"loop {}"}]"#).unwrap();
        let response = handler.respond(&request).await;

        let result = response.payload.result.unwrap();
        assert!(result.starts_with("error: evaluation timed out"), "{result}");
    }

    #[tokio::test]
    async fn test_run_writes_response_frame() {
        let (client, peer) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(client);
        let (_reader, writer) = connection::split(read, write);
        let session = Session::new(writer);

        let request = decode(r#"[42,"editor.eval.rust",{"code":"a, b"}]"#).unwrap();
        echo().run(Arc::clone(&session), request).await;

        let mut lines = BufReader::new(peer).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let response = decode(&line).unwrap();

        assert_eq!(response.id, 42);
        assert_eq!(response.command, "editor.eval.rust.result");
        assert_eq!(response.payload.result.as_deref(), Some("a, b"));
    }
}
