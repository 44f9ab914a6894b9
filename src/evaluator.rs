//! Evaluation backends.
//!
//! The client does not evaluate code itself; it hands source text to an
//! [`Evaluator`] and reports whatever comes back. [`EchoEvaluator`] is the
//! built-in backend and returns the source unchanged.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::Position;

/// Result of a successful evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Text shown to the user.
    pub result: String,
    /// Where the editor should display the result.
    pub position: Option<Position>,
}

/// Evaluation failures.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluation failed: {0}")]
    Failed(String),

    #[error("evaluation timed out after {0:?}")]
    TimedOut(Duration),
}

/// A language backend.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        code: &str,
        position: Option<Position>,
    ) -> Result<Evaluation, EvalError>;
}

/// Returns the source text as the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoEvaluator;

#[async_trait]
impl Evaluator for EchoEvaluator {
    async fn evaluate(
        &self,
        code: &str,
        position: Option<Position>,
    ) -> Result<Evaluation, EvalError> {
        Ok(Evaluation {
            result: code.to_string(),
            position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_evaluator() {
        let evaluation = EchoEvaluator
            .evaluate("1 + 2", Some(Position::new(3, 7)))
            .await
            .unwrap();

        assert_eq!(evaluation.result, "1 + 2");
        assert_eq!(evaluation.position, Some(Position::new(3, 7)));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            EvalError::Failed("boom".to_string()).to_string(),
            "evaluation failed: boom"
        );
        assert_eq!(
            EvalError::TimedOut(Duration::from_secs(2)).to_string(),
            "evaluation timed out after 2s"
        );
    }
}
