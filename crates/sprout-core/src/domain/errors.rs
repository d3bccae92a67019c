//! Errors - 実行エラーの分類

use serde::{Deserialize, Serialize};
use std::fmt;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（ネットワーク断、gateway 5xx）。リトライする
/// - Permanent: 恒久的なエラー（入力不正、gateway 4xx）。残りの attempt を捨てる
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Transient,
    Permanent,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transient => f.write_str("transient"),
            ErrorKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// Error surfaced by a processor. The worker pool turns it into a retry or a
/// terminal failure; it never reaches the producer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} failure: {message}")]
pub struct ProcessorError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProcessorError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ErrorKind::Permanent
    }
}

impl From<serde_json::Error> for ProcessorError {
    fn from(e: serde_json::Error) -> Self {
        ProcessorError::permanent(format!("payload: {e}"))
    }
}
