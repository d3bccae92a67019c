//! Outcome model: what a processor reports back on success.
//!
//! Failures travel as [`ProcessorError`](super::ProcessorError); an `Outcome`
//! only describes work that finished. It is stored on the completed record so
//! the recent-completed list explains itself.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    /// The side effect happened during this attempt.
    Done,
    /// Nothing to do: the effect was already applied by an earlier attempt.
    Skipped,
}

/// A reference to something produced during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Artifact {
    /// Identifier of a record written by the processor (report id, refund id, ...).
    Record(String),

    Url(String),

    /// Follow-up task enqueued by a fan-out processor.
    Task(String),

    Json(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
}

impl Outcome {
    pub fn done() -> Self {
        Self {
            kind: OutcomeKind::Done,
            summary: None,
            artifacts: Vec::new(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Skipped,
            summary: Some(reason.into()),
            artifacts: Vec::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.kind == OutcomeKind::Skipped
    }
}
