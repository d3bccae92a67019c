//! Handler trait - Task を実行する Handler の定義
//!
//! - `Handler<T>`: 型付き。processor はこれを実装する
//! - `DynHandler`: object-safe。registry と worker pool はこちらを使う
//! - `TypedHandler<T, H>`: `Handler<T>` → `DynHandler` の type erasure

use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;

use super::task::Task;
use crate::domain::{
    Correlation, Outcome, ProcessorError, QueueName, TaskId, TaskKind, TaskPayload,
};
use crate::queue::TaskRecord;

/// 実行中の task についての情報。envelope は変更できない
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub queue: QueueName,
    pub kind: TaskKind,
    /// 1 始まり
    pub attempt: u32,
    pub max_attempts: u32,
    pub correlation: Correlation,
    pub metadata: Option<Value>,
    pub worker: String,
}

impl TaskContext {
    pub fn from_record(record: &TaskRecord) -> Self {
        Self {
            task_id: record.id(),
            queue: record.queue(),
            kind: record.kind(),
            attempt: record.attempts,
            max_attempts: record.max_attempts,
            correlation: record.envelope.correlation().clone(),
            metadata: record.envelope.metadata().cloned(),
            worker: record.worker.clone().unwrap_or_default(),
        }
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Handler は Task を実行して Outcome を返す
///
/// 再試行してほしい失敗は握りつぶさず `ProcessorError::transient` で返すこと。
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T, ctx: &TaskContext) -> Result<Outcome, ProcessorError>;
}

/// DynHandler は object-safe な Handler の抽象化
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        payload: TaskPayload,
        ctx: &TaskContext,
    ) -> Result<Outcome, ProcessorError>;

    fn kind(&self) -> TaskKind;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn(T)>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(
        &self,
        payload: TaskPayload,
        ctx: &TaskContext,
    ) -> Result<Outcome, ProcessorError> {
        let task = T::from_payload(payload).map_err(|other| {
            ProcessorError::permanent(format!(
                "{} handler received a {} payload",
                T::KIND,
                other.kind()
            ))
        })?;
        self.handler.handle(task, ctx).await
    }

    fn kind(&self) -> TaskKind {
        T::KIND
    }
}
