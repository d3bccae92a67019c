//! EventSink port - ライフサイクルイベントの配送先

use crate::domain::LifecycleEvent;

/// EventSink はライフサイクルイベントを受け取る
///
/// 呼び出し側（worker / dispatcher / reaper）をブロックしないこと。
/// 配送に失敗しても task の結果には影響させない。
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LifecycleEvent);
}

/// 何もしない sink
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &LifecycleEvent) {}
}
