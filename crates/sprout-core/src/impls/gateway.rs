//! SandboxGateway - 決済 gateway の開発用実装
//!
//! intent ごとの残高を持ち、capture / refund を記録します。同じ
//! idempotency key の呼び出しは最初の結果をそのまま返します（replay）。

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

use crate::domain::{Money, RefundRecord};
use crate::ports::{GatewayError, PaymentGateway, RefundRequest};

#[derive(Default)]
struct Ledger {
    /// intent id -> (authorized amount, refunded so far)
    intents: HashMap<String, (Money, Money)>,
    captured: Vec<String>,
    refunds: Vec<RefundRecord>,
    replays: HashMap<String, Option<RefundRecord>>,
    /// 次の呼び出しで返すエラー（テスト用）
    injected: VecDeque<GatewayError>,
}

#[derive(Default)]
pub struct SandboxGateway {
    ledger: Mutex<Ledger>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// 承認済み intent を登録
    pub fn with_intent(self, intent_id: &str, amount: Money) -> Self {
        self.add_intent(intent_id, amount);
        self
    }

    pub fn add_intent(&self, intent_id: &str, amount: Money) {
        self.ledger()
            .intents
            .insert(intent_id.to_string(), (amount, Money::ZERO));
    }

    /// 次の `n` 回の呼び出しを `error` で失敗させる
    pub fn fail_next(&self, n: usize, error: GatewayError) {
        let mut ledger = self.ledger();
        for _ in 0..n {
            ledger.injected.push_back(error.clone());
        }
    }

    pub fn captured(&self) -> Vec<String> {
        self.ledger().captured.clone()
    }

    pub fn refunds(&self) -> Vec<RefundRecord> {
        self.ledger().refunds.clone()
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn capture(
        &self,
        intent_id: &str,
        idempotency_key: Option<&str>,
    ) -> Result<(), GatewayError> {
        let mut ledger = self.ledger();
        if let Some(error) = ledger.injected.pop_front() {
            return Err(error);
        }
        if let Some(key) = idempotency_key
            && ledger.replays.contains_key(key)
        {
            return Ok(());
        }
        if !ledger.intents.contains_key(intent_id) {
            return Err(GatewayError::Declined(format!("unknown intent {intent_id}")));
        }
        ledger.captured.push(intent_id.to_string());
        if let Some(key) = idempotency_key {
            ledger.replays.insert(key.to_string(), None);
        }
        info!(intent_id, "sandbox capture");
        Ok(())
    }

    async fn refund(
        &self,
        request: &RefundRequest,
        idempotency_key: Option<&str>,
    ) -> Result<RefundRecord, GatewayError> {
        let mut ledger = self.ledger();
        if let Some(error) = ledger.injected.pop_front() {
            return Err(error);
        }
        if let Some(key) = idempotency_key
            && let Some(Some(previous)) = ledger.replays.get(key)
        {
            return Ok(previous.clone());
        }

        let (authorized, refunded) = ledger
            .intents
            .get(&request.intent_id)
            .copied()
            .ok_or_else(|| {
                GatewayError::Declined(format!("unknown intent {}", request.intent_id))
            })?;
        let remaining = authorized - refunded;
        let amount = request.amount.unwrap_or(remaining);
        if !amount.is_positive() || amount > remaining {
            return Err(GatewayError::Declined(format!(
                "cannot refund {amount} of remaining {remaining}"
            )));
        }

        let record = RefundRecord {
            refund_id: format!("re_{:016x}", rand::random::<u64>()),
            intent_id: request.intent_id.clone(),
            amount,
            reason: request.reason.clone(),
        };
        ledger
            .intents
            .insert(request.intent_id.clone(), (authorized, refunded + amount));
        ledger.refunds.push(record.clone());
        if let Some(key) = idempotency_key {
            ledger.replays.insert(key.to_string(), Some(record.clone()));
        }
        info!(intent_id = %record.intent_id, refund_id = %record.refund_id, amount = %amount, "sandbox refund");
        Ok(record)
    }
}
