//! Status - health / stats クエリ

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::QueueName;
use crate::queue::{QueueCounts, QueueStore, StoreBackend};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub backend: StoreBackend,
    /// Tasks survive a restart.
    pub durable: bool,
    pub reachable: bool,
    /// Running on the in-memory fallback because the durable store was unreachable.
    pub degraded: bool,
    pub queues: BTreeMap<QueueName, QueueCounts>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.reachable && !self.degraded
    }
}

pub async fn health(store: &dyn QueueStore) -> HealthReport {
    let backend = store.backend();
    let mut reachable = match store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "queue store ping failed");
            false
        }
    };

    let mut queues = BTreeMap::new();
    if reachable {
        for queue in QueueName::ALL {
            match store.counts(queue).await {
                Ok(counts) => {
                    queues.insert(queue, counts);
                }
                Err(e) => {
                    warn!(queue = %queue, error = %e, "queue counts unavailable");
                    reachable = false;
                }
            }
        }
    }

    HealthReport {
        backend,
        durable: backend.is_durable() && !store.is_degraded(),
        reachable,
        degraded: store.is_degraded(),
        queues,
    }
}
