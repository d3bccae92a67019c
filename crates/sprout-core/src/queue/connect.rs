use std::sync::Arc;

use tracing::{info, warn};

use super::{InMemoryQueueStore, QueueStore, RedisQueueStore};
use crate::config::{BackendKind, SproutConfig};
use crate::domain::QueueName;
use crate::ports::Clock;

/// Open the configured queue store.
///
/// An unreachable Redis does not stop the service: the failure is logged and
/// an in-memory store flagged as degraded takes its place, so producers keep
/// working (without durability) and health reports the condition.
pub async fn connect_store(config: &SproutConfig, clock: Arc<dyn Clock>) -> Arc<dyn QueueStore> {
    let store = &config.store;
    match store.backend {
        BackendKind::Memory => {
            info!("using in-memory queue store; tasks do not survive a restart");
            Arc::new(memory_store(config, clock))
        }
        BackendKind::Redis => {
            match RedisQueueStore::connect(
                &store.redis_url,
                &store.key_prefix,
                store.connect_timeout(),
                Arc::clone(&clock),
            )
            .await
            {
                Ok(redis) => {
                    info!(prefix = %store.key_prefix, "connected to redis queue store");
                    let redis = QueueName::ALL.iter().fold(redis, |s, q| {
                        s.with_retention(*q, config.queue(*q).retention())
                    });
                    Arc::new(redis)
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "redis unreachable; falling back to degraded in-memory queue store"
                    );
                    Arc::new(memory_store(config, clock).degraded())
                }
            }
        }
    }
}

fn memory_store(config: &SproutConfig, clock: Arc<dyn Clock>) -> InMemoryQueueStore {
    QueueName::ALL
        .iter()
        .fold(InMemoryQueueStore::new(clock), |s, q| {
            s.with_retention(*q, config.queue(*q).retention())
        })
}
