//! Parallel replica-status probe.
//!
//! Fans a per-pool status query out across all candidate pools with a bounded
//! timeout. A pool that errors or does not respond in time contributes no
//! status and is classified as "not confirmed" downstream; it never blocks
//! the pass.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::Semaphore;

use crate::services::{PoolStatusClient, ReplicaProbe};
use crate::types::{FileId, ReplicaStatus};

pub struct ParallelReplicaProbe {
    client: Arc<dyn PoolStatusClient>,
    timeout: Duration,
    fanout: Semaphore,
}

impl ParallelReplicaProbe {
    pub fn new(client: Arc<dyn PoolStatusClient>, timeout: Duration, max_fanout: usize) -> Self {
        Self {
            client,
            timeout,
            fanout: Semaphore::new(max_fanout.max(1)),
        }
    }
}

#[async_trait]
impl ReplicaProbe for ParallelReplicaProbe {
    async fn verify_locations(&self, file: &FileId, locations: &[String]) -> Vec<ReplicaStatus> {
        let queries = locations.iter().map(|pool| async move {
            let _permit = self.fanout.acquire().await.ok()?;
            match tokio::time::timeout(self.timeout, self.client.replica_status(pool, file)).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(err)) => {
                    tracing::debug!(pool = %pool, file = %file, error = %err,
                        "replica probe failed; treating as not confirmed");
                    None
                }
                Err(_) => {
                    tracing::debug!(pool = %pool, file = %file,
                        "replica probe timed out; treating as not confirmed");
                    None
                }
            }
        });
        join_all(queries).await.into_iter().flatten().collect()
    }
}
