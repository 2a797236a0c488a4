//! Read-transform-write updates guarded by a version stamp.
//!
//! A record is read together with its version, a pure transform computes the
//! replacement, and the write only lands if the stored version is still the
//! one that was read. Conflicting writers are retried through
//! [`with_retry`] with the configured backoff; any other failure aborts at
//! once.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

use super::retry::{with_retry, ConflictRetryPolicy, RetryConfig};
use crate::config::FleetConfig;
use crate::errors::ServiceError;
use crate::metrics::OPTIMISTIC_RETRIES;

/// A record carrying an optimistic-locking version stamp.
pub trait Versioned {
    fn version(&self) -> i32;
}

/// Storage that can perform a version-conditioned write.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    type Key: Debug + Send + Sync;
    type Record: Versioned + Clone + Send + Sync;

    async fn read(&self, key: &Self::Key) -> Result<Self::Record, ServiceError>;

    /// Persists `record` only if the stored version still equals
    /// `expected_version`, otherwise fails with
    /// [`ServiceError::ConcurrentModification`]. Returns the stored record
    /// with its new version.
    async fn write_if_unchanged(
        &self,
        expected_version: i32,
        record: Self::Record,
    ) -> Result<Self::Record, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct OptimisticOutcome<R> {
    pub record: R,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct OptimisticLock {
    config: RetryConfig,
}

impl Default for OptimisticLock {
    fn default() -> Self {
        Self::from_fleet_config(&FleetConfig::default())
    }
}

impl OptimisticLock {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn from_fleet_config(cfg: &FleetConfig) -> Self {
        Self::new(RetryConfig::linear(
            cfg.optimistic_max_attempts,
            cfg.optimistic_backoff(),
        ))
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub async fn update<S, F>(
        &self,
        store: &S,
        key: &S::Key,
        transform: F,
    ) -> Result<OptimisticOutcome<S::Record>, ServiceError>
    where
        S: VersionedStore + ?Sized,
        F: Fn(&S::Record) -> Result<S::Record, ServiceError> + Send + Sync,
    {
        let attempts = AtomicU32::new(0);

        let result = with_retry(&self.config, ConflictRetryPolicy, || {
            let attempts = &attempts;
            let transform = &transform;
            async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt > 1 {
                    OPTIMISTIC_RETRIES.inc();
                    debug!(?key, attempt, "Re-reading record after version conflict");
                }

                let current = store.read(key).await?;
                let next = transform(&current)?;
                store.write_if_unchanged(current.version(), next).await
            }
        })
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match result {
            Ok(record) => Ok(OptimisticOutcome { record, attempts }),
            Err(e) if e.is_conflict() => {
                warn!(?key, attempts, "Optimistic update gave up after repeated conflicts");
                Err(ServiceError::RetriesExhausted {
                    attempts,
                    last_error: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }
}
