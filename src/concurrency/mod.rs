pub mod optimistic;
pub mod retry;

pub use optimistic::{OptimisticLock, OptimisticOutcome, Versioned, VersionedStore};
pub use retry::{with_retry, Backoff, ConflictRetryPolicy, RetryConfig, RetryPolicy};
