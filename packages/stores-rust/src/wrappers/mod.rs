//! Composable decorators over any [`KeyValueStore`](crate::store::KeyValueStore).
//!
//! Each wrapper implements the store contract by delegating to an inner
//! store, adding one orthogonal behavior. Wrappers nest; order matters and
//! is documented per wrapper (e.g. retry inside the circuit breaker trips
//! after retries are exhausted, retry outside probes again after recovery).
//!
//! | Wrapper | Behavior |
//! |---|---|
//! | [`TtlClampWrapper`] | clamp TTLs into a configured range |
//! | [`SizeLimitWrapper`] | reject oversized values |
//! | [`PassthroughCacheWrapper`] | read-through cache over a primary |
//! | [`FallbackWrapper`] | fail over reads to a secondary store |
//! | [`RetryWrapper`] | retry transient errors with backoff |
//! | [`CircuitBreakerWrapper`] | fail fast during backend outages |
//! | [`EncryptionWrapper`] | AEAD-encrypt values at rest |
//! | [`VersioningWrapper`] | invalidate values across schema versions |
//! | [`StatisticsWrapper`] | count operations per collection |
//! | [`LoggingWrapper`] | log every operation and outcome |
//! | [`SingleCollectionWrapper`] | flatten collections into one namespace |
//! | [`PrefixCollectionsWrapper`] / [`PrefixKeysWrapper`] | transparent prefixes |
//! | [`SanitizationMigrationWrapper`] | dual-store sanitization migration |

pub mod circuit_breaker;
pub mod encryption;
pub mod fallback;
pub mod logging;
pub mod passthrough_cache;
pub mod prefix;
pub mod retry;
pub mod sanitization_migration;
pub mod single_collection;
pub mod size_limit;
pub mod statistics;
pub mod ttl_clamp;
pub mod versioning;

use std::sync::Arc;

use keygrid_core::KvError;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerWrapper, CircuitState};
pub use encryption::{DecryptionErrorMode, EncryptionWrapper, KeySource};
pub use fallback::FallbackWrapper;
pub use logging::LoggingWrapper;
pub use passthrough_cache::PassthroughCacheWrapper;
pub use prefix::{PrefixCollectionsWrapper, PrefixKeysWrapper};
pub use retry::{RetryConfig, RetryWrapper};
pub use sanitization_migration::{EntryLocation, SanitizationMigrationWrapper};
pub use single_collection::SingleCollectionWrapper;
pub use size_limit::SizeLimitWrapper;
pub use statistics::{CollectionStatisticsSnapshot, OperationCounts, StatisticsWrapper};
pub use ttl_clamp::TtlClampWrapper;
pub use versioning::VersioningWrapper;

/// Predicate selecting which errors a wrapper treats as actionable
/// (retryable, breaker-tripping). Non-matching errors pass through
/// untouched.
pub type ErrorPredicate = Arc<dyn Fn(&KvError) -> bool + Send + Sync>;

/// The default predicate: transient backend conditions only.
#[must_use]
pub fn transient_errors() -> ErrorPredicate {
    Arc::new(KvError::is_transient)
}
