//! Error taxonomy shared by every store and wrapper.
//!
//! All fallible operations in the workspace return [`KvResult`]. The variants
//! mirror the operational boundary: invalid input (`InvalidKey`, `InvalidTtl`,
//! `MismatchedLengths`), codec failures (`Serialization`, `Deserialization`),
//! wrapper rejections (`ValueTooLarge`, `Decryption`, `CircuitOpen`), and
//! backend lifecycle failures (`SetupFailed`, `Connection`, `StoreClosed`).
//!
//! Backend-internal errors that have no more specific kind are folded into
//! [`KvError::Backend`] via `anyhow`, preserving the source chain.

/// Convenience alias used across the workspace.
pub type KvResult<T> = Result<T, KvError>;

/// Errors surfaced by stores and wrappers.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum KvError {
    /// User key or collection violates a reserved-prefix or backend rule.
    #[error("invalid key: {reason}")]
    InvalidKey { reason: String },

    /// TTL passed to put was zero, negative, or not a finite number.
    #[error("invalid ttl {ttl}: must be a positive, finite number of seconds")]
    InvalidTtl { ttl: f64 },

    /// Value cannot be encoded for storage.
    #[error("serialization failed: {reason}")]
    Serialization { reason: String },

    /// Stored data cannot be decoded back into an entry.
    ///
    /// The get path converts this into a miss (`None`) and logs; it is
    /// surfaced directly only where corruption matters to the caller.
    #[error("deserialization failed: {reason}")]
    Deserialization { reason: String },

    /// Size-limit wrapper rejection.
    #[error("serialized value is {size} bytes, exceeding the limit of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    /// Backend unavailable or misconfigured during setup. Fatal for the
    /// store instance.
    #[error("store setup failed: {reason}")]
    SetupFailed { reason: String },

    /// Backend unavailable during an operation.
    #[error("store connection error: {reason}")]
    Connection { reason: String },

    /// Encryption wrapper could not decrypt a stored value.
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// Circuit breaker is open and refusing calls.
    #[error("circuit breaker is open; retry in {retry_after_secs:.1}s")]
    CircuitOpen { retry_after_secs: f64 },

    /// Operation attempted after `close()`.
    #[error("operation attempted on closed store")]
    StoreClosed,

    /// Capability not advertised by this store.
    #[error("operation `{operation}` is not supported by this store")]
    UnsupportedOperation { operation: &'static str },

    /// `put_many` called with differing key/value counts.
    #[error("put_many requires equal-length inputs ({keys} keys, {values} values)")]
    MismatchedLengths { keys: usize, values: usize },

    /// Backend-internal failure with no more specific kind.
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl KvError {
    /// Shorthand for a [`KvError::Deserialization`] with the given reason.
    #[must_use]
    pub fn deserialization(reason: impl Into<String>) -> Self {
        Self::Deserialization {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`KvError::Serialization`] with the given reason.
    #[must_use]
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`KvError::InvalidKey`] with the given reason.
    #[must_use]
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Whether this error is a plausible transient backend condition.
    ///
    /// Used as the default predicate by the retry and circuit-breaker
    /// wrappers; callers can supply their own predicate instead.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Backend(_))
    }
}
