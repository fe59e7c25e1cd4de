//! Sanitization strategies for keys and collection names.
//!
//! Backends constrain identifier length and alphabet; user input does not.
//! A [`SanitizationStrategy`] maps user text to a backend-legal identifier
//! without colliding with other user input, by reserving the prefixes
//! [`HASH_PREFIX`] and [`SANITIZE_PREFIX`] for transformed values and
//! rejecting user input that starts with them.
//!
//! Strategies are pure and deterministic; `try_unsanitize` is a best-effort
//! reverse used only for enumeration display.

use sha2::{Digest, Sha256};

use crate::errors::{KvError, KvResult};

/// Prefix reserved for fully-hashed identifiers.
pub const HASH_PREFIX: &str = "H_";

/// Prefix reserved for character-sanitized identifiers.
pub const SANITIZE_PREFIX: &str = "S_";

/// Separator between a sanitized fragment and its disambiguating hash.
pub const HASH_FRAGMENT_SEPARATOR: char = '-';

/// Replacement for characters outside a strategy's allowed alphabet.
pub const REPLACEMENT_CHARACTER: char = '_';

/// Default maximum identifier length before hashing kicks in.
pub const DEFAULT_MAX_LENGTH: usize = 240;

const HASH_FRAGMENT_LENGTH: usize = 8;

/// A user-selectable identifier sanitization strategy.
///
/// | Strategy | Transform | Reserved prefix |
/// |---|---|---|
/// | `Passthrough` | identity | none |
/// | `AlwaysHash` | full SHA-256 hex | none (hex output cannot collide) |
/// | `HashExcessLength` | hash only overlong input | `H_` |
/// | `Hybrid` | replace + truncate + hash fragment | `S_` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizationStrategy {
    /// Identity; accepts any input.
    Passthrough,
    /// Replaces every input with its fixed-length hex hash. Irreversible.
    AlwaysHash,
    /// Returns input unchanged when it fits, otherwise `H_` + 62 hash chars
    /// (64 characters total).
    HashExcessLength {
        /// Maximum length (in characters) before hashing.
        max_length: usize,
    },
    /// Returns input unchanged when every character is allowed and it fits,
    /// otherwise `S_` + character-sanitized-and-truncated input + `-` +
    /// 8-char hash of the original.
    Hybrid {
        /// Maximum output length in characters, including the prefix.
        max_length: usize,
        /// The allowed character alphabet.
        allowed_characters: String,
    },
}

impl SanitizationStrategy {
    /// Hash-excess-length with the default 240-character limit.
    #[must_use]
    pub fn hash_excess_length() -> Self {
        Self::HashExcessLength {
            max_length: DEFAULT_MAX_LENGTH,
        }
    }

    /// Hybrid strategy restricted to filesystem-safe names.
    #[must_use]
    pub fn filesystem_safe(max_length: usize) -> Self {
        Self::Hybrid {
            max_length,
            allowed_characters:
                "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_.".to_string(),
        }
    }

    /// Hybrid strategy restricted to lowercase index-name alphabets
    /// (search backends reject uppercase and most punctuation).
    #[must_use]
    pub fn index_name_safe(max_length: usize) -> Self {
        Self::Hybrid {
            max_length,
            allowed_characters: "abcdefghijklmnopqrstuvwxyz0123456789-_".to_string(),
        }
    }

    /// Maps user text to a backend-legal identifier.
    #[must_use]
    pub fn sanitize(&self, value: &str) -> String {
        match self {
            Self::Passthrough => value.to_string(),
            Self::AlwaysHash => sha256_hex(value),
            Self::HashExcessLength { max_length } => {
                if value.chars().count() <= *max_length {
                    value.to_string()
                } else {
                    // Two prefix chars + 62 hash chars = 64 total.
                    format!("{HASH_PREFIX}{}", &sha256_hex(value)[..62])
                }
            }
            Self::Hybrid {
                max_length,
                allowed_characters,
            } => hybrid_sanitize(value, *max_length, allowed_characters),
        }
    }

    /// Rejects user input that starts with a prefix this strategy reserves.
    ///
    /// # Errors
    ///
    /// [`KvError::InvalidKey`] on a reserved prefix.
    pub fn validate(&self, value: &str) -> KvResult<()> {
        let reserved = match self {
            Self::Passthrough | Self::AlwaysHash => return Ok(()),
            Self::HashExcessLength { .. } => HASH_PREFIX,
            Self::Hybrid { .. } => SANITIZE_PREFIX,
        };
        if value.starts_with(reserved) {
            return Err(KvError::invalid_key(format!(
                "keys cannot start with reserved prefix `{reserved}`"
            )));
        }
        Ok(())
    }

    /// Best-effort reverse mapping for enumeration display.
    ///
    /// Values the strategy would have left unchanged ARE the original;
    /// transformed values are unrecoverable and yield `None`.
    #[must_use]
    pub fn try_unsanitize(&self, value: &str) -> Option<String> {
        match self {
            Self::Passthrough => Some(value.to_string()),
            Self::AlwaysHash => None,
            Self::HashExcessLength { .. } => {
                (!value.starts_with(HASH_PREFIX)).then(|| value.to_string())
            }
            Self::Hybrid { .. } => (!value.starts_with(SANITIZE_PREFIX)).then(|| value.to_string()),
        }
    }
}

/// Lowercase hex SHA-256 of the input.
#[must_use]
pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

fn hybrid_sanitize(value: &str, max_length: usize, allowed: &str) -> String {
    let fits = value.chars().count() <= max_length;
    let clean = value.chars().all(|c| allowed.contains(c));
    if fits && clean {
        return value.to_string();
    }

    // Prefix + fragment + separator + hash must fit inside max_length.
    let budget = max_length
        .saturating_sub(SANITIZE_PREFIX.len())
        .saturating_sub(1 + HASH_FRAGMENT_LENGTH);
    let fragment: String = value
        .chars()
        .map(|c| {
            if allowed.contains(c) {
                c
            } else {
                REPLACEMENT_CHARACTER
            }
        })
        .take(budget)
        .collect();
    let hash = &sha256_hex(value)[..HASH_FRAGMENT_LENGTH];
    format!("{SANITIZE_PREFIX}{fragment}{HASH_FRAGMENT_SEPARATOR}{hash}")
}
