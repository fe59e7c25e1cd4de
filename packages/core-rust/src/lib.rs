//! `KeyGrid` Core -- managed entries, envelopes, serialization adapters, sanitization.
//!
//! This crate provides the foundation layer for the `KeyGrid` key-value fabric:
//!
//! - **Entry** ([`entry`]): `ManagedEntry`, the universal stored record, and its
//!   JSON envelope round-trip
//! - **Serialization** ([`serialization`]): per-backend adapters translating a
//!   `ManagedEntry` to the backend's storage shape
//! - **Sanitization** ([`sanitize`]): strategies mapping user keys/collections to
//!   backend-legal identifiers with reserved-prefix collision avoidance
//! - **Compound** ([`compound`]): `collection::key` helpers for single-namespace
//!   backends
//! - **Errors** ([`errors`]): the `KvError` taxonomy shared by every store and
//!   wrapper
//!
//! No async code and no I/O live here; everything is pure data plumbing.

pub mod compound;
pub mod entry;
pub mod errors;
pub mod sanitize;
pub mod serialization;

// Entry
pub use entry::{EnvelopeFields, ManagedEntry, ValueMap, CURRENT_ENVELOPE_VERSION};

// Errors
pub use errors::{KvError, KvResult};

// Sanitization
pub use sanitize::{SanitizationStrategy, HASH_PREFIX, SANITIZE_PREFIX};

// Serialization
pub use serialization::{
    FlattenedDocumentAdapter, FullJsonAdapter, NativeDocumentAdapter, SerializationAdapter,
    StorageDatum, StringifiedDocumentAdapter,
};

// Compound keys
pub use compound::{compound_key, key_from_compound_key, COMPOUND_SEPARATOR};
