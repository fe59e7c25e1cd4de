//! Per-backend serialization adapters.
//!
//! A [`SerializationAdapter`] translates a [`ManagedEntry`] to and from one
//! backend's storage shape. Four archetypes cover every backend:
//!
//! | Adapter | Storage layout | Used by |
//! |---|---|---|
//! | [`FullJsonAdapter`] | one string: the complete envelope | caches, object stores |
//! | [`StringifiedDocumentAdapter`] | document with a JSON-string value | SQL rows |
//! | [`NativeDocumentAdapter`] | document with a structured value | document DBs |
//! | [`FlattenedDocumentAdapter`] | document with a flattened value field | search indexes |
//!
//! The document adapters accept their legacy sibling shape on read
//! (`value.string` alongside `value.object` / `value.flat`) so a deployment
//! can migrate between storage modes without a rewrite pass.

use serde_json::Value;

use crate::entry::{
    format_timestamp, parse_timestamp, parse_value_object, EnvelopeFields, ManagedEntry, ValueMap,
};
use crate::errors::{KvError, KvResult};

const KEY_FIELD: &str = "key";
const COLLECTION_FIELD: &str = "collection";
const VALUE_FIELD: &str = "value";
const CREATED_AT_FIELD: &str = "created_at";
const EXPIRES_AT_FIELD: &str = "expires_at";
const OBJECT_SUBFIELD: &str = "object";
const STRING_SUBFIELD: &str = "string";
const FLAT_SUBFIELD: &str = "flat";

/// A backend storage unit: either an opaque string or a structured document.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageDatum {
    /// Backends that store strings (caches, files, object bodies).
    Text(String),
    /// Backends that store structured documents (SQL rows, search docs).
    Document(ValueMap),
}

impl StorageDatum {
    fn into_text(self) -> KvResult<String> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Document(_) => Err(KvError::deserialization(
                "expected stored data to be a string",
            )),
        }
    }

    fn into_document(self) -> KvResult<ValueMap> {
        match self {
            Self::Document(document) => Ok(document),
            Self::Text(_) => Err(KvError::deserialization(
                "expected stored data to be a document",
            )),
        }
    }
}

/// Translates entries to and from one backend's storage shape.
pub trait SerializationAdapter: Send + Sync {
    /// Converts an entry into the backend storage form.
    ///
    /// # Errors
    ///
    /// [`KvError::Serialization`] when the entry cannot be encoded.
    fn to_storage(
        &self,
        key: &str,
        entry: &ManagedEntry,
        collection: Option<&str>,
    ) -> KvResult<StorageDatum>;

    /// Reconstructs an entry from the backend storage form.
    ///
    /// # Errors
    ///
    /// [`KvError::Deserialization`] when the stored data is malformed.
    fn from_storage(&self, data: StorageDatum) -> KvResult<ManagedEntry>;
}

/// Serializes the complete envelope as one JSON string.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullJsonAdapter;

impl SerializationAdapter for FullJsonAdapter {
    fn to_storage(
        &self,
        _key: &str,
        entry: &ManagedEntry,
        _collection: Option<&str>,
    ) -> KvResult<StorageDatum> {
        entry.to_json(EnvelopeFields::ALL).map(StorageDatum::Text)
    }

    fn from_storage(&self, data: StorageDatum) -> KvResult<ManagedEntry> {
        ManagedEntry::from_json(&data.into_text()?, true)
    }
}

/// Serializes entries as documents with the value stringified.
///
/// The backend can index the metadata fields while treating the value as an
/// opaque string.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringifiedDocumentAdapter;

impl SerializationAdapter for StringifiedDocumentAdapter {
    fn to_storage(
        &self,
        key: &str,
        entry: &ManagedEntry,
        _collection: Option<&str>,
    ) -> KvResult<StorageDatum> {
        let mut document = entry.to_document(EnvelopeFields::ALL, true)?;
        document.insert(KEY_FIELD.to_string(), Value::String(key.to_string()));
        Ok(StorageDatum::Document(document))
    }

    fn from_storage(&self, data: StorageDatum) -> KvResult<ManagedEntry> {
        let mut document = data.into_document()?;
        document.remove(KEY_FIELD);
        ManagedEntry::from_document(document, true, true)
    }
}

/// Serializes entries as documents with a natively structured value under
/// `value.object`, letting document backends query into the value.
///
/// Reads also accept the legacy `value.string` shape for migration from
/// stringified storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeDocumentAdapter;

impl SerializationAdapter for NativeDocumentAdapter {
    fn to_storage(
        &self,
        key: &str,
        entry: &ManagedEntry,
        _collection: Option<&str>,
    ) -> KvResult<StorageDatum> {
        let mut holder = ValueMap::new();
        holder.insert(
            OBJECT_SUBFIELD.to_string(),
            Value::Object(entry.value.clone()),
        );

        let mut document = ValueMap::new();
        document.insert(KEY_FIELD.to_string(), Value::String(key.to_string()));
        document.insert(VALUE_FIELD.to_string(), Value::Object(holder));
        insert_timestamps(&mut document, entry);
        Ok(StorageDatum::Document(document))
    }

    fn from_storage(&self, data: StorageDatum) -> KvResult<ManagedEntry> {
        let document = data.into_document()?;
        let value = extract_value_holder(&document, OBJECT_SUBFIELD)?;
        let (created_at, expires_at) = extract_timestamps(&document)?;
        ManagedEntry::from_parts(value, created_at, expires_at)
    }
}

/// Serializes entries for search indexes: the value lives under a flattened
/// `value.flat` field (stored, not term-indexed) and the collection name is
/// embedded in the document for multi-tenant indexes.
///
/// Reads also accept the legacy `value.string` shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlattenedDocumentAdapter;

impl SerializationAdapter for FlattenedDocumentAdapter {
    fn to_storage(
        &self,
        key: &str,
        entry: &ManagedEntry,
        collection: Option<&str>,
    ) -> KvResult<StorageDatum> {
        let mut holder = ValueMap::new();
        holder.insert(
            FLAT_SUBFIELD.to_string(),
            Value::Object(entry.value.clone()),
        );

        let mut document = ValueMap::new();
        document.insert(
            COLLECTION_FIELD.to_string(),
            Value::String(collection.unwrap_or_default().to_string()),
        );
        document.insert(KEY_FIELD.to_string(), Value::String(key.to_string()));
        document.insert(VALUE_FIELD.to_string(), Value::Object(holder));
        insert_timestamps(&mut document, entry);
        Ok(StorageDatum::Document(document))
    }

    fn from_storage(&self, data: StorageDatum) -> KvResult<ManagedEntry> {
        let document = data.into_document()?;
        let value = extract_value_holder(&document, FLAT_SUBFIELD)?;
        let (created_at, expires_at) = extract_timestamps(&document)?;
        ManagedEntry::from_parts(value, created_at, expires_at)
    }
}

fn insert_timestamps(document: &mut ValueMap, entry: &ManagedEntry) {
    if let Some(created) = entry.created_at {
        document.insert(
            CREATED_AT_FIELD.to_string(),
            Value::String(format_timestamp(created)),
        );
    }
    if let Some(expires) = entry.expires_at {
        document.insert(
            EXPIRES_AT_FIELD.to_string(),
            Value::String(format_timestamp(expires)),
        );
    }
}

fn extract_timestamps(
    document: &ValueMap,
) -> KvResult<(
    Option<chrono::DateTime<chrono::Utc>>,
    Option<chrono::DateTime<chrono::Utc>>,
)> {
    let created_at = extract_timestamp(document, CREATED_AT_FIELD)?;
    let expires_at = extract_timestamp(document, EXPIRES_AT_FIELD)?;
    Ok((created_at, expires_at))
}

fn extract_timestamp(
    document: &ValueMap,
    field: &str,
) -> KvResult<Option<chrono::DateTime<chrono::Utc>>> {
    match document.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => parse_timestamp(field, raw).map(Some),
        Some(_) => Err(KvError::deserialization(format!(
            "expected `{field}` field to be a string"
        ))),
    }
}

/// Pulls the value out of a `{value: {<subfield>: ...}}` holder, falling
/// back to the legacy `{value: {string: <json>}}` shape.
fn extract_value_holder(document: &ValueMap, native_subfield: &str) -> KvResult<ValueMap> {
    let Some(Value::Object(holder)) = document.get(VALUE_FIELD) else {
        return Err(KvError::deserialization(
            "expected `value` field to be an object",
        ));
    };

    if let Some(native) = holder.get(native_subfield) {
        let Value::Object(map) = native else {
            return Err(KvError::deserialization(format!(
                "expected `value.{native_subfield}` to be an object"
            )));
        };
        return Ok(map.clone());
    }

    if let Some(legacy) = holder.get(STRING_SUBFIELD) {
        let Value::String(json) = legacy else {
            return Err(KvError::deserialization(
                "expected `value.string` to be a JSON string",
            ));
        };
        return Ok(parse_value_object(json)?);
    }

    Err(KvError::deserialization(format!(
        "expected `value` to contain an `{native_subfield}` or `string` subfield"
    )))
}
