//! The universal stored record and its JSON envelope.
//!
//! [`ManagedEntry`] is the unit of storage for every backend: a JSON object
//! value plus creation/expiration metadata and an envelope version tag. The
//! envelope is the canonical wire form:
//!
//! ```json
//! { "version": 1,
//!   "value": { "...": "..." },
//!   "created_at": "2025-01-01T00:00:00Z",
//!   "expires_at": "2025-01-01T01:00:00Z" }
//! ```
//!
//! Fields are absent when unset. Collection and key are never embedded in the
//! envelope; they are external addressing. Backends that keep metadata in
//! native columns omit it from the envelope via [`EnvelopeFields`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::errors::{KvError, KvResult};

/// A stored value: a JSON object mapping text keys to JSON values.
pub type ValueMap = serde_json::Map<String, Value>;

/// Envelope format version written by this crate.
pub const CURRENT_ENVELOPE_VERSION: u16 = 1;

const VERSION_FIELD: &str = "version";
const VALUE_FIELD: &str = "value";
const CREATED_AT_FIELD: &str = "created_at";
const EXPIRES_AT_FIELD: &str = "expires_at";

/// Controls which metadata fields an envelope encode emits.
///
/// Backends that store timestamps in native columns encode with the
/// corresponding flag off and supply the metadata externally on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeFields {
    /// Emit the envelope wrapper at all (`version` + `value`). When false the
    /// encode produces the bare value object.
    pub metadata: bool,
    /// Emit `expires_at` (only meaningful when `metadata` is true).
    pub expiration: bool,
    /// Emit `created_at` (only meaningful when `metadata` is true).
    pub creation: bool,
}

impl EnvelopeFields {
    /// Full envelope: version, value, and both timestamps.
    pub const ALL: Self = Self {
        metadata: true,
        expiration: true,
        creation: true,
    };

    /// Bare value object, no envelope wrapper.
    pub const VALUE_ONLY: Self = Self {
        metadata: false,
        expiration: false,
        creation: false,
    };

    /// Envelope wrapper without timestamps, for backends with native
    /// timestamp columns.
    pub const VERSION_ONLY: Self = Self {
        metadata: true,
        expiration: false,
        creation: false,
    };
}

/// The in-memory record describing one stored value plus its metadata.
///
/// Invariants (enforced on construction, not on decode -- legacy records
/// flow through unmodified):
///
/// - if `expires_at` is set, `created_at` is set and `created_at <= expires_at`
/// - the value is a JSON object (enforced by the type)
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedEntry {
    /// The stored value.
    pub value: ValueMap,
    /// Instant of creation, UTC. Legacy records may lack it.
    pub created_at: Option<DateTime<Utc>>,
    /// Instant of expiration, UTC. Absent means the entry never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Envelope format version tag.
    pub version: u16,
}

impl ManagedEntry {
    /// Creates an entry with no metadata.
    #[must_use]
    pub fn new(value: ValueMap) -> Self {
        Self {
            value,
            created_at: None,
            expires_at: None,
            version: CURRENT_ENVELOPE_VERSION,
        }
    }

    /// Creates an entry stamped `created_at = now`, expiring `ttl` seconds
    /// from now when `ttl` is given.
    ///
    /// # Errors
    ///
    /// [`KvError::InvalidTtl`] when `ttl` is zero, negative, or not finite.
    pub fn with_ttl(value: ValueMap, ttl: Option<f64>) -> KvResult<Self> {
        let now = Utc::now();
        let expires_at = match ttl {
            Some(secs) => Some(now + ttl_duration(secs)?),
            None => None,
        };
        Ok(Self {
            value,
            created_at: Some(now),
            expires_at,
            version: CURRENT_ENVELOPE_VERSION,
        })
    }

    /// Creates an entry from explicit parts, validating the metadata
    /// invariant.
    ///
    /// # Errors
    ///
    /// [`KvError::Serialization`] when `expires_at` is set without
    /// `created_at`, or precedes it.
    pub fn from_parts(
        value: ValueMap,
        created_at: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> KvResult<Self> {
        if let Some(expires) = expires_at {
            match created_at {
                None => {
                    return Err(KvError::serialization(
                        "entry has expires_at but no created_at",
                    ));
                }
                Some(created) if created > expires => {
                    return Err(KvError::serialization(
                        "entry created_at is after expires_at",
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(Self {
            value,
            created_at,
            expires_at,
            version: CURRENT_ENVELOPE_VERSION,
        })
    }

    /// Remaining time to live in seconds. Negative for expired entries,
    /// `None` when the entry has no expiration.
    #[must_use]
    pub fn ttl(&self) -> Option<f64> {
        self.expires_at
            .map(|expires| (expires - Utc::now()).num_milliseconds() as f64 / 1000.0)
    }

    /// Whether the entry's expiration has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires| expires <= Utc::now())
    }

    /// The value serialized as a JSON object string.
    ///
    /// # Errors
    ///
    /// [`KvError::Serialization`] if encoding fails.
    pub fn value_as_json(&self) -> KvResult<String> {
        serde_json::to_string(&self.value).map_err(|err| KvError::serialization(err.to_string()))
    }

    /// Encodes the entry as its JSON envelope string.
    ///
    /// # Errors
    ///
    /// [`KvError::Serialization`] if encoding fails.
    pub fn to_json(&self, fields: EnvelopeFields) -> KvResult<String> {
        let document = self.to_document(fields, false)?;
        serde_json::to_string(&document).map_err(|err| KvError::serialization(err.to_string()))
    }

    /// Decodes an entry from its JSON envelope string.
    ///
    /// With `includes_metadata` the string must be a full envelope; without
    /// it the string is the bare value object and metadata is left unset
    /// (supplied externally by the caller).
    ///
    /// # Errors
    ///
    /// [`KvError::Deserialization`] naming the offending field.
    pub fn from_json(json: &str, includes_metadata: bool) -> KvResult<Self> {
        let parsed: Value = serde_json::from_str(json)
            .map_err(|err| KvError::deserialization(format!("invalid JSON: {err}")))?;
        let Value::Object(document) = parsed else {
            return Err(KvError::deserialization("expected a JSON object"));
        };
        Self::from_document(document, includes_metadata, false)
    }

    /// Encodes the entry as a structured document for document backends.
    ///
    /// `stringify_value` stores the value as a JSON string inside the
    /// document instead of a nested object (the opaque-value column shape).
    ///
    /// # Errors
    ///
    /// [`KvError::Serialization`] if value encoding fails.
    pub fn to_document(&self, fields: EnvelopeFields, stringify_value: bool) -> KvResult<ValueMap> {
        let value = if stringify_value {
            Value::String(self.value_as_json()?)
        } else {
            Value::Object(self.value.clone())
        };

        if !fields.metadata {
            let Value::Object(map) = value else {
                // Stringified bare values have no document form.
                return Err(KvError::serialization(
                    "bare value documents cannot be stringified",
                ));
            };
            return Ok(map);
        }

        let mut document = ValueMap::new();
        document.insert(VERSION_FIELD.to_string(), Value::from(self.version));
        document.insert(VALUE_FIELD.to_string(), value);
        if fields.creation {
            if let Some(created) = self.created_at {
                document.insert(
                    CREATED_AT_FIELD.to_string(),
                    Value::String(format_timestamp(created)),
                );
            }
        }
        if fields.expiration {
            if let Some(expires) = self.expires_at {
                document.insert(
                    EXPIRES_AT_FIELD.to_string(),
                    Value::String(format_timestamp(expires)),
                );
            }
        }
        Ok(document)
    }

    /// Decodes an entry from a structured document.
    ///
    /// With `includes_metadata` the document is an envelope (`value` plus
    /// optional `version`/timestamps); without it the document itself is the
    /// value. `expects_stringified_value` parses the `value` field as a JSON
    /// string instead of a nested object.
    ///
    /// # Errors
    ///
    /// [`KvError::Deserialization`] naming the offending field.
    pub fn from_document(
        document: ValueMap,
        includes_metadata: bool,
        expects_stringified_value: bool,
    ) -> KvResult<Self> {
        if !includes_metadata {
            return Ok(Self::new(document));
        }

        let mut document = document;
        let raw_value = document
            .remove(VALUE_FIELD)
            .ok_or_else(|| KvError::deserialization("missing `value` field"))?;

        let value = if expects_stringified_value {
            let Value::String(json) = raw_value else {
                return Err(KvError::deserialization(
                    "expected `value` field to be a JSON string",
                ));
            };
            parse_value_object(&json)?
        } else {
            let Value::Object(map) = raw_value else {
                return Err(KvError::deserialization(
                    "expected `value` field to be an object",
                ));
            };
            map
        };

        let version = match document.get(VERSION_FIELD) {
            None => CURRENT_ENVELOPE_VERSION,
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u16::try_from(v).ok())
                .ok_or_else(|| KvError::deserialization("invalid `version` field"))?,
            Some(_) => return Err(KvError::deserialization("invalid `version` field")),
        };

        let created_at = parse_timestamp_field(&document, CREATED_AT_FIELD)?;
        let expires_at = parse_timestamp_field(&document, EXPIRES_AT_FIELD)?;

        Ok(Self {
            value,
            created_at,
            expires_at,
            version,
        })
    }
}

/// Parses a JSON string that must contain an object.
///
/// # Errors
///
/// [`KvError::Deserialization`] when the string is not valid JSON or not an
/// object.
pub fn parse_value_object(json: &str) -> KvResult<ValueMap> {
    let parsed: Value = serde_json::from_str(json)
        .map_err(|err| KvError::deserialization(format!("invalid value JSON: {err}")))?;
    match parsed {
        Value::Object(map) => Ok(map),
        other => Err(KvError::deserialization(format!(
            "expected value to be an object, got {}",
            json_type_name(&other)
        ))),
    }
}

/// Formats a UTC instant as an ISO-8601 / RFC-3339 string.
#[must_use]
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses an ISO-8601 / RFC-3339 string into a UTC instant.
///
/// # Errors
///
/// [`KvError::Deserialization`] naming the field on failure.
pub fn parse_timestamp(field: &str, raw: &str) -> KvResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| KvError::deserialization(format!("invalid `{field}` timestamp: {err}")))
}

fn parse_timestamp_field(document: &ValueMap, field: &str) -> KvResult<Option<DateTime<Utc>>> {
    match document.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => parse_timestamp(field, raw).map(Some),
        Some(_) => Err(KvError::deserialization(format!(
            "expected `{field}` field to be a string"
        ))),
    }
}

/// Converts a TTL in seconds into a chrono duration, validating it.
///
/// # Errors
///
/// [`KvError::InvalidTtl`] when the TTL is zero, negative, or not finite.
pub fn ttl_duration(ttl: f64) -> KvResult<chrono::Duration> {
    if !ttl.is_finite() || ttl <= 0.0 {
        return Err(KvError::InvalidTtl { ttl });
    }
    chrono::Duration::from_std(std::time::Duration::from_secs_f64(ttl))
        .map_err(|_| KvError::InvalidTtl { ttl })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_value() -> ValueMap {
        let Value::Object(map) = json!({"name": "widget", "count": 3, "tags": ["a", "b"]}) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn with_ttl_stamps_metadata() {
        let entry = ManagedEntry::with_ttl(sample_value(), Some(60.0)).unwrap();
        assert!(entry.created_at.is_some());
        assert!(entry.expires_at.is_some());
        let ttl = entry.ttl().unwrap();
        assert!(ttl > 59.0 && ttl <= 60.0, "ttl was {ttl}");
        assert!(!entry.is_expired());
    }

    #[test]
    fn with_ttl_rejects_non_positive() {
        assert!(matches!(
            ManagedEntry::with_ttl(sample_value(), Some(0.0)),
            Err(KvError::InvalidTtl { .. })
        ));
        assert!(matches!(
            ManagedEntry::with_ttl(sample_value(), Some(-5.0)),
            Err(KvError::InvalidTtl { .. })
        ));
        assert!(matches!(
            ManagedEntry::with_ttl(sample_value(), Some(f64::NAN)),
            Err(KvError::InvalidTtl { .. })
        ));
    }

    #[test]
    fn from_parts_validates_invariant() {
        let now = Utc::now();
        let err = ManagedEntry::from_parts(sample_value(), None, Some(now));
        assert!(matches!(err, Err(KvError::Serialization { .. })));

        let err = ManagedEntry::from_parts(
            sample_value(),
            Some(now),
            Some(now - chrono::Duration::seconds(1)),
        );
        assert!(matches!(err, Err(KvError::Serialization { .. })));

        let ok = ManagedEntry::from_parts(sample_value(), Some(now), None);
        assert!(ok.is_ok());
    }

    #[test]
    fn expired_entry_reports_expired_and_negative_ttl() {
        let now = Utc::now();
        let entry = ManagedEntry::from_parts(
            sample_value(),
            Some(now - chrono::Duration::seconds(10)),
            Some(now - chrono::Duration::seconds(5)),
        )
        .unwrap();
        assert!(entry.is_expired());
        assert!(entry.ttl().unwrap() < 0.0);
    }

    #[test]
    fn full_envelope_round_trip() {
        let entry = ManagedEntry::with_ttl(sample_value(), Some(120.0)).unwrap();
        let json = entry.to_json(EnvelopeFields::ALL).unwrap();
        let decoded = ManagedEntry::from_json(&json, true).unwrap();
        assert_eq!(decoded.value, entry.value);
        assert_eq!(decoded.version, CURRENT_ENVELOPE_VERSION);
        // Micros precision survives the round trip.
        assert_eq!(decoded.created_at, entry.created_at.map(truncate_micros));
        assert_eq!(decoded.expires_at, entry.expires_at.map(truncate_micros));
    }

    fn truncate_micros(instant: DateTime<Utc>) -> DateTime<Utc> {
        let micros = instant.timestamp_micros();
        DateTime::from_timestamp_micros(micros).unwrap()
    }

    #[test]
    fn value_only_envelope_is_the_bare_object() {
        let entry = ManagedEntry::with_ttl(sample_value(), Some(60.0)).unwrap();
        let json = entry.to_json(EnvelopeFields::VALUE_ONLY).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Value::Object(sample_value()));

        let decoded = ManagedEntry::from_json(&json, false).unwrap();
        assert_eq!(decoded.value, entry.value);
        assert!(decoded.created_at.is_none());
        assert!(decoded.expires_at.is_none());
    }

    #[test]
    fn version_only_envelope_omits_timestamps() {
        let entry = ManagedEntry::with_ttl(sample_value(), Some(60.0)).unwrap();
        let json = entry.to_json(EnvelopeFields::VERSION_ONLY).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert!(parsed.get("version").is_some());
        assert!(parsed.get("created_at").is_none());
        assert!(parsed.get("expires_at").is_none());
    }

    #[test]
    fn stringified_document_round_trip() {
        let entry = ManagedEntry::with_ttl(sample_value(), Some(30.0)).unwrap();
        let document = entry.to_document(EnvelopeFields::ALL, true).unwrap();
        assert!(document.get("value").unwrap().is_string());

        let decoded = ManagedEntry::from_document(document, true, true).unwrap();
        assert_eq!(decoded.value, entry.value);
    }

    #[test]
    fn from_document_rejects_bad_shapes() {
        let Value::Object(missing_value) = json!({"version": 1}) else {
            unreachable!()
        };
        assert!(matches!(
            ManagedEntry::from_document(missing_value, true, false),
            Err(KvError::Deserialization { .. })
        ));

        let Value::Object(scalar_value) = json!({"value": 7}) else {
            unreachable!()
        };
        assert!(matches!(
            ManagedEntry::from_document(scalar_value, true, false),
            Err(KvError::Deserialization { .. })
        ));

        let Value::Object(bad_timestamp) = json!({"value": {}, "created_at": "not-a-date"}) else {
            unreachable!()
        };
        assert!(matches!(
            ManagedEntry::from_document(bad_timestamp, true, false),
            Err(KvError::Deserialization { .. })
        ));
    }

    #[test]
    fn legacy_envelope_without_version_defaults_to_current() {
        let decoded =
            ManagedEntry::from_json(r#"{"value": {"a": 1}}"#, true).unwrap();
        assert_eq!(decoded.version, CURRENT_ENVELOPE_VERSION);
        assert!(decoded.created_at.is_none());
    }

    #[test]
    fn empty_mapping_is_a_valid_value() {
        let entry = ManagedEntry::new(ValueMap::new());
        let json = entry.to_json(EnvelopeFields::ALL).unwrap();
        let decoded = ManagedEntry::from_json(&json, true).unwrap();
        assert!(decoded.value.is_empty());
    }
}
