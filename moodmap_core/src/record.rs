//! Positioned records and the boundary parser that turns loosely-typed
//! document payloads into them.

use crate::error::ValidationError;
use geo::{HaversineDistance, Point};
use moodmap_env::{ChangeKind, DocumentChange, PositionSample};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Reserved id under which the device's own position is stored.
pub const SELF_RECORD_ID: &str = "@self";

// ============================================================================
// IDENTITY
// ============================================================================

/// Stable external key of a record (the remote document id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Validates and wraps a document id. The id is kept byte for byte;
    /// only empty or whitespace-only ids are rejected.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.trim().is_empty() {
            return Err(ValidationError::MissingRecordId);
        }
        if raw == SELF_RECORD_ID {
            return Err(ValidationError::ReservedRecordId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// The reserved self id.
    pub fn self_id() -> Self {
        Self(SELF_RECORD_ID.to_string())
    }

    pub fn is_self(&self) -> bool {
        self.0 == SELF_RECORD_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which producer a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    /// The device's own location stream
    SelfDevice,
    /// The remote document collection
    Remote,
}

// ============================================================================
// RECORD
// ============================================================================

/// Opaque pass-through fields of a mood event.
///
/// Reconciliation never looks at these; they ride along for the presenter
/// (marker tint) and for filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordAttributes {
    pub mood: Option<String>,
    pub reason: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub image_uri: Option<String>,
    pub public: bool,
    /// Any other document keys, preserved verbatim
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// A record with a validated position, the unit stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionedRecord {
    pub record_id: RecordId,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: f64,
    /// Unix milliseconds, as delivered by the source
    pub last_updated_at: i64,
    pub origin: SourceOrigin,
    pub attributes: RecordAttributes,
}

impl PositionedRecord {
    /// Builds the self record from a device sample.
    pub fn from_sample(sample: &PositionSample) -> Result<Self, ValidationError> {
        validate_coordinates(sample.latitude, sample.longitude)?;
        validate_accuracy(sample.accuracy_meters)?;
        Ok(Self {
            record_id: RecordId::self_id(),
            latitude: sample.latitude,
            longitude: sample.longitude,
            accuracy_meters: sample.accuracy_meters,
            last_updated_at: sample.timestamp_ms,
            origin: SourceOrigin::SelfDevice,
            attributes: RecordAttributes {
                public: false,
                ..RecordAttributes::default()
            },
        })
    }

    /// Re-checks the invariants of a record constructed outside the parser.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_coordinates(self.latitude, self.longitude)?;
        validate_accuracy(self.accuracy_meters)
    }

    #[inline]
    pub fn point(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }

    /// Great-circle distance to a coordinate, in meters.
    pub fn distance_to(&self, latitude: f64, longitude: f64) -> f64 {
        self.point()
            .haversine_distance(&Point::new(longitude, latitude))
    }

    pub fn is_remote(&self) -> bool {
        self.origin == SourceOrigin::Remote
    }
}

/// Latitude within [-90, 90], longitude within [-180, 180], both finite.
pub fn validate_coordinates(lat: f64, lon: f64) -> Result<(), ValidationError> {
    if !lat.is_finite() || !lon.is_finite() {
        return Err(ValidationError::NonFiniteCoordinate { lat, lon });
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(ValidationError::OutOfBounds { lat, lon });
    }
    Ok(())
}

fn validate_accuracy(accuracy: f64) -> Result<(), ValidationError> {
    if !accuracy.is_finite() || accuracy < 0.0 {
        return Err(ValidationError::invalid(
            "accuracyMeters",
            format!("{accuracy} is not a non-negative finite number"),
        ));
    }
    Ok(())
}

// ============================================================================
// BOUNDARY PARSER
// ============================================================================

/// A remote diff after boundary parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChange {
    /// Added or modified: insert-or-replace subject to last-writer-wins
    Upsert(PositionedRecord),
    /// Delete unconditionally
    Remove(RecordId),
}

impl RemoteChange {
    pub fn record_id(&self) -> &RecordId {
        match self {
            RemoteChange::Upsert(record) => &record.record_id,
            RemoteChange::Remove(id) => id,
        }
    }
}

/// Parses one snapshot diff. Fails without side effects.
pub fn parse_change(change: &DocumentChange) -> Result<RemoteChange, ValidationError> {
    let record_id = RecordId::parse(&change.document_id)?;

    match change.kind {
        ChangeKind::Removed => Ok(RemoteChange::Remove(record_id)),
        ChangeKind::Added | ChangeKind::Modified => {
            let payload = change
                .payload
                .as_ref()
                .ok_or(ValidationError::MissingField("payload"))?;
            parse_document(record_id, payload).map(RemoteChange::Upsert)
        }
    }
}

/// Decodes a mood event document body into a positioned record.
pub fn parse_document(record_id: RecordId, payload: &Value) -> Result<PositionedRecord, ValidationError> {
    let object = payload
        .as_object()
        .ok_or_else(|| ValidationError::invalid("payload", "expected a JSON object"))?;

    if let Some(false) = object.get("hasLocation").and_then(Value::as_bool) {
        return Err(ValidationError::Unpositioned);
    }

    let latitude = required_f64(object, "latitude")?;
    let longitude = required_f64(object, "longitude")?;
    validate_coordinates(latitude, longitude)?;

    let last_updated_at = required_i64(object, "time")?;

    let accuracy_meters = match object.get("accuracyMeters") {
        None | Some(Value::Null) => 0.0,
        Some(v) => v
            .as_f64()
            .ok_or_else(|| ValidationError::invalid("accuracyMeters", "expected a number"))?,
    };
    validate_accuracy(accuracy_meters)?;

    let mut extra = BTreeMap::new();
    for (key, value) in object {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            extra.insert(key.clone(), value.clone());
        }
    }

    let attributes = RecordAttributes {
        mood: optional_string(object, "mood")?,
        reason: optional_string(object, "reason")?,
        user_id: optional_string(object, "userId")?,
        user_name: optional_string(object, "userName")?,
        image_uri: optional_string(object, "imageUri")?,
        public: match object.get("publicStatus") {
            None | Some(Value::Null) => true,
            Some(v) => v
                .as_bool()
                .ok_or_else(|| ValidationError::invalid("publicStatus", "expected a boolean"))?,
        },
        extra,
    };

    Ok(PositionedRecord {
        record_id,
        latitude,
        longitude,
        accuracy_meters,
        last_updated_at,
        origin: SourceOrigin::Remote,
        attributes,
    })
}

const KNOWN_KEYS: &[&str] = &[
    "latitude",
    "longitude",
    "hasLocation",
    "time",
    "accuracyMeters",
    "mood",
    "reason",
    "userId",
    "userName",
    "imageUri",
    "publicStatus",
];

fn required_f64(object: &Map<String, Value>, field: &'static str) -> Result<f64, ValidationError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(field)),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| ValidationError::invalid(field, "expected a number")),
    }
}

fn required_i64(object: &Map<String, Value>, field: &'static str) -> Result<i64, ValidationError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(field)),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| ValidationError::invalid(field, "expected integer milliseconds")),
    }
}

fn optional_string(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ValidationError::invalid(field, "expected a string")),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "latitude": 53.5461,
            "longitude": -113.4938, // Edmonton
            "time": 1_710_000_000_000_i64,
            "mood": "Happiness",
            "reason": "finished the sprint",
            "userId": "u-42",
            "publicStatus": true,
            "trigger": "work",
        })
    }

    #[test]
    fn test_parse_document_full() {
        let id = RecordId::parse("mood-1").unwrap();
        let record = parse_document(id.clone(), &sample_payload()).unwrap();

        assert_eq!(record.record_id, id);
        assert_eq!(record.origin, SourceOrigin::Remote);
        assert_eq!(record.last_updated_at, 1_710_000_000_000);
        assert_eq!(record.accuracy_meters, 0.0);
        assert_eq!(record.attributes.mood.as_deref(), Some("Happiness"));
        assert!(record.attributes.public);
        // Unknown keys are preserved
        assert_eq!(record.attributes.extra.get("trigger"), Some(&json!("work")));
    }

    #[test]
    fn test_parse_rejects_missing_id() {
        let change = DocumentChange::added("  ", sample_payload());
        assert_eq!(parse_change(&change), Err(ValidationError::MissingRecordId));
    }

    #[test]
    fn test_record_id_kept_verbatim() {
        assert_eq!(RecordId::parse(" R1").unwrap().as_str(), " R1");
        assert_ne!(RecordId::parse("R1 ").unwrap(), RecordId::parse("R1").unwrap());
        assert_eq!(RecordId::parse("\t\n"), Err(ValidationError::MissingRecordId));
    }

    #[test]
    fn test_parse_rejects_reserved_id() {
        let change = DocumentChange::added(SELF_RECORD_ID, sample_payload());
        assert!(matches!(
            parse_change(&change),
            Err(ValidationError::ReservedRecordId(_))
        ));
    }

    #[test]
    fn test_parse_rejects_nan_latitude() {
        // serde_json maps NaN to null, so this surfaces as a missing field
        let mut payload = sample_payload();
        payload["latitude"] = json!(f64::NAN);
        let change = DocumentChange::added("mood-1", payload);
        assert_eq!(
            parse_change(&change),
            Err(ValidationError::MissingField("latitude"))
        );
    }

    #[test]
    fn test_parse_rejects_out_of_bounds() {
        let mut payload = sample_payload();
        payload["longitude"] = json!(200.0);
        let change = DocumentChange::modified("mood-1", payload);
        assert!(matches!(
            parse_change(&change),
            Err(ValidationError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_unpositioned() {
        let mut payload = sample_payload();
        payload["hasLocation"] = json!(false);
        let change = DocumentChange::added("mood-1", payload);
        assert_eq!(parse_change(&change), Err(ValidationError::Unpositioned));
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        let mut payload = sample_payload();
        payload["time"] = json!("yesterday");
        assert!(matches!(
            parse_change(&DocumentChange::added("m", payload)),
            Err(ValidationError::InvalidField { field: "time", .. })
        ));

        let mut payload = sample_payload();
        payload["mood"] = json!(3);
        assert!(matches!(
            parse_change(&DocumentChange::added("m", payload)),
            Err(ValidationError::InvalidField { field: "mood", .. })
        ));
    }

    #[test]
    fn test_removed_needs_no_payload() {
        let change = DocumentChange::removed("mood-9");
        assert_eq!(
            parse_change(&change),
            Ok(RemoteChange::Remove(RecordId::parse("mood-9").unwrap()))
        );
    }

    #[test]
    fn test_from_sample_validates() {
        let ok = PositionedRecord::from_sample(&PositionSample::new(37.0, -122.0, 5.0, 100)).unwrap();
        assert!(ok.record_id.is_self());
        assert_eq!(ok.origin, SourceOrigin::SelfDevice);

        let bad = PositionedRecord::from_sample(&PositionSample::new(f64::NAN, -122.0, 5.0, 100));
        assert!(matches!(bad, Err(ValidationError::NonFiniteCoordinate { .. })));

        let bad = PositionedRecord::from_sample(&PositionSample::new(37.0, -122.0, -1.0, 100));
        assert!(matches!(bad, Err(ValidationError::InvalidField { .. })));
    }

    #[test]
    fn test_distance_to() {
        let record = PositionedRecord::from_sample(&PositionSample::new(52.5200, 13.4050, 1.0, 0)).unwrap();
        // Berlin -> Paris is ~878 km
        let d = record.distance_to(48.8566, 2.3522);
        assert!((d - 878_000.0).abs() < 10_000.0, "distance {}", d);
    }
}
