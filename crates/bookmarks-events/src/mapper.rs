//! Conversion between typed library events and their flat wire form.
//!
//! Every event travels as a single JSON object carrying the `eventType`
//! discriminator, the aggregate id, the occurrence time (ISO-8601 with
//! millisecond precision) and the event's own primitive fields at the same
//! level. Events are truncated to milliseconds when raised, so the mapping is
//! lossless in both directions.

use bookmarks_core::event::EventMetadata;
use bookmarks_library::domain::events::{
    CardAddedToCollection, CardAddedToLibrary, EventType, LibraryEvent, LibraryEventKind,
    UnknownEventType,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while mapping events to or from the wire.
///
/// These are programming or compatibility errors, not transient failures:
/// a payload that fails to decode once will fail every time.
#[derive(Debug, Error)]
pub enum MappingError {
    /// The discriminator names no event in the catalog.
    #[error(transparent)]
    UnknownEventType(#[from] UnknownEventType),

    /// The envelope is not a JSON object with `eventType`, `aggregateId` and
    /// `dateTimeOccurred`.
    #[error("malformed event envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    /// The event-specific fields do not match the event type.
    #[error("malformed {event_type} fields: {source}")]
    InvalidFields {
        /// Type named by the envelope.
        event_type: EventType,
        /// Underlying decode failure.
        source: serde_json::Error,
    },

    /// The event could not be written as JSON.
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Flat, transport-safe representation of a [`LibraryEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedEvent {
    /// Wire name of the event type, e.g. `CardAddedToLibraryEvent`.
    pub event_type: String,
    /// Aggregate that raised the event.
    pub aggregate_id: Uuid,
    /// Occurrence time, written as `2024-01-01T00:00:00.000Z`.
    #[serde(with = "iso8601_millis")]
    pub date_time_occurred: DateTime<Utc>,
    /// Event-specific fields, flattened next to the envelope.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LibraryFields {
    card_id: Uuid,
    curator_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionFields {
    card_id: Uuid,
    collection_id: Uuid,
    added_by: String,
}

/// Maps a typed event to its wire form.
#[must_use]
pub fn to_serialized(event: &LibraryEvent) -> SerializedEvent {
    let mut fields = Map::new();
    match &event.kind {
        LibraryEventKind::CardAddedToLibrary(payload) => {
            fields.insert("cardId".into(), Value::String(payload.card_id.to_string()));
            fields.insert("curatorId".into(), Value::String(payload.curator_id.clone()));
        }
        LibraryEventKind::CardAddedToCollection(payload) => {
            fields.insert("cardId".into(), Value::String(payload.card_id.to_string()));
            fields.insert(
                "collectionId".into(),
                Value::String(payload.collection_id.to_string()),
            );
            fields.insert("addedBy".into(), Value::String(payload.added_by.clone()));
        }
    }

    SerializedEvent {
        event_type: event.kind_type().as_str().to_owned(),
        aggregate_id: event.metadata.aggregate_id,
        date_time_occurred: event.metadata.occurred_at,
        fields,
    }
}

/// Rebuilds a typed event from its wire form, keeping the original
/// occurrence time.
///
/// # Errors
///
/// Returns `MappingError::UnknownEventType` if the discriminator is not in
/// the catalog and `MappingError::InvalidFields` if the fields do not match
/// the named type.
pub fn from_serialized(serialized: SerializedEvent) -> Result<LibraryEvent, MappingError> {
    let event_type: EventType = serialized.event_type.parse()?;
    let fields = Value::Object(serialized.fields);

    let kind = match event_type {
        EventType::CardAddedToLibrary => {
            let fields: LibraryFields = decode_fields(event_type, fields)?;
            LibraryEventKind::CardAddedToLibrary(CardAddedToLibrary {
                card_id: fields.card_id,
                curator_id: fields.curator_id,
            })
        }
        EventType::CardAddedToCollection => {
            let fields: CollectionFields = decode_fields(event_type, fields)?;
            LibraryEventKind::CardAddedToCollection(CardAddedToCollection {
                card_id: fields.card_id,
                collection_id: fields.collection_id,
                added_by: fields.added_by,
            })
        }
    };

    Ok(LibraryEvent {
        metadata: EventMetadata::restored(serialized.aggregate_id, serialized.date_time_occurred),
        kind,
    })
}

/// Encodes an event as the JSON job payload.
///
/// # Errors
///
/// Returns `MappingError::Encode` if serialization fails.
pub fn encode(event: &LibraryEvent) -> Result<Value, MappingError> {
    serde_json::to_value(to_serialized(event)).map_err(MappingError::Encode)
}

/// Decodes a JSON job payload into a typed event.
///
/// # Errors
///
/// Returns `MappingError::InvalidEnvelope` if the payload is not a valid
/// envelope, otherwise whatever [`from_serialized`] returns.
pub fn decode(payload: &Value) -> Result<LibraryEvent, MappingError> {
    let serialized =
        SerializedEvent::deserialize(payload).map_err(MappingError::InvalidEnvelope)?;
    from_serialized(serialized)
}

fn decode_fields<T: DeserializeOwned>(
    event_type: EventType,
    fields: Value,
) -> Result<T, MappingError> {
    serde_json::from_value(fields)
        .map_err(|source| MappingError::InvalidFields { event_type, source })
}

mod iso8601_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
