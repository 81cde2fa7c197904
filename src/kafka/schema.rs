//! Key/value schema binding and synchronous Avro encoding.
//!
//! Records are checked against their schema before they are queued, so a
//! value that does not fit fails the `publish` call itself. Schema ids are
//! not known here; the transport resolves them through the schema registry.

use crate::error::SerializationError;
use crate::kafka::delivery::Payload;
use apache_avro::Schema;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A parsed Avro schema. Cheap to clone.
#[derive(Clone)]
pub struct AvroSchema {
    inner: Arc<Schema>,
}

impl AvroSchema {
    /// Parses a JSON Avro schema definition, e.g. `"int"` or a record schema.
    pub fn parse(definition: &str) -> Result<Self, SerializationError> {
        let schema = Schema::parse_str(definition)
            .map_err(|e| SerializationError::InvalidSchema(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(schema),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.inner
    }

    /// Parsing canonical form, as registered with the schema registry.
    pub fn canonical_form(&self) -> String {
        self.inner.canonical_form()
    }

    /// Resolves `value` against this schema and encodes it as an Avro datum.
    pub fn encode<T>(&self, subject: &str, value: &T) -> Result<Bytes, SerializationError>
    where
        T: Serialize + ?Sized,
    {
        let value = apache_avro::to_value(value).map_err(|e| SerializationError::SchemaMismatch {
            subject: subject.to_string(),
            reason: e.to_string(),
        })?;

        let resolved = value
            .resolve(&self.inner)
            .map_err(|e| SerializationError::SchemaMismatch {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;

        let datum = apache_avro::to_avro_datum(&self.inner, resolved).map_err(|e| {
            SerializationError::Encode {
                subject: subject.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Bytes::from(datum))
    }
}

impl fmt::Debug for AvroSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AvroSchema")
            .field(&self.inner.canonical_form())
            .finish()
    }
}

/// A schema as registered under one registry subject.
#[derive(Debug, Clone)]
pub struct SchemaRef {
    pub subject: String,
    pub schema: AvroSchema,
}

/// Key schema plus optional value schema for one producer. Without a value
/// schema every record is key-only.
#[derive(Debug, Clone)]
pub struct SchemaBinding {
    key: AvroSchema,
    value: Option<AvroSchema>,
}

/// Key and value after schema checks, ready for the transport.
#[derive(Debug, Clone)]
pub(crate) struct EncodedRecord {
    pub key: Bytes,
    pub value: Payload,
}

impl SchemaBinding {
    pub fn new(key: AvroSchema, value: Option<AvroSchema>) -> Self {
        Self { key, value }
    }

    pub fn key_only(key: AvroSchema) -> Self {
        Self { key, value: None }
    }

    /// Parses both definitions in one go.
    pub fn parse(key: &str, value: Option<&str>) -> Result<Self, SerializationError> {
        Ok(Self {
            key: AvroSchema::parse(key)?,
            value: value.map(AvroSchema::parse).transpose()?,
        })
    }

    pub fn key_schema(&self) -> &AvroSchema {
        &self.key
    }

    pub fn value_schema(&self) -> Option<&AvroSchema> {
        self.value.as_ref()
    }

    /// Registry subjects under the topic-name strategy.
    pub fn subjects(&self, topic: &str) -> (SchemaRef, Option<SchemaRef>) {
        let key = SchemaRef {
            subject: format!("{}-key", topic),
            schema: self.key.clone(),
        };
        let value = self.value.as_ref().map(|schema| SchemaRef {
            subject: format!("{}-value", topic),
            schema: schema.clone(),
        });
        (key, value)
    }

    /// A missing value always yields [`Payload::Absent`], never an empty
    /// encoding. A value without a bound value schema is rejected.
    pub(crate) fn encode<K, V>(
        &self,
        topic: &str,
        key: &K,
        value: Option<&V>,
    ) -> Result<EncodedRecord, SerializationError>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        let key = self.key.encode(&format!("{}-key", topic), key)?;

        let value = match (&self.value, value) {
            (_, None) => Payload::Absent,
            (Some(schema), Some(value)) => {
                Payload::Present(schema.encode(&format!("{}-value", topic), value)?)
            }
            (None, Some(_)) => {
                return Err(SerializationError::UnexpectedValue {
                    topic: topic.to_string(),
                })
            }
        };

        Ok(EncodedRecord { key, value })
    }
}
