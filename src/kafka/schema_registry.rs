//! HTTP client for a Confluent-compatible schema registry.
//!
//! Only the one call the producer needs: register the schema under its
//! subject and get back the id that prefixes every encoded record. Ids are
//! cached per subject and schema, so each pair costs one round trip.

use crate::error::DeliveryError;
use crate::kafka::schema::SchemaRef;
use crate::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

#[derive(Debug, Serialize)]
struct RegisterSchemaRequest<'a> {
    schema: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterSchemaResponse {
    id: i32,
}

pub struct SchemaRegistryClient {
    base_url: String,
    http_client: reqwest::Client,
    ids: DashMap<(String, String), i32>,
}

impl SchemaRegistryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::SchemaRegistry(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            ids: DashMap::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Registers the schema under its subject, or returns the cached id.
    /// The registry answers with the existing id when the schema is already
    /// registered, so this is safe to call repeatedly.
    pub async fn schema_id(&self, schema_ref: &SchemaRef) -> std::result::Result<i32, DeliveryError> {
        let definition = schema_ref.schema.canonical_form();
        let cache_key = (schema_ref.subject.clone(), definition);

        if let Some(id) = self.ids.get(&cache_key) {
            return Ok(*id);
        }

        let id = self.register(&schema_ref.subject, &cache_key.1).await?;
        self.ids.insert(cache_key, id);
        Ok(id)
    }

    async fn register(&self, subject: &str, schema: &str) -> std::result::Result<i32, DeliveryError> {
        let url = format!("{}/subjects/{}/versions", self.base_url, subject);

        let response = self
            .http_client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(&RegisterSchemaRequest { schema })
            .send()
            .await
            .map_err(|e| {
                DeliveryError::SchemaRegistry(format!("Failed to register schema: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::SchemaRegistry(format!(
                "Schema registration for '{}' failed with status {}: {}",
                subject, status, body
            )));
        }

        let registered: RegisterSchemaResponse = response.json().await.map_err(|e| {
            DeliveryError::SchemaRegistry(format!(
                "Failed to parse registration response: {}",
                e
            ))
        })?;

        debug!(
            schema_id = registered.id,
            subject = subject,
            "Schema registered"
        );

        Ok(registered.id)
    }
}
