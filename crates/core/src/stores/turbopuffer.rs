use crate::error::StoreError;
use crate::models::{ColumnarBatch, QueryHit, VectorQuery};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use url::Url;

pub struct TurbopufferStore {
    client: Client,
    base_url: Url,
    api_key: String,
    namespace: String,
}

impl TurbopufferStore {
    pub fn new(
        base_url: impl AsRef<str>,
        api_key: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(base_url.as_ref())?,
            api_key: api_key.into(),
            namespace: namespace.into(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn vectors_url(&self) -> Result<Url, StoreError> {
        Ok(self
            .base_url
            .join(&format!("v1/vectors/{}", self.namespace))?)
    }

    pub async fn list_namespaces(&self) -> Result<Vec<String>, StoreError> {
        let url = self.base_url.join("v1/namespaces")?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(backend_error(status.as_u16(), response.text().await.ok()));
        }

        let parsed: Value = response.json().await?;
        let namespaces = parsed
            .pointer("/namespaces")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(namespaces
            .iter()
            .filter_map(|entry| {
                entry
                    .as_str()
                    .map(str::to_string)
                    .or_else(|| entry.pointer("/id").and_then(Value::as_str).map(str::to_string))
            })
            .collect())
    }

    pub async fn delete_namespace(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.vectors_url()?)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(backend_error(status.as_u16(), response.text().await.ok()));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for TurbopufferStore {
    async fn upsert_columns(&self, batch: &ColumnarBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.vectors_url()?)
            .bearer_auth(&self.api_key)
            .json(batch)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(backend_error(status.as_u16(), response.text().await.ok()));
        }

        Ok(())
    }

    async fn query_vectors(&self, query: &VectorQuery) -> Result<Vec<QueryHit>, StoreError> {
        let url = self.base_url.join(&format!(
            "v1/vectors/{}/query",
            self.namespace
        ))?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(backend_error(status.as_u16(), response.text().await.ok()));
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .as_array()
            .cloned()
            .or_else(|| parsed.pointer("/results").and_then(Value::as_array).cloned())
            .unwrap_or_default();

        let mut ranked = Vec::with_capacity(hits.len());
        for hit in hits {
            let id = hit
                .pointer("/id")
                .map(render_id)
                .unwrap_or_default();
            let distance = hit
                .pointer("/distance")
                .or_else(|| hit.pointer("/dist"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let attributes = hit
                .pointer("/attributes")
                .and_then(Value::as_object)
                .map(|map| {
                    map.iter()
                        .map(|(key, value)| (key.clone(), value.clone()))
                        .collect()
                })
                .unwrap_or_default();

            ranked.push(QueryHit {
                id,
                distance,
                attributes,
            });
        }

        Ok(ranked)
    }
}

fn render_id(value: &Value) -> String {
    match value {
        Value::String(id) => id.clone(),
        other => other.to_string(),
    }
}

fn backend_error(status: u16, body: Option<String>) -> StoreError {
    let raw = body.unwrap_or_else(|| "<body unavailable>".to_string());
    let details: String = raw.chars().take(500).collect();

    StoreError::BackendResponse {
        backend: "turbopuffer".to_string(),
        status,
        details,
    }
}
