use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::{json, Value};
use std::time::Duration;

use super::{DocumentStore, DocumentVersion, SearchError, VersionedDocument};

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Elasticsearch REST client for id-addressed document operations.
#[derive(Clone, Debug)]
pub struct ElasticsearchClient {
    client: Client,
    base_url: Url,
}

impl ElasticsearchClient {
    pub fn new(base_url: &str) -> Result<Self, SearchError> {
        let base_url =
            Url::parse(base_url).map_err(|e| SearchError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SearchError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self { client, base_url })
    }

    /// `{base}/{index}/{endpoint}/{id}` with every segment percent-encoded.
    pub fn document_url(&self, index: &str, endpoint: &str, id: &str) -> Result<Url, SearchError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SearchError::InvalidUrl(self.base_url.to_string()))?;
            path.pop_if_empty();
            path.extend([index, endpoint, id]);
        }
        Ok(url)
    }

    async fn check(response: Response) -> Result<Response, SearchError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(SearchError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl DocumentStore for ElasticsearchClient {
    #[tracing::instrument(skip(self, document))]
    async fn index_by_id(
        &self,
        index: &str,
        id: &str,
        document: &Value,
    ) -> Result<(), SearchError> {
        let url = self.document_url(index, "_doc", id)?;
        let response = self.client.put(url).json(document).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, partial))]
    async fn update_by_id(
        &self,
        index: &str,
        id: &str,
        partial: &Value,
    ) -> Result<(), SearchError> {
        let url = self.document_url(index, "_update", id)?;
        let response = self
            .client
            .post(url)
            .json(&json!({ "doc": partial }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_by_id(&self, index: &str, id: &str) -> Result<(), SearchError> {
        let url = self.document_url(index, "_doc", id)?;
        let response = self.client.delete(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(index, id, "Document already absent");
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, document))]
    async fn index_if_version(
        &self,
        index: &str,
        id: &str,
        document: &Value,
        expected: Option<DocumentVersion>,
    ) -> Result<(), SearchError> {
        let url = match expected {
            None => self.document_url(index, "_create", id)?,
            Some(version) => {
                let mut url = self.document_url(index, "_doc", id)?;
                url.query_pairs_mut()
                    .append_pair("if_seq_no", &version.seq_no.to_string())
                    .append_pair("if_primary_term", &version.primary_term.to_string());
                url
            }
        };
        let response = self.client.put(url).json(document).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_by_id(
        &self,
        index: &str,
        id: &str,
    ) -> Result<Option<VersionedDocument>, SearchError> {
        let url = self.document_url(index, "_doc", id)?;
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let mut body: Value = Self::check(response).await?.json().await?;
        let field = |name: &str| {
            body.get(name).and_then(Value::as_u64).ok_or_else(|| {
                SearchError::InvalidResponse(format!("document response has no {}", name))
            })
        };
        let version = DocumentVersion {
            seq_no: field("_seq_no")?,
            primary_term: field("_primary_term")?,
        };
        match body.get_mut("_source") {
            Some(source) => Ok(Some(VersionedDocument {
                source: source.take(),
                version,
            })),
            None => Err(SearchError::InvalidResponse(
                "document response has no _source".to_string(),
            )),
        }
    }
}
