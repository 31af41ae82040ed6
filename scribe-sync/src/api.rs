//! HTTP client for the collaborator endpoints the sync engine consumes:
//! listing the owner's documents and issuing share tokens for guests.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ApiError, ConfigError};
use crate::protocol::{Collaborator, DocumentId};

/// One entry of the document listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub collaborators: Option<Vec<Collaborator>>,
}

impl DocumentSummary {
    pub fn new(id: impl Into<DocumentId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            updated_at: None,
            version: None,
            collaborators: None,
        }
    }
}

/// Access granted by a share token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
}

#[derive(Serialize)]
struct ShareRequest<'a> {
    permissions: &'a [Permission],
}

#[derive(Deserialize)]
struct ShareResponse {
    access_token: String,
}

/// REST client rooted at the API base URL.
#[derive(Debug, Clone)]
pub struct DocumentApi {
    http: reqwest::Client,
    base: Url,
}

impl DocumentApi {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let base = Url::parse(base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    /// `GET {api}/documents`
    pub async fn list_documents(&self, credential: &str) -> Result<Vec<DocumentSummary>, ApiError> {
        let url = self.endpoint(&["documents"])?;
        log::debug!("Fetching document list from {url}");

        let response = self.http.get(url).bearer_auth(credential).send().await?;
        let status = response.status();
        if !status.is_success() {
            log::warn!("Document listing failed with status {status}");
            return Err(ApiError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }

    /// `POST {api}/documents/{id}/share` and return the opaque access token.
    pub async fn issue_share_token(
        &self,
        credential: &str,
        document_id: &DocumentId,
        permissions: &[Permission],
    ) -> Result<String, ApiError> {
        let url = self.endpoint(&["documents", document_id.as_str(), "share"])?;

        let response = self
            .http
            .post(url)
            .bearer_auth(credential)
            .json(&ShareRequest { permissions })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            log::warn!("Share token request for {document_id} failed with status {status}");
            return Err(ApiError::Status(status.as_u16()));
        }
        let body: ShareResponse = response.json().await?;
        log::info!("Issued share token for document {document_id}");
        Ok(body.access_token)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}
