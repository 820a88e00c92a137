use std::time::Duration;

use http::Uri;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{FreshnessError, Result};
use crate::http_client::{
    dump_body_to_bytes, new_client, with_timeout, HyperClient, DEFAULT_REQUEST_TIMEOUT,
};

pub const DEFAULT_METADATA_URL: &str = "http://127.0.0.1:1224";

// The service encodes empty lists as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A vulnerability known for an image.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct Cve {
    pub id: String,
    pub severity: String,
    #[serde(default)]
    pub description: String,
}

/// What the metadata service knows about one digest.
///
/// `tags` is ordered newest first; the annotation only uses the head.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct MetadataRecord {
    #[serde(default)]
    pub digest: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub end_of_life: Option<String>,
    #[serde(default)]
    pub changelog: Option<String>,
    #[serde(default)]
    pub release_notes: Option<String>,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub last_update_date: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub hub: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cves: Vec<Cve>,
}

impl MetadataRecord {
    pub fn newest_tag(&self) -> Option<&str> {
        self.tags.first().map(|t| t.as_str())
    }
}

#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct MetadataResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub image_infos: Vec<MetadataRecord>,
}

impl MetadataResponse {
    pub fn parse(body: &[u8]) -> Result<MetadataResponse> {
        serde_json::from_slice(body).map_err(|e| FreshnessError::parse("metadata response", e))
    }

    /// The first record, or `NotFound` when the service answered with none.
    pub fn into_first(self, digest: &str) -> Result<MetadataRecord> {
        self.image_infos
            .into_iter()
            .next()
            .ok_or_else(|| FreshnessError::NotFound {
                digest: digest.to_string(),
            })
    }
}

#[async_trait::async_trait]
pub trait MetadataClient: Send + Sync {
    async fn get_metadata(&self, digest: &str) -> Result<MetadataRecord>;
}

/// Client for `GET <base>/images/newest/<digest>`.
#[derive(Clone)]
pub struct HttpMetadataClient {
    base_url: String,
    http_client: HyperClient,
    request_timeout: Duration,
}

impl Default for HttpMetadataClient {
    fn default() -> Self {
        HttpMetadataClient::new(DEFAULT_METADATA_URL)
    }
}

impl HttpMetadataClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpMetadataClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: new_client(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_http_client(mut self, http_client: HyperClient) -> Self {
        self.http_client = http_client;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn lookup_uri(&self, digest: &str) -> Result<Uri> {
        let raw = format!("{}/images/newest/{}", self.base_url, digest);
        raw.parse::<Uri>()
            .map_err(|e| FreshnessError::transport(&raw, e))
    }
}

#[async_trait::async_trait]
impl MetadataClient for HttpMetadataClient {
    async fn get_metadata(&self, digest: &str) -> Result<MetadataRecord> {
        let uri = self.lookup_uri(digest)?;

        let body = with_timeout(self.request_timeout, &uri, async {
            let request = http::request::Builder::default()
                .method(http::Method::GET)
                .uri(uri.clone())
                .header(http::header::ACCEPT, "application/json")
                .body(hyper::Body::empty())
                .map_err(|e| FreshnessError::transport(&uri, e))?;
            let mut r = self
                .http_client
                .request(request)
                .await
                .map_err(|e| FreshnessError::transport(&uri, e))?;

            if !r.status().is_success() {
                tracing::debug!("Metadata lookup {} returned {:?}", uri, r.status());
                return Err(FreshnessError::NotFound {
                    digest: digest.to_string(),
                });
            }
            dump_body_to_bytes(&mut r)
                .await
                .map_err(|e| FreshnessError::transport(&uri, e))
        })
        .await?;

        MetadataResponse::parse(&body)?.into_first(digest)
    }
}
