mod http_cli;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http::Uri;
use sha2::Digest;
use tokio::sync::Mutex;

use crate::container_specs::{Descriptor, MANIFEST_ACCEPT};
use crate::error::{FreshnessError, Result};
use crate::http_client::{dump_body_to_bytes, dump_body_to_string, header_str, HyperClient};
use crate::reference::Reference;
use crate::registry::CredentialProvider;

use self::http_cli::HttpCli;

pub const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

pub struct HttpRegistry {
    registry_uri: Uri,
    name: String,
    http_client: HttpCli,
}

fn accept_manifests() -> String {
    MANIFEST_ACCEPT.join(", ")
}

pub(crate) fn sha256_digest(content: &[u8]) -> String {
    format!("sha256:{:x}", sha2::Sha256::digest(content))
}

#[async_trait::async_trait]
impl super::RegistryCore for HttpRegistry {
    async fn resolve(&self, target: &str) -> Result<Descriptor> {
        let uri = self.repository_uri_from_path(format!("/manifests/{}", target))?;
        let accept = accept_manifests();

        let mut r = self
            .http_client
            .request(&uri, |req| {
                req.method(http::Method::HEAD)
                    .header(http::header::ACCEPT, accept.as_str())
            })
            .await?;

        match r.status() {
            StatusCode::OK => {
                let content_type = header_str(&r, http::header::CONTENT_TYPE.as_str());
                let digest = header_str(&r, DOCKER_CONTENT_DIGEST);
                if let (Some(content_type), Some(digest)) = (content_type, digest) {
                    let size = header_str(&r, http::header::CONTENT_LENGTH.as_str())
                        .and_then(|l| l.parse::<u64>().ok())
                        .unwrap_or_default();
                    return Ok(Descriptor {
                        media_type: content_type.to_string(),
                        digest: digest.to_string(),
                        size,
                    });
                }
                tracing::debug!(
                    "HEAD {} lacked content type or digest, falling back to GET",
                    uri
                );
            }
            StatusCode::NOT_FOUND => return Err(self.manifest_not_found(target)),
            // Some registries refuse HEAD on manifests; GET answers the same question.
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => (),
            other => {
                let body = dump_body_to_string(&mut r).await.unwrap_or_default();
                return Err(FreshnessError::transport(
                    &uri,
                    format!("HEAD returned {:?}, body: {:?}", other, body),
                ));
            }
        }

        let mut r = self
            .http_client
            .request(&uri, |req| {
                req.method(http::Method::GET)
                    .header(http::header::ACCEPT, accept.as_str())
            })
            .await?;

        let status = r.status();
        if status == StatusCode::NOT_FOUND {
            return Err(self.manifest_not_found(target));
        }
        let content = dump_body_to_bytes(&mut r)
            .await
            .map_err(|e| FreshnessError::transport(&uri, e))?;
        if status != StatusCode::OK {
            return Err(FreshnessError::transport(
                &uri,
                format!(
                    "GET returned {:?}, body: {:?}",
                    status,
                    String::from_utf8_lossy(&content)
                ),
            ));
        }

        let digest = header_str(&r, DOCKER_CONTENT_DIGEST)
            .map(|d| d.to_string())
            .unwrap_or_else(|| sha256_digest(&content));
        let media_type = match header_str(&r, http::header::CONTENT_TYPE.as_str()) {
            Some(content_type) => content_type.to_string(),
            None => media_type_from_body(&content)?,
        };

        Ok(Descriptor {
            media_type,
            digest,
            size: content.len() as u64,
        })
    }

    async fn fetch(&self, descriptor: &Descriptor) -> Result<Bytes> {
        let uri = self.repository_uri_from_path(format!("/manifests/{}", descriptor.digest))?;
        let mut r = self
            .http_client
            .request(&uri, |req| {
                req.method(http::Method::GET)
                    .header(http::header::ACCEPT, descriptor.media_type.as_str())
            })
            .await?;

        let status = r.status();
        if status == StatusCode::NOT_FOUND {
            return Err(self.manifest_not_found(&descriptor.digest));
        }
        let content = dump_body_to_bytes(&mut r)
            .await
            .map_err(|e| FreshnessError::transport(&uri, e))?;
        if status != StatusCode::OK {
            return Err(FreshnessError::transport(
                &uri,
                format!(
                    "Attempted to fetch {}, but got status code {:?}, body: {:?}",
                    descriptor.digest,
                    status,
                    String::from_utf8_lossy(&content)
                ),
            ));
        }

        verify_content(descriptor, &content)?;
        Ok(content)
    }
}

fn media_type_from_body(content: &[u8]) -> Result<String> {
    #[derive(serde::Deserialize)]
    struct MediaTypeOnly {
        #[serde(rename = "mediaType")]
        media_type: Option<String>,
    }
    let parsed: MediaTypeOnly =
        serde_json::from_slice(content).map_err(|e| FreshnessError::parse("manifest", e))?;
    Ok(parsed.media_type.unwrap_or_default())
}

fn verify_content(descriptor: &Descriptor, content: &[u8]) -> Result<()> {
    if descriptor.size != 0 && descriptor.size != content.len() as u64 {
        return Err(FreshnessError::parse(
            format!("content of {}", descriptor.digest),
            format!(
                "expected {} bytes, got {}",
                descriptor.size,
                content.len()
            ),
        ));
    }
    if descriptor.digest.starts_with("sha256:") {
        let actual = sha256_digest(content);
        if actual != descriptor.digest {
            return Err(FreshnessError::parse(
                format!("content of {}", descriptor.digest),
                format!("digest mismatch, got {}", actual),
            ));
        }
    }
    Ok(())
}

impl HttpRegistry {
    pub(crate) fn from_reference<S: AsRef<str>>(
        registry_base: S,
        reference: &Reference,
        credentials: Arc<dyn CredentialProvider>,
        inner_client: HyperClient,
        request_timeout: Duration,
    ) -> Result<HttpRegistry> {
        let bad_base = |e: &dyn std::fmt::Display| FreshnessError::transport(registry_base.as_ref(), e);

        let mut uri_parts = registry_base
            .as_ref()
            .parse::<Uri>()
            .map_err(|e| bad_base(&e))?
            .into_parts();
        // default to using https
        if uri_parts.scheme.is_none() {
            uri_parts.scheme = Some(http::uri::Scheme::HTTPS);
        }
        uri_parts.path_and_query = Some(http::uri::PathAndQuery::from_static("/"));

        let registry_uri = Uri::from_parts(uri_parts).map_err(|e| bad_base(&e))?;
        tracing::debug!(
            "Connecting to registry {:?} for {}",
            registry_uri,
            reference
        );

        Ok(HttpRegistry {
            registry_uri,
            name: reference.repository().to_string(),
            http_client: HttpCli {
                inner_client,
                host: reference.registry().to_string(),
                default_scope: format!("repository:{}:pull", reference.repository()),
                credentials,
                authorization: Arc::new(Mutex::new(None)),
                request_timeout,
            },
        })
    }

    fn manifest_not_found(&self, target: &str) -> FreshnessError {
        FreshnessError::ManifestNotFound {
            reference: format!("{}@{}", self.name, target),
        }
    }

    fn v2_from_path<S: AsRef<str>>(&self, path: S) -> Result<Uri> {
        let mut uri_builder = self.registry_uri.clone().into_parts();
        let path_ext = path.as_ref();
        if !path_ext.is_empty() && !path_ext.starts_with('/') {
            return Err(FreshnessError::transport(
                &self.registry_uri,
                "Invalid path reference, should start in a /",
            ));
        }
        let full_path = format!("/v2{}", path_ext);
        uri_builder.path_and_query = Some(
            full_path
                .as_str()
                .try_into()
                .map_err(|e| FreshnessError::transport(&self.registry_uri, e))?,
        );

        Uri::from_parts(uri_builder).map_err(|e| FreshnessError::transport(&self.registry_uri, e))
    }

    fn repository_uri_from_path<S: AsRef<str>>(&self, path: S) -> Result<Uri> {
        let path_ext = path.as_ref();
        if !path_ext.starts_with('/') {
            return Err(FreshnessError::transport(
                &self.registry_uri,
                "Invalid path reference, should start in a /",
            ));
        }
        self.v2_from_path(format!("/{}{}", self.name, path_ext))
    }
}
