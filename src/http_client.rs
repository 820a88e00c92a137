use std::time::Duration;

use bytes::Bytes;
use http::{Response, Uri};
use hyper::body::HttpBody as _;
use hyper::{Body, Client};
use hyper_rustls::ConfigBuilderExt;

use crate::error::{FreshnessError, Result};

pub type HyperClient = Client<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(4000);

/// Builds the client shared by registry and metadata lookups.
///
/// Cloning the result is cheap and clones share one connection pool, so a
/// single instance can serve every concurrent annotation.
pub fn new_client() -> HyperClient {
    let tls = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_webpki_roots()
        .with_no_client_auth();

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .build();

    Client::builder().build::<_, hyper::Body>(https)
}

/// Runs `fut`, mapping expiry of `limit` to a transport failure against `uri`.
pub async fn with_timeout<T, F>(limit: Duration, uri: &Uri, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Err(_) => Err(FreshnessError::transport(
            uri,
            format!("timed out after waiting {}ms", limit.as_millis()),
        )),
        Ok(r) => r,
    }
}

/// Upper bound on any manifest, index, token or metadata body we read.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum BodyError {
    #[error("{0}")]
    Hyper(#[from] hyper::Error),
    #[error("response body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

pub async fn dump_body_to_bytes(response: &mut Response<Body>) -> Result<Bytes, BodyError> {
    dump_body_to_bytes_limited(response, MAX_BODY_BYTES).await
}

pub async fn dump_body_to_bytes_limited(
    response: &mut Response<Body>,
    limit: usize,
) -> Result<Bytes, BodyError> {
    let announced = header_str(response, http::header::CONTENT_LENGTH.as_str())
        .and_then(|l| l.parse::<u64>().ok());
    if announced.map_or(false, |l| l > limit as u64) {
        return Err(BodyError::TooLarge { limit });
    }

    let mut buffer = Vec::default();
    while let Some(chunk) = response.body_mut().data().await {
        let chunk = chunk?;
        if buffer.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge { limit });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buffer))
}

pub async fn dump_body_to_string(response: &mut Response<Body>) -> Result<String, BodyError> {
    let bytes = dump_body_to_bytes(response).await?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

pub fn header_str<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}
