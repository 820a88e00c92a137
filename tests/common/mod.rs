//! Registry and metadata service fixtures on top of wiremock.
#![allow(dead_code)]

use std::sync::Arc;

use sha2::Digest;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use image_freshness::container_specs::{DOCKER_MANIFEST_LIST_V2, DOCKER_MANIFEST_V2};
use image_freshness::registry::{AnonymousCredentials, RegistryAccess, RegistryEndpoints};

pub const CONFIG_DIGEST: &str =
    "sha256:c1aabb73d2339c5ebaa3681de2e9d9c18d57485045a4e311d9f8004bec208d67";

pub fn sha256_digest(content: &[u8]) -> String {
    format!("sha256:{:x}", sha2::Sha256::digest(content))
}

pub fn manifest_body(config_digest: &str) -> String {
    format!(
        r#"{{"schemaVersion":2,"mediaType":"{}","config":{{"mediaType":"application/vnd.docker.container.image.v1+json","size":1472,"digest":"{}"}},"layers":[{{"mediaType":"application/vnd.docker.image.rootfs.diff.tar.gzip","size":3348623,"digest":"sha256:{}"}}]}}"#,
        DOCKER_MANIFEST_V2,
        config_digest,
        "a".repeat(64)
    )
}

/// A manifest list with one linux entry per `(architecture, digest)`.
pub fn index_body(entries: &[(&str, &str)]) -> String {
    let manifests: Vec<String> = entries
        .iter()
        .map(|(architecture, digest)| {
            format!(
                r#"{{"mediaType":"{}","size":528,"digest":"{}","platform":{{"architecture":"{}","os":"linux"}}}}"#,
                DOCKER_MANIFEST_V2, digest, architecture
            )
        })
        .collect();
    format!(
        r#"{{"schemaVersion":2,"mediaType":"{}","manifests":[{}]}}"#,
        DOCKER_MANIFEST_LIST_V2,
        manifests.join(",")
    )
}

pub fn manifest_path(repository: &str, target: &str) -> String {
    format!("/v2/{}/manifests/{}", repository, target)
}

/// HEAD answering with content type and digest, as Docker Hub does.
pub async fn mock_manifest_head(
    server: &MockServer,
    repository: &str,
    target: &str,
    media_type: &str,
    digest: &str,
) {
    Mock::given(method("HEAD"))
        .and(path(manifest_path(repository, target)))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", media_type)
                .insert_header("Docker-Content-Digest", digest),
        )
        .mount(server)
        .await;
}

/// GET returning `body`; the digest header is computed from the body.
pub async fn mock_manifest_get(
    server: &MockServer,
    repository: &str,
    target: &str,
    media_type: &str,
    body: &str,
) {
    Mock::given(method("GET"))
        .and(path(manifest_path(repository, target)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body.as_bytes().to_vec(), media_type)
                .insert_header("Docker-Content-Digest", sha256_digest(body.as_bytes()).as_str()),
        )
        .mount(server)
        .await;
}

/// Serves a single-platform manifest under `tag` and returns its digest.
pub async fn mock_single_manifest(server: &MockServer, repository: &str, tag: &str) -> String {
    let body = manifest_body(CONFIG_DIGEST);
    let digest = sha256_digest(body.as_bytes());
    mock_manifest_head(server, repository, tag, DOCKER_MANIFEST_V2, &digest).await;
    mock_manifest_get(server, repository, &digest, DOCKER_MANIFEST_V2, &body).await;
    digest
}

/// Serves a manifest list under `tag` and returns its digest.
pub async fn mock_index(
    server: &MockServer,
    repository: &str,
    tag: &str,
    entries: &[(&str, &str)],
) -> String {
    let body = index_body(entries);
    let digest = sha256_digest(body.as_bytes());
    mock_manifest_head(server, repository, tag, DOCKER_MANIFEST_LIST_V2, &digest).await;
    mock_manifest_get(server, repository, &digest, DOCKER_MANIFEST_LIST_V2, &body).await;
    digest
}

pub async fn mock_metadata(server: &MockServer, digest: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/images/newest/{}", digest)))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "application/json"))
        .mount(server)
        .await;
}

/// Anonymous registry access with Docker Hub pointed at `server`.
pub fn hub_access(server: &MockServer) -> RegistryAccess {
    RegistryAccess::new(Arc::new(AnonymousCredentials))
        .with_endpoints(RegistryEndpoints::default().with_override("docker.io", server.uri()))
}
