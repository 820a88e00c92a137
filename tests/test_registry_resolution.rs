mod common;

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use image_freshness::container_specs::{DOCKER_MANIFEST_LIST_V2, DOCKER_MANIFEST_V2};
use image_freshness::registry::{Credentials, RegistryAccess, RegistryEndpoints, StaticCredentials};
use image_freshness::{FreshnessError, Reference, RegistryResolver, Resolver};

use common::*;

fn alpine() -> Reference {
    Reference::normalize("alpine:3.18").expect("valid reference")
}

#[tokio::test]
async fn test_single_manifest_resolves_to_config_digest() {
    let server = MockServer::start().await;
    mock_single_manifest(&server, "library/alpine", "3.18").await;

    let resolver = RegistryResolver::with_access(hub_access(&server));
    let digest = resolver
        .get_digest(&alpine(), "amd64")
        .await
        .expect("should resolve");
    assert_eq!(digest.as_deref(), Some(CONFIG_DIGEST));
}

#[tokio::test]
async fn test_index_selects_architecture_after_head_is_refused() {
    let server = MockServer::start().await;
    let index = index_body(&[
        ("amd64", "sha256:1111111111111111111111111111111111111111111111111111111111111111"),
        ("arm64", "sha256:2222222222222222222222222222222222222222222222222222222222222222"),
    ]);
    let index_digest = sha256_digest(index.as_bytes());

    Mock::given(method("HEAD"))
        .and(path(manifest_path("library/alpine", "3.18")))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    mock_manifest_get(&server, "library/alpine", "3.18", DOCKER_MANIFEST_LIST_V2, &index).await;
    mock_manifest_get(&server, "library/alpine", &index_digest, DOCKER_MANIFEST_LIST_V2, &index).await;

    let resolver = RegistryResolver::with_access(hub_access(&server));

    let arm = resolver.get_digest(&alpine(), "arm64").await.unwrap();
    assert_eq!(
        arm.as_deref(),
        Some("sha256:2222222222222222222222222222222222222222222222222222222222222222")
    );

    match resolver.get_digest(&alpine(), "ppc64le").await {
        Err(FreshnessError::PlatformNotFound { architecture, .. }) => {
            assert_eq!(architecture, "ppc64le")
        }
        other => panic!("Expected PlatformNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_digest_pinned_reference_is_queried_by_digest() {
    let server = MockServer::start().await;
    let body = manifest_body(CONFIG_DIGEST);
    let digest = sha256_digest(body.as_bytes());
    mock_manifest_head(&server, "library/alpine", &digest, DOCKER_MANIFEST_V2, &digest).await;
    mock_manifest_get(&server, "library/alpine", &digest, DOCKER_MANIFEST_V2, &body).await;

    let reference = Reference::normalize(&format!("alpine@{}", digest)).unwrap();
    let resolver = RegistryResolver::with_access(hub_access(&server));
    let resolved = resolver.get_digest(&reference, "amd64").await.unwrap();
    assert_eq!(resolved.as_deref(), Some(CONFIG_DIGEST));
}

#[tokio::test]
async fn test_unknown_tag_is_manifest_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(manifest_path("library/alpine", "3.18")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let resolver = RegistryResolver::with_access(hub_access(&server));
    assert!(matches!(
        resolver.get_digest(&alpine(), "amd64").await,
        Err(FreshnessError::ManifestNotFound { .. })
    ));
}

#[tokio::test]
async fn test_tampered_manifest_is_rejected() {
    let server = MockServer::start().await;
    let body = manifest_body(CONFIG_DIGEST);
    let claimed = format!("sha256:{}", "0".repeat(64));
    mock_manifest_head(&server, "library/alpine", "3.18", DOCKER_MANIFEST_V2, &claimed).await;
    Mock::given(method("GET"))
        .and(path(manifest_path("library/alpine", &claimed)))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.into_bytes(), DOCKER_MANIFEST_V2))
        .mount(&server)
        .await;

    let resolver = RegistryResolver::with_access(hub_access(&server));
    assert!(matches!(
        resolver.get_digest(&alpine(), "amd64").await,
        Err(FreshnessError::ParseError { .. })
    ));
}

#[tokio::test]
async fn test_unsupported_media_type_yields_nothing() {
    let server = MockServer::start().await;
    let body = r#"{"schemaVersion":1,"name":"library/alpine","tag":"3.18"}"#;
    let digest = sha256_digest(body.as_bytes());
    let media_type = "application/vnd.docker.distribution.manifest.v1+prettyjws";
    mock_manifest_head(&server, "library/alpine", "3.18", media_type, &digest).await;
    mock_manifest_get(&server, "library/alpine", &digest, media_type, body).await;

    let resolver = RegistryResolver::with_access(hub_access(&server));
    assert_eq!(resolver.get_digest(&alpine(), "amd64").await.unwrap(), None);
}

#[tokio::test]
async fn test_relative_redirect_is_followed() {
    let server = MockServer::start().await;
    let body = manifest_body(CONFIG_DIGEST);
    let digest = sha256_digest(body.as_bytes());
    mock_manifest_head(&server, "library/alpine", "3.18", DOCKER_MANIFEST_V2, &digest).await;
    Mock::given(method("GET"))
        .and(path(manifest_path("library/alpine", &digest)))
        .respond_with(
            ResponseTemplate::new(307)
                .insert_header("Location", manifest_path("library/mirror", &digest).as_str()),
        )
        .mount(&server)
        .await;
    mock_manifest_get(&server, "library/mirror", &digest, DOCKER_MANIFEST_V2, &body).await;

    let resolver = RegistryResolver::with_access(hub_access(&server));
    let resolved = resolver.get_digest(&alpine(), "amd64").await.unwrap();
    assert_eq!(resolved.as_deref(), Some(CONFIG_DIGEST));
}

#[tokio::test]
async fn test_slow_registry_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(manifest_path("library/alpine", "3.18")))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let resolver = RegistryResolver::with_access(
        hub_access(&server).with_request_timeout(Duration::from_millis(50)),
    );
    assert!(matches!(
        resolver.get_digest(&alpine(), "amd64").await,
        Err(FreshnessError::TransportError { .. })
    ));
}

#[tokio::test]
async fn test_unreachable_registry_is_transport_error() {
    let access = RegistryAccess::new(Arc::new(image_freshness::registry::AnonymousCredentials))
        .with_endpoints(RegistryEndpoints::default().with_override("docker.io", "http://127.0.0.1:1"));
    let resolver = RegistryResolver::with_access(access);
    assert!(matches!(
        resolver.get_digest(&alpine(), "amd64").await,
        Err(FreshnessError::TransportError { .. })
    ));
}

async fn mock_bearer_challenge(server: &MockServer) {
    let challenge = format!(
        r#"Bearer realm="{}/token",service="registry.test",scope="repository:library/alpine:pull""#,
        server.uri()
    );
    Mock::given(path(manifest_path("library/alpine", "3.18")))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", challenge.as_str()))
        .with_priority(10)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_bearer_challenge_is_answered_once() {
    let server = MockServer::start().await;
    let body = manifest_body(CONFIG_DIGEST);
    let digest = sha256_digest(body.as_bytes());

    Mock::given(method("HEAD"))
        .and(path(manifest_path("library/alpine", "3.18")))
        .and(header("Authorization", "Bearer tok123"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", DOCKER_MANIFEST_V2)
                .insert_header("Docker-Content-Digest", digest.as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(manifest_path("library/alpine", &digest)))
        .and(header("Authorization", "Bearer tok123"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.clone().into_bytes(), DOCKER_MANIFEST_V2))
        .mount(&server)
        .await;
    mock_bearer_challenge(&server).await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("service", "registry.test"))
        .and(query_param("scope", "repository:library/alpine:pull"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            br#"{"token":"tok123","expires_in":300}"#.to_vec(),
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = RegistryResolver::with_access(hub_access(&server));
    let resolved = resolver.get_digest(&alpine(), "amd64").await.unwrap();
    assert_eq!(resolved.as_deref(), Some(CONFIG_DIGEST));
}

#[tokio::test]
async fn test_rejected_token_is_auth_error() {
    let server = MockServer::start().await;
    mock_bearer_challenge(&server).await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            br#"{"access_token":"useless"}"#.to_vec(),
            "application/json",
        ))
        .mount(&server)
        .await;

    let resolver = RegistryResolver::with_access(hub_access(&server));
    assert!(matches!(
        resolver.get_digest(&alpine(), "amd64").await,
        Err(FreshnessError::AuthError { .. })
    ));
}

#[tokio::test]
async fn test_failing_token_endpoint_is_auth_error() {
    let server = MockServer::start().await;
    mock_bearer_challenge(&server).await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let resolver = RegistryResolver::with_access(hub_access(&server));
    assert!(matches!(
        resolver.get_digest(&alpine(), "amd64").await,
        Err(FreshnessError::AuthError { .. })
    ));
}

#[tokio::test]
async fn test_identity_token_is_exchanged_with_post() {
    let server = MockServer::start().await;
    let body = manifest_body(CONFIG_DIGEST);
    let digest = sha256_digest(body.as_bytes());

    mock_bearer_challenge(&server).await;
    Mock::given(method("HEAD"))
        .and(path(manifest_path("library/alpine", "3.18")))
        .and(header("Authorization", "Bearer exchanged"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", DOCKER_MANIFEST_V2)
                .insert_header("Docker-Content-Digest", digest.as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(manifest_path("library/alpine", &digest)))
        .and(header("Authorization", "Bearer exchanged"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.into_bytes(), DOCKER_MANIFEST_V2))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-me"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            br#"{"access_token":"exchanged"}"#.to_vec(),
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = StaticCredentials::default().with(
        "docker.io",
        Credentials::IdentityToken("refresh-me".to_string()),
    );
    let access = RegistryAccess::new(Arc::new(credentials))
        .with_endpoints(RegistryEndpoints::default().with_override("docker.io", server.uri()));
    let resolver = RegistryResolver::with_access(access);
    let resolved = resolver.get_digest(&alpine(), "amd64").await.unwrap();
    assert_eq!(resolved.as_deref(), Some(CONFIG_DIGEST));
}

#[tokio::test]
async fn test_basic_challenge_uses_configured_credentials() {
    let server = MockServer::start().await;
    let digest = mock_single_manifest_behind_basic(&server).await;
    assert!(digest.starts_with("sha256:"));

    let credentials = StaticCredentials::default().with(
        "docker.io",
        Credentials::Basic {
            username: "user".to_string(),
            password: "pass".to_string(),
        },
    );
    let access = RegistryAccess::new(Arc::new(credentials))
        .with_endpoints(RegistryEndpoints::default().with_override("docker.io", server.uri()));
    let resolved = RegistryResolver::with_access(access)
        .get_digest(&alpine(), "amd64")
        .await
        .unwrap();
    assert_eq!(resolved.as_deref(), Some(CONFIG_DIGEST));

    // Without credentials the challenge cannot be answered.
    let anonymous = RegistryResolver::with_access(hub_access(&server));
    assert!(matches!(
        anonymous.get_digest(&alpine(), "amd64").await,
        Err(FreshnessError::AuthError { .. })
    ));
}

async fn mock_single_manifest_behind_basic(server: &MockServer) -> String {
    let body = manifest_body(CONFIG_DIGEST);
    let digest = sha256_digest(body.as_bytes());
    // base64("user:pass")
    let authorization = "Basic dXNlcjpwYXNz";

    Mock::given(method("HEAD"))
        .and(path(manifest_path("library/alpine", "3.18")))
        .and(header("Authorization", authorization))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", DOCKER_MANIFEST_V2)
                .insert_header("Docker-Content-Digest", digest.as_str()),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(manifest_path("library/alpine", &digest)))
        .and(header("Authorization", authorization))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.into_bytes(), DOCKER_MANIFEST_V2))
        .mount(server)
        .await;
    Mock::given(path(manifest_path("library/alpine", "3.18")))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", r#"Basic realm="registry""#),
        )
        .with_priority(10)
        .mount(server)
        .await;
    digest
}

#[tokio::test]
async fn test_credentials_stay_with_the_registry_on_redirect() {
    let server = MockServer::start().await;
    let elsewhere = MockServer::start().await;
    let body = manifest_body(CONFIG_DIGEST);
    let digest = sha256_digest(body.as_bytes());
    let authorization = "Basic dXNlcjpwYXNz";

    Mock::given(method("HEAD"))
        .and(path(manifest_path("library/alpine", "3.18")))
        .and(header("Authorization", authorization))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", DOCKER_MANIFEST_V2)
                .insert_header("Docker-Content-Digest", digest.as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(path(manifest_path("library/alpine", "3.18")))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", r#"Basic realm="registry""#),
        )
        .with_priority(10)
        .mount(&server)
        .await;
    let location = format!("{}/storage/{}", elsewhere.uri(), digest);
    Mock::given(method("GET"))
        .and(path(manifest_path("library/alpine", &digest)))
        .and(header("Authorization", authorization))
        .respond_with(ResponseTemplate::new(307).insert_header("Location", location.as_str()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/storage/{}", digest)))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.into_bytes(), DOCKER_MANIFEST_V2))
        .expect(1)
        .mount(&elsewhere)
        .await;

    let credentials = StaticCredentials::default().with(
        "docker.io",
        Credentials::Basic {
            username: "user".to_string(),
            password: "pass".to_string(),
        },
    );
    let access = RegistryAccess::new(Arc::new(credentials))
        .with_endpoints(RegistryEndpoints::default().with_override("docker.io", server.uri()));
    let resolved = RegistryResolver::with_access(access)
        .get_digest(&alpine(), "amd64")
        .await
        .unwrap();
    assert_eq!(resolved.as_deref(), Some(CONFIG_DIGEST));

    let requests = elsewhere.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests
        .iter()
        .all(|r| r.headers.get("authorization").is_none()));
}
