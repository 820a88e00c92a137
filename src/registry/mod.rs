mod credentials;
mod http;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::container_specs::Descriptor;
use crate::error::Result;
use crate::http_client::{new_client, HyperClient, DEFAULT_REQUEST_TIMEOUT};
use crate::reference::Reference;

pub use credentials::{
    AnonymousCredentials, CredentialProvider, Credentials, DockerConfigCredentials,
    StaticCredentials, DOCKER_HUB_AUTH_KEY,
};

/// Content discovery against one repository of one registry.
#[async_trait::async_trait]
pub trait RegistryCore: Send + Sync {
    /// Resolves a tag or digest to the descriptor of the object it names.
    async fn resolve(&self, target: &str) -> Result<Descriptor>;

    /// Fetches the raw bytes a descriptor addresses.
    async fn fetch(&self, descriptor: &Descriptor) -> Result<Bytes>;
}

/// Base urls per registry domain. Unlisted domains use `https://<api host>`,
/// or plain http for loopback hosts.
#[derive(Debug, Clone, Default)]
pub struct RegistryEndpoints {
    overrides: HashMap<String, String>,
}

impl RegistryEndpoints {
    pub fn with_override(mut self, domain: impl Into<String>, base: impl Into<String>) -> Self {
        self.overrides.insert(domain.into(), base.into());
        self
    }

    pub fn base_for(&self, reference: &Reference) -> String {
        if let Some(base) = self.overrides.get(reference.registry()) {
            return base.clone();
        }
        let host = reference.api_host();
        let scheme = if is_loopback(host) { "http" } else { "https" };
        format!("{}://{}", scheme, host)
    }
}

fn is_loopback(host: &str) -> bool {
    let hostname = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
    matches!(hostname, "localhost" | "127.0.0.1" | "[::1]")
}

/// Everything needed to open a registry connection for a reference.
#[derive(Clone)]
pub struct RegistryAccess {
    endpoints: RegistryEndpoints,
    credentials: Arc<dyn CredentialProvider>,
    http_client: HyperClient,
    request_timeout: Duration,
}

impl RegistryAccess {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        RegistryAccess {
            endpoints: RegistryEndpoints::default(),
            credentials,
            http_client: new_client(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_endpoints(mut self, endpoints: RegistryEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_http_client(mut self, http_client: HyperClient) -> Self {
        self.http_client = http_client;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn open(&self, reference: &Reference) -> Result<Arc<dyn RegistryCore>> {
        let inner_reg = http::HttpRegistry::from_reference(
            self.endpoints.base_for(reference),
            reference,
            Arc::clone(&self.credentials),
            self.http_client.clone(),
            self.request_timeout,
        )?;
        Ok(Arc::new(inner_reg))
    }
}
