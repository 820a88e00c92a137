use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error};
use clap::Parser;

use crate::annotate::{Annotator, DEFAULT_CONCURRENCY};
use crate::http_client::new_client;
use crate::metadata::{HttpMetadataClient, DEFAULT_METADATA_URL};
use crate::registry::{
    AnonymousCredentials, CredentialProvider, DockerConfigCredentials, RegistryAccess,
    RegistryEndpoints,
};
use crate::resolver::RegistryResolver;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[clap(name = "images app", about = "List local images with the newest upstream tag")]
pub struct FreshnessConfig {
    /// JSON array of local image records.
    #[clap(long)]
    pub images_file: PathBuf,

    #[clap(long, env = "IMAGE_METADATA_URL", default_value = DEFAULT_METADATA_URL)]
    pub metadata_url: String,

    /// Images resolved at once. 1 resolves them one after another.
    #[clap(long, env = "IMAGE_FRESHNESS_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Per-request timeout for registry and metadata calls.
    #[clap(long, default_value_t = 4000)]
    pub timeout_ms: u64,

    /// Docker config file holding registry credentials. Defaults to
    /// `$DOCKER_CONFIG/config.json` or `~/.docker/config.json`.
    #[clap(long)]
    pub docker_config: Option<PathBuf>,

    /// Never send registry credentials.
    #[clap(long)]
    pub anonymous: bool,

    /// Base url for a registry domain, as `domain=url`. Repeatable.
    #[clap(long = "registry-endpoint", value_parser = parse_endpoint)]
    pub registry_endpoints: Vec<(String, String)>,

    #[clap(long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn parse_endpoint(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((domain, base)) if !domain.is_empty() && !base.is_empty() => {
            Ok((domain.to_string(), base.to_string()))
        }
        _ => Err(format!("expected domain=url, got {:?}", raw)),
    }
}

impl FreshnessConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn registry_endpoints(&self) -> RegistryEndpoints {
        self.registry_endpoints
            .iter()
            .fold(RegistryEndpoints::default(), |endpoints, (domain, base)| {
                endpoints.with_override(domain, base)
            })
    }

    pub fn credential_provider(&self) -> Result<Arc<dyn CredentialProvider>, Error> {
        if self.anonymous {
            return Ok(Arc::new(AnonymousCredentials));
        }
        let path = match self.docker_config.clone().or_else(DockerConfigCredentials::default_path) {
            Some(path) => path,
            None => return Ok(Arc::new(AnonymousCredentials)),
        };
        tracing::debug!("Loading registry credentials from {:?}", path);
        let provider = DockerConfigCredentials::parse_file(&path)
            .with_context(|| format!("Loading docker config {:?}", path))?;
        Ok(Arc::new(provider))
    }

    /// Wires the registry resolver and metadata client around one shared http client.
    pub fn build_annotator(&self) -> Result<Annotator, Error> {
        let http_client = new_client();
        let timeout = self.request_timeout();

        let access = RegistryAccess::new(self.credential_provider()?)
            .with_endpoints(self.registry_endpoints())
            .with_http_client(http_client.clone())
            .with_request_timeout(timeout);
        let metadata = HttpMetadataClient::new(&self.metadata_url)
            .with_http_client(http_client)
            .with_request_timeout(timeout);

        Ok(Annotator::new(
            Arc::new(RegistryResolver::with_access(access)),
            Arc::new(metadata),
        )
        .with_concurrency(self.concurrency))
    }
}
