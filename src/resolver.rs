use std::sync::Arc;

use crate::container_specs::{Descriptor, Manifest, ManifestIndex, MediaKind};
use crate::error::{FreshnessError, Result};
use crate::reference::Reference;
use crate::registry::{CredentialProvider, RegistryAccess};

/// Maps a reference and an architecture to the digest the metadata service is keyed by.
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    /// `Ok(None)` means the registry returned something that is neither a
    /// manifest nor an index, so there is nothing to look up.
    async fn get_digest(&self, reference: &Reference, architecture: &str) -> Result<Option<String>>;
}

/// Resolver talking to the reference's own registry.
///
/// Holds no per-call state; concurrent calls share only the http client and
/// the credential provider.
#[derive(Clone)]
pub struct RegistryResolver {
    access: RegistryAccess,
}

impl RegistryResolver {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        RegistryResolver {
            access: RegistryAccess::new(credentials),
        }
    }

    pub fn with_access(access: RegistryAccess) -> Self {
        RegistryResolver { access }
    }
}

#[async_trait::async_trait]
impl Resolver for RegistryResolver {
    async fn get_digest(&self, reference: &Reference, architecture: &str) -> Result<Option<String>> {
        let registry = self.access.open(reference)?;

        let descriptor = registry.resolve(reference.target()).await?;
        tracing::debug!(
            "Resolved {} to {} ({})",
            reference,
            descriptor.digest,
            descriptor.media_type
        );

        let content = registry.fetch(&descriptor).await?;
        select_digest(reference, &descriptor, &content, architecture)
    }
}

/// Picks the digest out of fetched manifest or index bytes.
///
/// A single-platform manifest is assumed to match the local platform, so its
/// config digest is returned as is. For an index, the first entry built for
/// `architecture` wins.
pub fn select_digest(
    reference: &Reference,
    descriptor: &Descriptor,
    content: &[u8],
    architecture: &str,
) -> Result<Option<String>> {
    match descriptor.kind() {
        MediaKind::Manifest => {
            let manifest = Manifest::parse(content)?;
            Ok(Some(manifest.config_digest().to_string()))
        }
        MediaKind::Index => {
            let index = ManifestIndex::parse(content)?;
            match index.find_architecture(architecture) {
                Some(entry) => Ok(Some(entry.digest.clone())),
                None => Err(FreshnessError::PlatformNotFound {
                    reference: reference.to_string(),
                    architecture: architecture.to_string(),
                }),
            }
        }
        MediaKind::Other => {
            tracing::debug!(
                "Ignoring {} with unsupported media type {:?}",
                reference,
                descriptor.media_type
            );
            Ok(None)
        }
    }
}
