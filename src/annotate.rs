use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{FreshnessError, Result};
use crate::metadata::MetadataClient;
use crate::reference::Reference;
use crate::resolver::Resolver;

pub const DEFAULT_CONCURRENCY: usize = 4;

/// The "newest tag" shown next to an image. Empty when nothing is known.
pub type Annotation = String;

/// The slice of a locally stored image the pipeline reads.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct LocalImageRecord {
    pub id: String,
    #[serde(default)]
    pub repo_tags: Vec<String>,
    #[serde(default)]
    pub repo_digests: Vec<String>,
    #[serde(default)]
    pub architecture: String,
}

/// Runs the freshness pipeline for local images.
#[derive(Clone)]
pub struct Annotator {
    resolver: Arc<dyn Resolver>,
    metadata: Arc<dyn MetadataClient>,
    concurrency: usize,
}

impl Annotator {
    pub fn new(resolver: Arc<dyn Resolver>, metadata: Arc<dyn MetadataClient>) -> Self {
        Annotator {
            resolver,
            metadata,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Upper bound on images resolved at once; 1 processes them strictly in sequence.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// The typed pipeline. `Ok(None)` means the image is not eligible.
    pub async fn newest_tag(&self, image: &LocalImageRecord) -> Result<Option<String>> {
        // Never pushed or pulled: the registry cannot know it.
        if image.repo_digests.is_empty() {
            return Ok(None);
        }
        let raw_tag = match image.repo_tags.first() {
            Some(raw_tag) => raw_tag,
            None => return Ok(None),
        };

        let reference = Reference::normalize(raw_tag)?;
        if !reference.is_official() {
            return Ok(None);
        }

        let digest = match self
            .resolver
            .get_digest(&reference, &image.architecture)
            .await?
        {
            Some(digest) => digest,
            None => return Ok(None),
        };

        let record = self.metadata.get_metadata(&digest).await?;
        Ok(record.newest_tag().map(|t| t.to_string()))
    }

    pub async fn annotate(&self, image: &LocalImageRecord) -> Annotation {
        collapse(&image.id, self.newest_tag(image).await).unwrap_or_default()
    }

    /// Like [`Annotator::annotate`], abandoning in-flight calls once `cancel` fires.
    pub async fn annotate_until(
        &self,
        image: &LocalImageRecord,
        cancel: &CancellationToken,
    ) -> Annotation {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FreshnessError::Cancelled),
            r = self.newest_tag(image) => r,
        };
        collapse(&image.id, outcome).unwrap_or_default()
    }

    /// Annotates every image, at most `concurrency` at a time. The output
    /// lines up index for index with `images`.
    pub async fn annotate_all(
        &self,
        images: &[LocalImageRecord],
        cancel: &CancellationToken,
    ) -> Vec<Annotation> {
        futures::stream::iter(images)
            .map(|image| self.annotate_until(image, cancel))
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

/// Where pipeline failures stop. Every error becomes "no annotation" here and
/// nowhere else, so callers of [`Annotator::annotate`] never see one.
pub fn collapse(image_id: &str, outcome: Result<Option<String>>) -> Option<String> {
    match outcome {
        Ok(tag) => tag,
        Err(e) => {
            tracing::trace!(image = image_id, error = %e, "no freshness information");
            None
        }
    }
}
