use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::annotate::{Annotation, Annotator, LocalImageRecord};

/// Source of locally stored images.
#[async_trait::async_trait]
pub trait ImageStore: Send + Sync {
    async fn list_images(&self) -> Result<Vec<LocalImageRecord>, Error>;
}

#[async_trait::async_trait]
impl ImageStore for Vec<LocalImageRecord> {
    async fn list_images(&self) -> Result<Vec<LocalImageRecord>, Error> {
        Ok(self.clone())
    }
}

/// Image records exported to a JSON file, one array of records.
#[derive(Debug, Clone)]
pub struct JsonImageStore {
    path: PathBuf,
}

impl JsonImageStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        JsonImageStore {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait::async_trait]
impl ImageStore for JsonImageStore {
    async fn list_images(&self) -> Result<Vec<LocalImageRecord>, Error> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Reading image records from {:?}", self.path))?;
        let images: Vec<LocalImageRecord> =
            serde_json::from_str(&content).with_context(|| {
                format!(
                    "Attempting to parse image records from file: {},content:\n{}",
                    self.path.to_string_lossy(),
                    content
                )
            })?;
        Ok(images)
    }
}

/// A listed image together with its annotation.
#[derive(Serialize, Debug, PartialEq, Eq, Clone)]
pub struct ImageSummary {
    #[serde(flatten)]
    pub image: LocalImageRecord,
    pub newest: Annotation,
}

/// Lists the store and annotates every image. Only a failing store fails the listing.
pub async fn list_images(
    store: &dyn ImageStore,
    annotator: &Annotator,
    cancel: &CancellationToken,
) -> Result<Vec<ImageSummary>, Error> {
    let images = store.list_images().await?;
    tracing::debug!(
        "Annotating {} images, {} at a time",
        images.len(),
        annotator.concurrency()
    );
    let annotations = annotator.annotate_all(&images, cancel).await;

    Ok(images
        .into_iter()
        .zip(annotations)
        .map(|(image, newest)| ImageSummary { image, newest })
        .collect())
}
