pub mod annotate;
pub mod config;
pub mod container_specs;
pub mod error;
pub mod http_client;
pub mod listing;
pub mod metadata;
pub mod reference;
pub mod registry;
pub mod resolver;

pub use annotate::{Annotation, Annotator, LocalImageRecord};
pub use error::{FreshnessError, Result};
pub use listing::{list_images, ImageStore, ImageSummary, JsonImageStore};
pub use metadata::{HttpMetadataClient, MetadataClient, MetadataRecord};
pub use reference::Reference;
pub use resolver::{RegistryResolver, Resolver};
