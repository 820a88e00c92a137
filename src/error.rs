/// Failures surfaced by the normalizer, the digest resolver and the metadata client.
///
/// Only the annotation pipeline recovers from these; every other layer hands
/// them to its caller untouched.
#[derive(thiserror::Error, Debug)]
pub enum FreshnessError {
    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Transport failure talking to {uri}: {reason}")]
    TransportError { uri: String, reason: String },

    #[error("Authentication against {host} failed: {reason}")]
    AuthError { host: String, reason: String },

    #[error("No manifest for architecture '{architecture}' in the index of {reference}")]
    PlatformNotFound {
        reference: String,
        architecture: String,
    },

    #[error("Manifest {reference} is unknown to the registry")]
    ManifestNotFound { reference: String },

    #[error("No metadata available for digest {digest}")]
    NotFound { digest: String },

    #[error("Unable to parse {what}: {reason}")]
    ParseError { what: String, reason: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl FreshnessError {
    pub(crate) fn transport(uri: impl ToString, reason: impl std::fmt::Display) -> Self {
        FreshnessError::TransportError {
            uri: uri.to_string(),
            reason: format!("{:#}", reason),
        }
    }

    pub(crate) fn parse(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        FreshnessError::ParseError {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = FreshnessError> = std::result::Result<T, E>;
