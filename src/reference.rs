use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{FreshnessError, Result};

pub const DEFAULT_DOMAIN: &str = "docker.io";
pub const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
pub const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";
pub const OFFICIAL_REPOSITORY_PREFIX: &str = "library/";
pub const DEFAULT_TAG: &str = "latest";
pub const NAME_TOTAL_LENGTH_MAX: usize = 255;

// Distribution reference grammar, anchored:
//   reference := name [ ":" tag ] [ "@" digest ]
//   name      := [domain '/'] path-component ['/' path-component]*
const DOMAIN_COMPONENT: &str = r"(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";
const PATH_COMPONENT: &str = r"[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*";
const TAG: &str = r"[\w][\w.-]{0,127}";
const DIGEST: &str = r"[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}";

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let domain = format!(
            r"{c}(?:\.{c})*(?::[0-9]+)?",
            c = DOMAIN_COMPONENT
        );
        let name = format!(
            r"(?:{domain}/)?{p}(?:/{p})*",
            domain = domain,
            p = PATH_COMPONENT
        );
        let pattern = format!(
            r"^(?P<name>{name})(?::(?P<tag>{tag}))?(?:@(?P<digest>{digest}))?$",
            name = name,
            tag = TAG,
            digest = DIGEST
        );
        Regex::new(&pattern).expect("reference grammar is a valid regex")
    })
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-f0-9]{64}$").expect("identifier grammar is a valid regex"))
}

/// A fully qualified, tag-complete pointer to an image in a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    registry: String,
    repository: String,
    tag: String,
    digest: Option<String>,
}

impl Reference {
    /// Parses a raw local tag into a normalized reference.
    ///
    /// Unqualified names land on Docker Hub (`alpine` becomes
    /// `docker.io/library/alpine`), and a missing tag becomes `latest`.
    pub fn normalize(raw: &str) -> Result<Reference> {
        let invalid = |reason: &str| FreshnessError::InvalidReference {
            reference: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("reference is empty"));
        }
        if identifier_regex().is_match(raw) {
            return Err(invalid(
                "cannot specify 64-byte hexadecimal strings as a repository name",
            ));
        }

        let captures = reference_regex()
            .captures(raw)
            .ok_or_else(|| invalid("does not match the reference grammar"))?;

        let name = &captures["name"];
        if name.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(invalid("repository name is too long"));
        }

        let (registry, repository) = split_domain(name);
        if repository.is_empty() {
            return Err(invalid("repository path is empty"));
        }
        if repository.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(invalid("repository name must be lowercase"));
        }

        let tag = captures
            .name("tag")
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| DEFAULT_TAG.to_string());
        let digest = captures.name("digest").map(|m| m.as_str().to_string());

        Ok(Reference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// What the registry is asked for: the digest when pinned, the tag otherwise.
    pub fn target(&self) -> &str {
        self.digest.as_deref().unwrap_or(&self.tag)
    }

    /// Host that actually serves the registry API for this reference.
    pub fn api_host(&self) -> &str {
        if self.registry == DEFAULT_DOMAIN {
            DOCKER_HUB_API_HOST
        } else {
            &self.registry
        }
    }

    /// `registry/repository`, without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Short form as users type it: `alpine`, `user/app`, `ghcr.io/owner/app`.
    pub fn familiar_name(&self) -> String {
        if self.registry != DEFAULT_DOMAIN {
            return self.name();
        }
        match self.repository.strip_prefix(OFFICIAL_REPOSITORY_PREFIX) {
            Some(short) if !short.contains('/') => short.to_string(),
            _ => self.repository.clone(),
        }
    }

    /// Only single segment names (Docker Hub official images) are eligible for lookup.
    pub fn is_official(&self) -> bool {
        !self.familiar_name().contains('/')
    }
}

fn split_domain(name: &str) -> (String, String) {
    let (mut domain, mut remainder) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.')
                || first.contains(':')
                || first == "localhost"
                || first.chars().any(|c| c.is_ascii_uppercase()) =>
        {
            (first.to_string(), rest.to_string())
        }
        _ => (DEFAULT_DOMAIN.to_string(), name.to_string()),
    };

    if domain == LEGACY_DEFAULT_DOMAIN {
        domain = DEFAULT_DOMAIN.to_string();
    }
    if domain == DEFAULT_DOMAIN && !remainder.contains('/') {
        remainder = format!("{}{}", OFFICIAL_REPOSITORY_PREFIX, remainder);
    }
    (domain, remainder)
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)?;
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl FromStr for Reference {
    type Err = FreshnessError;

    fn from_str(s: &str) -> Result<Self> {
        Reference::normalize(s)
    }
}
