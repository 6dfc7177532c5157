//! Image reference parsing
//!
//! Splits `registry/repository[:tag][@digest]` into its parts with the
//! usual Docker Hub defaults: no registry means `docker.io`, a single
//! path component on Docker Hub gets the `library/` prefix, and no tag
//! means `latest`.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use super::RegistryError;

/// Registry name used when a reference carries none
pub const DEFAULT_REGISTRY_NAME: &str = "docker.io";

/// API endpoint serving `docker.io`
pub const DEFAULT_REGISTRY_HOST: &str = "registry-1.docker.io";

/// Tag used when a reference carries neither tag nor digest
pub const DEFAULT_TAG: &str = "latest";

/// Tag or digest part of a reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Tag(String),
    Digest(String),
}

impl Reference {
    pub fn as_str(&self) -> &str {
        match self {
            Reference::Tag(tag) => tag,
            Reference::Digest(digest) => digest,
        }
    }
}

/// A parsed image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry as written, e.g. `quay.io` or `localhost:5000`
    pub registry: String,
    /// Repository path, e.g. `library/nginx`
    pub repository: String,
    pub reference: Reference,
}

fn repository_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$",
        )
        .expect("repository pattern compiles")
    })
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("tag pattern compiles")
    })
}

/// Whether the first path component names a registry rather than a namespace
fn is_registry_component(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

impl ImageReference {
    /// Parse an image reference
    pub fn parse(image: &str) -> Result<Self, RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidReference {
            image: image.to_string(),
            reason: reason.to_string(),
        };

        let image_trimmed = image.trim();
        if image_trimmed.is_empty() {
            return Err(invalid("empty reference"));
        }

        let (name, digest) = match image_trimmed.split_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(invalid("digest must be algorithm:hex"));
                }
                (name, Some(digest.to_string()))
            }
            None => (image_trimmed, None),
        };

        // A ':' after the last '/' separates the tag
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(i) => (&name[..last_slash + i], Some(&name[last_slash + i + 1..])),
            None => (name, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if is_registry_component(first) => {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY_NAME.to_string(), name.to_string()),
        };

        let repository = if registry == DEFAULT_REGISTRY_NAME && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository
        };

        if !repository_pattern().is_match(&repository) {
            return Err(invalid("invalid repository name"));
        }

        let reference = match (digest, tag) {
            (Some(digest), _) => Reference::Digest(digest),
            (None, Some(tag)) => {
                if !tag_pattern().is_match(tag) {
                    return Err(invalid("invalid tag"));
                }
                Reference::Tag(tag.to_string())
            }
            (None, None) => Reference::Tag(DEFAULT_TAG.to_string()),
        };

        Ok(Self {
            registry,
            repository,
            reference,
        })
    }

    /// Host serving the registry API
    pub fn api_host(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY_NAME {
            DEFAULT_REGISTRY_HOST
        } else {
            &self.registry
        }
    }

    /// `HEAD`/`GET` URL of the manifest
    pub fn manifest_url(&self, plain_http: bool) -> String {
        format!(
            "{}://{}/v2/{}/manifests/{}",
            if plain_http { "http" } else { "https" },
            self.api_host(),
            self.repository,
            self.reference.as_str()
        )
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reference {
            Reference::Tag(tag) => write!(f, "{}/{}:{}", self.registry, self.repository, tag),
            Reference::Digest(digest) => {
                write!(f, "{}/{}@{}", self.registry, self.repository, digest)
            }
        }
    }
}
