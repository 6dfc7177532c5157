//! Registry existence probe
//!
//! Answers one question: does an image reference already exist in its
//! registry? The HTTP implementation issues `HEAD /v2/<repo>/manifests/<ref>`
//! and follows the Bearer/Basic authentication challenge once.

pub mod auth;
pub mod reference;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

use crate::cluster::{PullOptions, SecretStore, StoreError, DOCKER_CONFIG_JSON_KEY};

pub use auth::{Challenge, Credentials, DockerConfig};
pub use reference::{ImageReference, Reference};

/// Manifest media types accepted when probing
pub const MANIFEST_ACCEPT_HEADER: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.oci.image.manifest.v1+json";

/// Errors while probing a registry. All of them are worth retrying later.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid image reference '{image}': {reason}")]
    InvalidReference { image: String, reason: String },

    #[error("Registry request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Registry returned unexpected status {status} for {image}")]
    UnexpectedStatus { image: String, status: u16 },

    #[error("Registry authentication failed: {0}")]
    Unauthorized(String),

    #[error("Pull secret '{0}' not found")]
    MissingSecret(String),

    #[error("Invalid pull secret: {0}")]
    InvalidSecret(String),

    #[error("Secret lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// Checks whether images exist
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistryProbe: Send + Sync {
    /// `Ok(true)` when the manifest exists, `Ok(false)` on not-found.
    /// Pull secrets are looked up in `namespace`.
    async fn image_exists(
        &self,
        image: &str,
        options: &PullOptions,
        namespace: &str,
    ) -> Result<bool, RegistryError>;
}

/// Probe talking to real registries over HTTP
pub struct HttpRegistryProbe {
    client: Client,
    /// Client accepting any certificate, for `insecureSkipTLSVerify`
    unverified_client: Client,
    secrets: Arc<dyn SecretStore>,
}

impl HttpRegistryProbe {
    /// Create a probe with a per-request timeout
    pub fn new(secrets: Arc<dyn SecretStore>, timeout: Duration) -> Result<Self, RegistryError> {
        let client = Client::builder().timeout(timeout).build()?;
        let unverified_client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            client,
            unverified_client,
            secrets,
        })
    }

    /// Credentials for the image's registry from the pull secret, if one is set
    async fn credentials(
        &self,
        reference: &ImageReference,
        options: &PullOptions,
        namespace: &str,
    ) -> Result<Option<Credentials>, RegistryError> {
        let Some(secret_ref) = &options.secret else {
            return Ok(None);
        };

        let secret = self
            .secrets
            .get_secret(namespace, &secret_ref.name)
            .await?
            .ok_or_else(|| RegistryError::MissingSecret(secret_ref.name.clone()))?;

        let config_json = secret.data.get(DOCKER_CONFIG_JSON_KEY).ok_or_else(|| {
            RegistryError::InvalidSecret(format!(
                "secret '{}' has no {} entry",
                secret_ref.name, DOCKER_CONFIG_JSON_KEY
            ))
        })?;

        DockerConfig::parse(config_json)?.credentials_for(&reference.registry)
    }

    fn head(&self, client: &Client, url: &str) -> RequestBuilder {
        client.head(url).header(ACCEPT, MANIFEST_ACCEPT_HEADER)
    }

    /// Retry an unauthorized request according to its challenge
    async fn authenticate(
        &self,
        client: &Client,
        url: &str,
        unauthorized: Response,
        reference: &ImageReference,
        credentials: Option<&Credentials>,
    ) -> Result<Response, RegistryError> {
        let challenge = unauthorized
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(Challenge::parse);

        match challenge {
            Some(Challenge::Bearer {
                realm,
                service,
                scope,
            }) => {
                let token = auth::fetch_token(
                    client,
                    &realm,
                    service.as_deref(),
                    scope.as_deref(),
                    &reference.repository,
                    credentials,
                )
                .await?;
                Ok(self.head(client, url).bearer_auth(token).send().await?)
            }
            Some(Challenge::Basic) => {
                let credentials = credentials.ok_or_else(|| {
                    RegistryError::Unauthorized(format!(
                        "{} requires credentials",
                        reference.registry
                    ))
                })?;
                Ok(self
                    .head(client, url)
                    .basic_auth(&credentials.username, Some(&credentials.password))
                    .send()
                    .await?)
            }
            None => Err(RegistryError::Unauthorized(format!(
                "{} rejected the request without a usable challenge",
                reference.registry
            ))),
        }
    }
}

#[async_trait]
impl RegistryProbe for HttpRegistryProbe {
    #[instrument(skip(self, options), fields(insecure = options.insecure))]
    async fn image_exists(
        &self,
        image: &str,
        options: &PullOptions,
        namespace: &str,
    ) -> Result<bool, RegistryError> {
        let reference = ImageReference::parse(image)?;
        let credentials = self.credentials(&reference, options, namespace).await?;

        let client = if options.insecure_skip_tls_verify {
            &self.unverified_client
        } else {
            &self.client
        };
        let url = reference.manifest_url(options.insecure);

        let mut response = self.head(client, &url).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            response = self
                .authenticate(client, &url, response, &reference, credentials.as_ref())
                .await?;
        }

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "Probed manifest");
        match status {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(RegistryError::UnexpectedStatus {
                image: image.to_string(),
                status: s.as_u16(),
            }),
        }
    }
}
