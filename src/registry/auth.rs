//! Registry authentication
//!
//! - Docker `config.json` credentials taken from pull secrets
//! - `WWW-Authenticate` challenge parsing
//! - Bearer token exchange with the challenge realm

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::reference::{DEFAULT_REGISTRY_HOST, DEFAULT_REGISTRY_NAME};
use super::RegistryError;

/// Username and password for one registry
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The subset of docker `config.json` used for pulls
#[derive(Debug, Default, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: BTreeMap<String, DockerAuth>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DockerAuth {
    /// base64 of `username:password`
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Hosts that all mean Docker Hub
const DOCKER_HUB_ALIASES: &[&str] = &[
    DEFAULT_REGISTRY_NAME,
    DEFAULT_REGISTRY_HOST,
    "index.docker.io",
];

/// Reduce a `config.json` key such as `https://index.docker.io/v1/` to a host
fn normalize_host(key: &str) -> &str {
    let host = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    host.split('/').next().unwrap_or(host)
}

fn same_registry(a: &str, b: &str) -> bool {
    a == b || (DOCKER_HUB_ALIASES.contains(&a) && DOCKER_HUB_ALIASES.contains(&b))
}

impl DockerConfig {
    /// Parse a `config.json` document
    pub fn parse(json: &str) -> Result<Self, RegistryError> {
        serde_json::from_str(json)
            .map_err(|e| RegistryError::InvalidSecret(format!("malformed docker config: {}", e)))
    }

    /// Credentials stored for `registry`, if any. An entry for the exact
    /// host wins over a Docker Hub alias.
    pub fn credentials_for(&self, registry: &str) -> Result<Option<Credentials>, RegistryError> {
        let entry = self
            .auths
            .iter()
            .find(|(key, _)| normalize_host(key) == registry)
            .or_else(|| {
                self.auths
                    .iter()
                    .find(|(key, _)| same_registry(normalize_host(key), registry))
            });

        match entry {
            Some((_, auth)) => auth.credentials().map(Some),
            None => Ok(None),
        }
    }
}

impl DockerAuth {
    fn credentials(&self) -> Result<Credentials, RegistryError> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Ok(Credentials {
                username: username.clone(),
                password: password.clone(),
            });
        }

        let encoded = self
            .auth
            .as_deref()
            .ok_or_else(|| RegistryError::InvalidSecret("auth entry has no credentials".into()))?;
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|e| RegistryError::InvalidSecret(format!("auth is not base64: {}", e)))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| RegistryError::InvalidSecret("auth is not UTF-8".into()))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| RegistryError::InvalidSecret("auth must be username:password".into()))?;

        Ok(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// A parsed `WWW-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
    Basic,
}

impl Challenge {
    /// Parse `Bearer realm="...",service="...",scope="..."` or `Basic ...`
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));

        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Challenge::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for part in params.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            let value = value.trim_matches('"').to_string();
            match key.trim() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        realm.map(|realm| Challenge::Bearer {
            realm,
            service,
            scope,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Exchange a bearer challenge for a token.
///
/// The scope defaults to `repository:<repository>:pull` when the challenge
/// carries none.
pub async fn fetch_token(
    client: &Client,
    realm: &str,
    service: Option<&str>,
    scope: Option<&str>,
    repository: &str,
    credentials: Option<&Credentials>,
) -> Result<String, RegistryError> {
    let scope = scope
        .map(str::to_string)
        .unwrap_or_else(|| format!("repository:{}:pull", repository));

    let mut query = vec![("scope", scope)];
    if let Some(service) = service {
        query.push(("service", service.to_string()));
    }

    let mut request = client.get(realm).query(&query);
    if let Some(credentials) = credentials {
        request = request.basic_auth(&credentials.username, Some(&credentials.password));
    }

    debug!(realm = %realm, repository = %repository, "Requesting registry token");
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(RegistryError::Unauthorized(format!(
            "token endpoint {} returned {}",
            realm,
            response.status()
        )));
    }

    let body: TokenResponse = response.json().await?;
    body.token
        .or(body.access_token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RegistryError::Unauthorized(format!("no token in response from {}", realm)))
}
