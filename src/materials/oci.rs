//! CONTAINER_IMAGE: resolve a reference against its OCI registry
//!
//! Nothing is uploaded; the material records the canonical manifest digest.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use cas_protocol::Digest;
use regex_lite::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::MaterialError;
use crate::api::{Material, MaterialPayload, MaterialType};

const DOCKER_HUB: &str = "docker.io";
const DOCKER_HUB_API: &str = "registry-1.docker.io";
const DEFAULT_TAG: &str = "latest";
const DIGEST_HEADER: &str = "Docker-Content-Digest";

const MANIFEST_MEDIA_TYPES: &str = "application/vnd.oci.image.index.v1+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.docker.distribution.manifest.v2+json";

fn repository_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$")
            .expect("valid regex")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid regex"))
}

fn challenge_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("valid regex"))
}

/// A parsed image reference, normalized the way registries expect it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<Digest>,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self, String> {
        if reference.is_empty() || reference.chars().any(char::is_whitespace) {
            return Err("not an image reference".into());
        }

        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) => (
                rest,
                Some(digest.parse::<Digest>().map_err(|e| e.to_string())?),
            ),
            None => (reference, None),
        };

        // A ':' after the last '/' starts the tag; earlier ones belong to a registry port.
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].find(':') {
            Some(i) => (&rest[..last_slash + i], Some(&rest[last_slash + i + 1..])),
            None => (rest, None),
        };
        if let Some(tag) = tag {
            if !tag_regex().is_match(tag) {
                return Err(format!("invalid tag '{}'", tag));
            }
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ => (DOCKER_HUB.to_string(), name.to_string()),
        };
        let repository = if registry == DOCKER_HUB && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository
        };
        if !repository_regex().is_match(&repository) {
            return Err(format!("invalid repository '{}'", repository));
        }

        let tag = match (tag, &digest) {
            (Some(tag), _) => Some(tag.to_string()),
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (None, Some(_)) => None,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// `registry/repository`
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Manifest reference sent to the registry: digest when pinned, else tag
    fn manifest_ref(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(d), _) => d.to_string(),
            (None, Some(t)) => t.clone(),
            (None, None) => DEFAULT_TAG.to_string(),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// A reference pinned to its manifest digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub name: String,
    pub tag: String,
    pub digest: Digest,
}

/// Looks up the manifest digest of an image
pub trait ImageResolver: Send + Sync {
    fn resolve(&self, reference: &ImageReference) -> Result<ResolvedImage, MaterialError>;
}

pub(super) fn craft(
    id: &str,
    value: &str,
    resolver: &dyn ImageResolver,
) -> Result<Material, MaterialError> {
    let reference = ImageReference::parse(value)
        .map_err(|reason| MaterialError::invalid(MaterialType::ContainerImage, reason))?;
    let resolved = resolver.resolve(&reference)?;
    debug!(image = %reference, digest = %resolved.digest, "resolved container image");

    Ok(Material::new(
        id,
        MaterialType::ContainerImage,
        MaterialPayload::ContainerImage {
            name: resolved.name,
            digest: resolved.digest,
            tag: resolved.tag,
            is_subject: false,
        },
    ))
}

/// Username/password for a registry
#[derive(Debug, Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    access_token: String,
}

/// Resolver speaking the OCI distribution API over HTTPS
pub struct RegistryResolver {
    client: Client,
    credentials: HashMap<String, RegistryCredentials>,
}

impl RegistryResolver {
    pub fn new() -> Result<Self, MaterialError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MaterialError::ImageResolution {
                reference: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            credentials: HashMap::new(),
        })
    }

    /// Authenticate against `registry` (as written in references, e.g. `ghcr.io`)
    pub fn with_credentials(mut self, registry: impl Into<String>, credentials: RegistryCredentials) -> Self {
        self.credentials.insert(registry.into(), credentials);
        self
    }

    fn base_url(registry: &str) -> String {
        let host = if registry == DOCKER_HUB { DOCKER_HUB_API } else { registry };
        let scheme = if host.starts_with("localhost") || host.starts_with("127.0.0.1") {
            "http"
        } else {
            "https"
        };
        format!("{}://{}", scheme, host)
    }

    fn authorize(&self, request: RequestBuilder, registry: &str) -> RequestBuilder {
        match self.credentials.get(registry) {
            Some(c) => request.basic_auth(&c.username, Some(&c.password)),
            None => request,
        }
    }

    /// Exchange a `Bearer` challenge for a token
    fn fetch_token(&self, challenge: &str, registry: &str) -> Result<String, String> {
        let params = parse_bearer_challenge(challenge).ok_or("unsupported auth challenge")?;
        let realm = params.get("realm").ok_or("auth challenge without realm")?;

        let mut query = Vec::new();
        for key in ["service", "scope"] {
            if let Some(v) = params.get(key) {
                query.push((key, v.as_str()));
            }
        }
        let request = self.authorize(self.client.get(realm.as_str()).query(&query), registry);
        let response = request.send().map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("token endpoint returned {}", response.status()));
        }
        let body: TokenResponse = response.json().map_err(|e| e.to_string())?;
        match (body.token.is_empty(), body.access_token.is_empty()) {
            (false, _) => Ok(body.token),
            (true, false) => Ok(body.access_token),
            (true, true) => Err("token endpoint returned no token".into()),
        }
    }

    fn head_manifest(&self, url: &str, registry: &str) -> Result<Response, String> {
        let first = self
            .authorize(self.client.head(url).header(ACCEPT, MANIFEST_MEDIA_TYPES), registry)
            .send()
            .map_err(|e| e.to_string())?;
        if first.status() != StatusCode::UNAUTHORIZED {
            return Ok(first);
        }

        let challenge = first
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or("unauthorized without auth challenge")?
            .to_string();
        let token = self.fetch_token(&challenge, registry)?;
        self.client
            .head(url)
            .header(ACCEPT, MANIFEST_MEDIA_TYPES)
            .bearer_auth(token)
            .send()
            .map_err(|e| e.to_string())
    }
}

impl ImageResolver for RegistryResolver {
    fn resolve(&self, reference: &ImageReference) -> Result<ResolvedImage, MaterialError> {
        let fail = |reason: String| MaterialError::ImageResolution {
            reference: reference.to_string(),
            reason,
        };

        let url = format!(
            "{}/v2/{}/manifests/{}",
            Self::base_url(&reference.registry),
            reference.repository,
            reference.manifest_ref()
        );
        let response = self.head_manifest(&url, &reference.registry).map_err(fail)?;
        if !response.status().is_success() {
            return Err(fail(format!("registry returned {}", response.status())));
        }

        let digest = response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| reference.digest.as_ref().map(Digest::to_string))
            .ok_or_else(|| fail(format!("response without {} header", DIGEST_HEADER)))?;
        let digest: Digest = digest.parse().map_err(|e: cas_protocol::DigestError| fail(e.to_string()))?;

        if let Some(pinned) = &reference.digest {
            if pinned != &digest {
                return Err(fail(format!("registry reports {} for pinned {}", digest, pinned)));
            }
        }

        Ok(ResolvedImage {
            name: reference.name(),
            tag: reference.tag.clone().unwrap_or_default(),
            digest,
        })
    }
}

/// Parameters of a `Bearer realm="..",service="..",scope=".."` challenge
fn parse_bearer_challenge(header: &str) -> Option<HashMap<String, String>> {
    let params = header.strip_prefix("Bearer ")?;
    Some(
        challenge_regex()
            .captures_iter(params)
            .map(|c| (c[1].to_string(), c[2].to_string()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_docker_hub_shorthand() {
        let r = ImageReference::parse("alpine").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.tag.as_deref(), Some("latest"));
        assert_eq!(r.to_string(), "docker.io/library/alpine:latest");
    }

    #[test]
    fn test_parse_registry_with_port_and_tag() {
        let r = ImageReference::parse("localhost:5000/team/app:v1.2").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.tag.as_deref(), Some("v1.2"));
        assert_eq!(RegistryResolver::base_url(&r.registry), "http://localhost:5000");
    }

    #[test]
    fn test_parse_pinned_digest() {
        let digest = Digest::of_bytes(b"manifest");
        let r = ImageReference::parse(&format!("ghcr.io/acme/widget@{}", digest)).unwrap();
        assert_eq!(r.digest, Some(digest.clone()));
        assert_eq!(r.tag, None);
        assert_eq!(r.manifest_ref(), digest.to_string());
    }

    #[test]
    fn test_parse_rejects_non_references() {
        assert!(ImageReference::parse("hello world").is_err());
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("Upper/Case").is_err());
        assert!(ImageReference::parse("acme/widget@sha256:short").is_err());
        assert!(ImageReference::parse("/tmp/file.json").is_err());
    }

    #[test]
    fn test_bearer_challenge() {
        let params = parse_bearer_challenge(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull""#,
        )
        .unwrap();
        assert_eq!(params["realm"], "https://auth.docker.io/token");
        assert_eq!(params["scope"], "repository:library/alpine:pull");
        assert!(parse_bearer_challenge("Basic realm=\"x\"").is_none());
    }

    #[test]
    fn test_craft_with_resolver() {
        struct Fixed;
        impl ImageResolver for Fixed {
            fn resolve(&self, reference: &ImageReference) -> Result<ResolvedImage, MaterialError> {
                Ok(ResolvedImage {
                    name: reference.name(),
                    tag: reference.tag.clone().unwrap_or_default(),
                    digest: Digest::of_bytes(b"m"),
                })
            }
        }

        let m = craft("image", "ghcr.io/acme/widget:2.0", &Fixed).unwrap();
        match &m.payload {
            MaterialPayload::ContainerImage { name, tag, .. } => {
                assert_eq!(name, "ghcr.io/acme/widget");
                assert_eq!(tag, "2.0");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        m.validate().unwrap();

        assert!(craft("image", "not an image", &Fixed)
            .unwrap_err()
            .is_invalid_material_type());
    }
}
