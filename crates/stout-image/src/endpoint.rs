//! Registry endpoint table.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use stout_common::{StoutError, StoutResult};

/// Connection details for one registry host.
#[derive(Debug, Clone)]
pub struct RegistryEndpoint {
    /// URL scheme (`https` everywhere outside of tests).
    pub scheme: String,
    /// Host actually dialed for API requests.
    pub fqdn: String,
    /// Host of the token service.
    pub auth_host: String,
}

impl RegistryEndpoint {
    /// Create an endpoint with explicit connection details.
    #[must_use]
    pub fn new(
        scheme: impl Into<String>,
        fqdn: impl Into<String>,
        auth_host: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            fqdn: fqdn.into(),
            auth_host: auth_host.into(),
        }
    }

    /// URL of a manifest, by tag or digest.
    #[must_use]
    pub fn manifest_url(&self, repository: &str, reference: &str) -> String {
        format!(
            "{}://{}/v2/{}/manifests/{}",
            self.scheme, self.fqdn, repository, reference
        )
    }

    /// URL of a blob, by digest.
    ///
    /// The digest's `:` is escaped; registries accept both forms.
    #[must_use]
    pub fn blobs_url(&self, repository: &str, digest: &str) -> String {
        format!(
            "{}://{}/v2/{}/blobs/{}",
            self.scheme,
            self.fqdn,
            repository,
            digest.replace(':', "%3A")
        )
    }
}

/// Known registries, keyed by the host as written in image references.
static REGISTRIES: Lazy<HashMap<&'static str, RegistryEndpoint>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(
        "docker.io",
        RegistryEndpoint::new("https", "registry-1.docker.io", "auth.docker.io"),
    );
    table
});

/// Look up the endpoint for a registry host.
pub fn lookup(host: &str) -> StoutResult<RegistryEndpoint> {
    REGISTRIES
        .get(host)
        .cloned()
        .ok_or_else(|| StoutError::UnknownRegistry {
            host: host.to_string(),
        })
}
