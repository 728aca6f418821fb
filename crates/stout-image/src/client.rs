//! Registry client: transport, manifest resolution and layer fetching.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header;
use stout_common::{StoutError, StoutResult};
use tokio::task::JoinSet;

use crate::auth::{self, AuthChallenge, AuthToken};
use crate::cache::LayerCache;
use crate::endpoint::RegistryEndpoint;
use crate::manifest::{
    self, Descriptor, Manifest, ManifestIndex, ACCEPT_HEADER, DOCKER_MANIFEST_LIST_V2,
    OCI_IMAGE_INDEX_V1,
};
use crate::reference::ImageReference;

/// Batch attempts before a pull gives up on its layers.
const MAX_RETRIES: u32 = 5;

/// Which address families the transport may dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialFamily {
    /// IPv4 only.
    V4Only,
    /// Whatever the resolver returns.
    Any,
}

/// Configuration of the shared HTTPS transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// How long idle pooled connections are kept.
    pub idle_timeout: Duration,
    /// Maximum idle pooled connections per host.
    pub max_idle: usize,
    /// Address families the dialer may use.
    pub dial_family: DialFamily,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(20),
            idle_timeout: Duration::from_secs(30),
            max_idle: 10,
            dial_family: DialFamily::V4Only,
        }
    }
}

impl TransportConfig {
    /// Build the process-wide HTTP client.
    ///
    /// Construction failure is fatal at startup; all registry traffic shares
    /// the returned client and its connection pool.
    pub fn build(&self) -> StoutResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .pool_idle_timeout(self.idle_timeout)
            .pool_max_idle_per_host(self.max_idle);

        if self.dial_family == DialFamily::V4Only {
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }

        Ok(builder.build()?)
    }
}

/// A layer resolved to a verified local cache file.
#[derive(Debug, Clone)]
pub struct LocalLayer {
    /// The descriptor from the manifest.
    pub descriptor: Descriptor,
    /// Absolute path to the cached `.tar.gz` blob.
    pub path: PathBuf,
}

/// Client for pulling images from one registry.
pub struct RegistryClient {
    http: reqwest::Client,
    endpoint: RegistryEndpoint,
    cache: LayerCache,
}

impl RegistryClient {
    /// Create a client against an explicit endpoint.
    #[must_use]
    pub fn new(http: reqwest::Client, endpoint: RegistryEndpoint, cache: LayerCache) -> Self {
        Self {
            http,
            endpoint,
            cache,
        }
    }

    /// Create a client for the registry named in an image reference.
    pub fn for_reference(
        http: reqwest::Client,
        reference: &ImageReference,
        cache: LayerCache,
    ) -> StoutResult<Self> {
        let endpoint = crate::endpoint::lookup(&reference.registry)?;
        Ok(Self::new(http, endpoint, cache))
    }

    /// Pull an image: resolve its manifest for the host platform and fetch
    /// every layer through the cache.
    ///
    /// Returned layers are in manifest order, which is the order they must
    /// be applied to the root filesystem.
    pub async fn pull(&self, reference: &ImageReference) -> StoutResult<Vec<LocalLayer>> {
        tracing::info!(reference = %reference, "Pulling image");

        let (layers, token) = self.resolve_manifest(reference).await?;
        let paths = self
            .fetch_layers(reference, &layers, token.as_ref())
            .await?;

        Ok(layers
            .into_iter()
            .zip(paths)
            .map(|(descriptor, path)| LocalLayer { descriptor, path })
            .collect())
    }

    /// Resolve a reference to the ordered layer list of the concrete
    /// manifest matching the host platform.
    ///
    /// Returns the bearer token acquired along the way (if any) so blob
    /// fetches can reuse it.
    pub async fn resolve_manifest(
        &self,
        reference: &ImageReference,
    ) -> StoutResult<(Vec<Descriptor>, Option<AuthToken>)> {
        let mut token = None;

        // Step 1: the index (manifest list).
        let url = self
            .endpoint
            .manifest_url(&reference.repository, &reference.tag);
        let response = self.get_with_auth(&url, &mut token).await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_default();

        if content_type != DOCKER_MANIFEST_LIST_V2 && content_type != OCI_IMAGE_INDEX_V1 {
            return Err(StoutError::UnsupportedMediaType {
                media_type: content_type,
            });
        }

        let body = response.text().await?;
        let index: ManifestIndex = serde_json::from_str(&body)?;

        // Step 2: platform selection.
        let (os, arch) = manifest::host_platform();
        let entry = index.select(os, arch)?;
        tracing::debug!(
            digest = %entry.digest,
            os,
            arch,
            "Selected platform manifest"
        );

        // Step 3: the concrete manifest.
        let url = self
            .endpoint
            .manifest_url(&reference.repository, entry.digest.as_str());
        let response = self.get_with_auth(&url, &mut token).await?;
        let body = response.text().await?;
        let manifest: Manifest = serde_json::from_str(&body)?;
        manifest.ensure_supported()?;

        tracing::debug!(layers = manifest.layers.len(), "Resolved manifest");
        Ok((manifest.layers, token))
    }

    /// Fetch all layers, reusing the cache, with batch-level retry.
    ///
    /// Every layer is dispatched as its own task; if any task fails the
    /// whole batch is retried (cache hits make re-attempts cheap). Returns
    /// local paths in the same order as `layers`.
    pub async fn fetch_layers(
        &self,
        reference: &ImageReference,
        layers: &[Descriptor],
        token: Option<&AuthToken>,
    ) -> StoutResult<Vec<PathBuf>> {
        for attempt in 1..=MAX_RETRIES {
            match self.fetch_batch(reference, layers, token).await {
                Ok(paths) => return Ok(paths),
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = MAX_RETRIES,
                        error = %err,
                        "Layer batch failed"
                    );
                }
            }
        }

        Err(StoutError::LayerFetchFailed {
            attempts: MAX_RETRIES,
        })
    }

    async fn fetch_batch(
        &self,
        reference: &ImageReference,
        layers: &[Descriptor],
        token: Option<&AuthToken>,
    ) -> StoutResult<Vec<PathBuf>> {
        let mut tasks = JoinSet::new();

        for (index, descriptor) in layers.iter().enumerate() {
            let http = self.http.clone();
            let endpoint = self.endpoint.clone();
            let cache = self.cache.clone();
            let repository = reference.repository.clone();
            let descriptor = descriptor.clone();
            let token = token.cloned();

            tasks.spawn(async move {
                let path =
                    fetch_layer(&http, &endpoint, &cache, &repository, &descriptor, token).await?;
                Ok::<_, StoutError>((index, path))
            });
        }

        // Join on every task before deciding the batch outcome, so a failed
        // layer never aborts downloads that would otherwise land in the
        // cache and make the retry cheap.
        let mut paths: Vec<Option<PathBuf>> = vec![None; layers.len()];
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((index, path))) => paths[index] = Some(path),
                Ok(Err(err)) => first_error = first_error.or(Some(err)),
                Err(join_err) => {
                    first_error = first_error.or(Some(StoutError::Internal {
                        message: format!("layer task panicked: {join_err}"),
                    }));
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        paths
            .into_iter()
            .map(|p| {
                p.ok_or_else(|| StoutError::Internal {
                    message: "layer task finished without a result".to_string(),
                })
            })
            .collect()
    }

    /// GET with the fixed Accept header and the single-retry auth dance.
    ///
    /// A 4xx response triggers one challenge parse + token exchange + retry;
    /// a second 4xx surfaces as `Unauthorized`.
    async fn get_with_auth(
        &self,
        url: &str,
        token: &mut Option<AuthToken>,
    ) -> StoutResult<reqwest::Response> {
        let response = self.send(url, token.as_ref()).await?;
        if response.status().is_success() {
            return Ok(response);
        }

        if !response.status().is_client_error() {
            return Err(status_error(response));
        }

        let challenge = challenge_from(&response)?;
        *token = Some(auth::exchange(&self.http, &challenge).await?);

        let retry = self.send(url, token.as_ref()).await?;
        if retry.status().is_success() {
            Ok(retry)
        } else if retry.status().is_client_error() {
            Err(StoutError::Unauthorized {
                registry: self.endpoint.fqdn.clone(),
            })
        } else {
            Err(status_error(retry))
        }
    }

    async fn send(&self, url: &str, token: Option<&AuthToken>) -> StoutResult<reqwest::Response> {
        let mut request = self.http.get(url).header(header::ACCEPT, ACCEPT_HEADER);
        if let Some(token) = token {
            request = request.bearer_auth(token.as_str());
        }
        Ok(request.send().await?)
    }
}

/// Fetch one layer: cache hit, or a streamed, digest-verified download.
async fn fetch_layer(
    http: &reqwest::Client,
    endpoint: &RegistryEndpoint,
    cache: &LayerCache,
    repository: &str,
    descriptor: &Descriptor,
    token: Option<AuthToken>,
) -> StoutResult<PathBuf> {
    if let Some(path) = cache.lookup(&descriptor.digest)? {
        return Ok(path);
    }

    let url = endpoint.blobs_url(repository, descriptor.digest.as_str());
    tracing::debug!(digest = %descriptor.digest, size = descriptor.size, "Downloading layer");

    let mut request = http.get(&url).header(header::ACCEPT, ACCEPT_HEADER);
    if let Some(token) = &token {
        request = request.bearer_auth(token.as_str());
    }
    let response = request.send().await?.error_for_status()?;

    let mut writer = cache.writer(&descriptor.digest)?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        writer.write_chunk(&chunk?)?;
    }

    writer.commit(&descriptor.digest, descriptor.size)
}

/// Extract and parse the Bearer challenge from a 4xx response.
fn challenge_from(response: &reqwest::Response) -> StoutResult<AuthChallenge> {
    let value = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .ok_or(StoutError::MissingChallenge)?;
    let header = value.to_str().map_err(|_| StoutError::MalformedChallenge {
        header: String::from_utf8_lossy(value.as_bytes()).into_owned(),
    })?;
    AuthChallenge::parse(header)
}

/// Turn a non-success response into an error without panicking on the
/// statuses `error_for_status` leaves alone.
fn status_error(response: reqwest::Response) -> StoutError {
    let status = response.status();
    match response.error_for_status() {
        Err(err) => err.into(),
        Ok(_) => StoutError::Internal {
            message: format!("unexpected HTTP status {status} from registry"),
        },
    }
}
