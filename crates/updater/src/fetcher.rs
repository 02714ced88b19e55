use crate::error::{Result, UpdaterError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

/// Status and body of a manifest download.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Abstraction over downloading manifest documents.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    /// Fetch `url`. Transport failures are errors; HTTP error statuses are not.
    async fn fetch(&self, url: &Url) -> Result<FetchResponse>;
}

/// Builder for [`HttpManifestFetcher`].
#[derive(Default)]
pub struct HttpManifestFetcherBuilder {
    client: Option<Client>,
    timeout: Option<Duration>,
}

impl HttpManifestFetcherBuilder {
    /// Provide a custom reqwest client instance.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Overall request timeout. Ignored when a custom client is supplied.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the fetcher.
    pub fn build(self) -> Result<HttpManifestFetcher> {
        let client = match self.client {
            Some(client) => client,
            None => {
                let mut builder = Client::builder();
                if let Some(timeout) = self.timeout {
                    builder = builder.timeout(timeout);
                }
                builder
                    .build()
                    .map_err(|err| UpdaterError::Other(format!("http client setup failed: {err}")))?
            }
        };

        Ok(HttpManifestFetcher { client })
    }
}

/// HTTP manifest fetcher that never serves a cached copy.
#[derive(Clone)]
pub struct HttpManifestFetcher {
    client: Client,
}

impl HttpManifestFetcher {
    /// Create a new builder.
    pub fn builder() -> HttpManifestFetcherBuilder {
        HttpManifestFetcherBuilder::default()
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse> {
        tracing::debug!(%url, "fetching manifest");
        let response = self
            .client
            .get(url.clone())
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await
            .map_err(|err| UpdaterError::FetchFailed(err.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| UpdaterError::FetchFailed(err.to_string()))?;
        Ok(FetchResponse { status, body })
    }
}
