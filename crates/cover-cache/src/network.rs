//! Network fetch of remote images

use crate::error::{FetchError, FetchResult};
use crate::types::ImageResponse;
use async_trait::async_trait;
use reqwest::header::{ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = "cover-cache/0.1";

/// Request mode for a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Body must be readable under cross-origin rules
    Cors,
    NoCors,
}

/// Fetch-by-URL primitive used by the cache
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`. Any HTTP status is `Ok`; transport and CORS failures are `Err`.
    async fn fetch(&self, url: &str, mode: FetchMode) -> FetchResult<ImageResponse>;
}

/// Settings for [`HttpFetcher`]
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub timeout: Duration,
    /// Origin presented on CORS requests; `None` skips the allow-origin check
    pub origin: Option<String>,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            origin: None,
        }
    }
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: Client,
    origin: Option<String>,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            origin: config.origin,
        })
    }

    fn check_cors(&self, url: &str, response: &reqwest::Response) -> FetchResult<()> {
        let Some(origin) = &self.origin else {
            return Ok(());
        };

        let allowed = response
            .headers()
            .get(ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::trim);

        match allowed {
            Some("*") => Ok(()),
            Some(value) if value == origin => Ok(()),
            Some(value) => Err(FetchError::CorsRejected(format!(
                "{url} allows origin {value}, not {origin}"
            ))),
            None => Err(FetchError::CorsRejected(format!(
                "{url} sent no Access-Control-Allow-Origin"
            ))),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, mode: FetchMode) -> FetchResult<ImageResponse> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "unsupported scheme {}",
                parsed.scheme()
            )));
        }

        let mut request = self.client.get(parsed);
        if mode == FetchMode::Cors {
            if let Some(origin) = &self.origin {
                request = request.header(ORIGIN, origin);
            }
        }

        debug!(url = %url, ?mode, "Fetching image");
        let response = request.send().await?;

        if mode == FetchMode::Cors {
            self.check_cors(url, &response)?;
        }

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        debug!(url = %url, status, size = body.len(), "Fetched image");
        Ok(ImageResponse {
            status,
            headers,
            body,
        })
    }
}
