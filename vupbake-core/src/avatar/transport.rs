//! Binary image fetch.
//!
//! [`ImageTransport`] is the seam between acquisition logic and the network.
//! [`HttpTransport`] talks to the real image host with browser-like headers;
//! tests plug in scripted transports.

use super::circuit_breaker::CircuitBreaker;
use super::AvatarError;
use crate::config::AvatarConfig;
use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use reqwest::StatusCode;
use std::sync::Arc;

/// Raw body of a successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    /// `Content-Length` as sent by the server, if any.
    pub declared_len: Option<u64>,
}

pub trait ImageTransport {
    /// Fetch the body at `url`. Non-2xx responses are errors.
    fn fetch(&self, url: &str) -> Result<FetchedImage, AvatarError>;

    /// False while the host should not be contacted at all.
    fn is_available(&self) -> bool {
        true
    }
}

/// Rewrite avatar URLs to HTTPS.
///
/// The directory hands out `http://` and protocol-relative `//host/...` URLs;
/// the image host redirects or blocks both.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if let Some(rest) = url.strip_prefix("http://") {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        url.to_string()
    }
}

/// Blocking HTTP transport guarded by a circuit breaker.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    breaker: Arc<CircuitBreaker>,
}

impl HttpTransport {
    pub fn new(config: &AvatarConfig, breaker: Arc<CircuitBreaker>) -> Result<Self, AvatarError> {
        let header = |value: &str| {
            HeaderValue::from_str(value).map_err(|e| AvatarError::Client(format!("{value:?}: {e}")))
        };
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header(&config.user_agent)?);
        headers.insert(REFERER, header(&config.referer)?);
        headers.insert(ORIGIN, header(&config.origin)?);

        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| AvatarError::Client(e.to_string()))?;

        Ok(Self { client, breaker })
    }
}

impl ImageTransport for HttpTransport {
    fn fetch(&self, url: &str) -> Result<FetchedImage, AvatarError> {
        if !self.breaker.is_allowed() {
            return Err(AvatarError::CircuitOpen);
        }

        let resp = self.client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                AvatarError::Timeout(e.to_string())
            } else {
                AvatarError::Network(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            self.breaker.record_block();
            return Err(AvatarError::Blocked {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(AvatarError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let declared_len = resp.content_length();
        let bytes = resp.bytes().map_err(|e| {
            if e.is_timeout() {
                AvatarError::Timeout(e.to_string())
            } else {
                AvatarError::Network(e.to_string())
            }
        })?;
        self.breaker.record_success();

        Ok(FetchedImage {
            bytes: bytes.to_vec(),
            declared_len,
        })
    }

    fn is_available(&self) -> bool {
        self.breaker.is_allowed()
    }
}

/// Transport for `--offline` runs: never touches the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineTransport;

impl ImageTransport for OfflineTransport {
    fn fetch(&self, _url: &str) -> Result<FetchedImage, AvatarError> {
        Err(AvatarError::Offline)
    }

    fn is_available(&self) -> bool {
        false
    }
}
