//! Network access for the agent.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN};
use std::future::Future;
use tracing::debug;
use url::Url;

use crate::http::{Request, Response, ResponseType};

/// Anything that can take a request to the network.
///
/// An `Err` means the request never produced a response (offline, DNS,
/// connection refused). HTTP error statuses are still `Ok`.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// HTTP fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  /// The application's origin, used to classify responses
  origin: Url,
}

impl HttpFetcher {
  pub fn new(origin: Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("ocagent/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    debug!(method = %request.method, url = %request.url, "network fetch");

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone())
      .headers(header_map(&request.headers)?);
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status();
    let final_url = response.url().clone();
    let response_type = classify(&self.origin, &final_url, response.headers());
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

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
      response_type,
      url: final_url.to_string(),
    })
  }
}

/// Convert request headers into a reqwest header map.
fn header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
  let mut map = HeaderMap::with_capacity(headers.len());
  for (name, value) in headers {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| eyre!("Invalid header name {}: {}", name, e))?;
    let value =
      HeaderValue::from_str(value).map_err(|e| eyre!("Invalid value for header {}: {}", name, e))?;
    map.append(name, value);
  }
  Ok(map)
}

/// Classify a response by where it finally came from.
///
/// Same origin as the application is `basic`; a cross-origin response is
/// `cors` when the server granted access, `opaque` otherwise.
pub fn classify(origin: &Url, response_url: &Url, headers: &HeaderMap) -> ResponseType {
  if origin.origin() == response_url.origin() {
    ResponseType::Basic
  } else if headers.contains_key(ACCESS_CONTROL_ALLOW_ORIGIN) {
    ResponseType::Cors
  } else {
    ResponseType::Opaque
  }
}
