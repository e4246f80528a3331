//! Request and response snapshots exchanged between the host, the network
//! and the cache store.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// What kind of resource a request is fetching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Destination {
  /// Top-level navigation
  Document,
  Script,
  Style,
  Image,
  Font,
  Manifest,
  /// `fetch()`/XHR style API calls
  #[default]
  Empty,
  Other,
}

/// An outgoing request issued by a controlled application instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  /// Headers forwarded to the network as-is
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  /// A plain GET for a sub-resource or API call.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      destination: Destination::Empty,
      headers: Vec::new(),
      body: None,
    }
  }

  /// A top-level document navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      destination: Destination::Document,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.destination == Destination::Document
  }

  /// URL used for matching. Fragments never take part in request identity.
  pub fn identity_url(&self) -> Url {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url
  }

  /// Stable storage key for this request's identity (method + URL).
  /// Headers and body never take part.
  pub fn cache_key(&self) -> String {
    let input = format!("{} {}", self.method.as_str(), self.identity_url());

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// How the response relates to the application's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response, fully readable
  Basic,
  /// Cross-origin response granted through CORS headers
  Cors,
  /// Cross-origin response without a CORS grant
  Opaque,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseType::Basic => "basic",
      ResponseType::Cors => "cors",
      ResponseType::Opaque => "opaque",
    }
  }
}

impl fmt::Display for ResponseType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResponseType {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "basic" => Ok(ResponseType::Basic),
      "cors" => Ok(ResponseType::Cors),
      "opaque" => Ok(ResponseType::Opaque),
      other => Err(eyre!("Unknown response type: {}", other)),
    }
  }
}

/// A complete response: what the network returned, or an immutable stored
/// snapshot of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub response_type: ResponseType,
  /// Final URL after redirects
  pub url: String,
}

impl Response {
  /// Whether the status is in the 200-299 range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
