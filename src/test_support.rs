//! Fixtures shared by the unit tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::cache::{CacheStorage, Generation, SqliteStorage};
use crate::fetch::Fetcher;
use crate::http::{Request, Response, ResponseType};

pub const ORIGIN: &str = "https://attendance.example";

pub fn origin() -> Url {
  Url::parse(ORIGIN).unwrap()
}

/// Absolute URL on the test origin.
pub fn url(path: &str) -> Url {
  origin().join(path).unwrap()
}

/// GET request for a path on the test origin.
pub fn request(path: &str) -> Request {
  Request::get(url(path))
}

pub fn response(url: &str, status: u16, body: &str, response_type: ResponseType) -> Response {
  Response {
    status,
    status_text: match status {
      200 => "OK",
      404 => "Not Found",
      500 => "Internal Server Error",
      _ => "",
    }
    .to_string(),
    headers: vec![("content-type".to_string(), "text/plain".to_string())],
    body: body.as_bytes().to_vec(),
    response_type,
    url: url.to_string(),
  }
}

/// Same-origin 200 response for a path on the test origin.
pub fn ok_response(path: &str, body: &str) -> Response {
  response(url(path).as_str(), 200, body, ResponseType::Basic)
}

/// Scripted network: serves registered responses, errors for everything else.
#[derive(Default)]
pub struct StubFetcher {
  routes: Mutex<HashMap<String, Response>>,
  seen: Mutex<Vec<Request>>,
  calls: AtomicUsize,
  offline: AtomicBool,
}

impl StubFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Serve `response` for the absolute form of `url`.
  pub fn route(self, url: &Url, response: Response) -> Self {
    self.set_route(url, response);
    self
  }

  pub fn set_route(&self, url: &Url, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  /// Same-origin 200 for a path on the test origin.
  pub fn serve(self, path: &str, body: &str) -> Self {
    self.route(&url(path), ok_response(path, body))
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Number of network calls made so far.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  /// Every request that reached the network, in order.
  pub fn requests(&self) -> Vec<Request> {
    self.seen.lock().unwrap().clone()
  }
}

impl Fetcher for StubFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.seen.lock().unwrap().push(request.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to fetch {}: network unreachable", request.url));
    }

    self
      .routes
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned()
      .ok_or_else(|| eyre!("Failed to fetch {}: connection refused", request.url))
  }
}

/// SQLite store whose lookups or generation listing can be made to fail.
pub struct FaultyStorage {
  inner: SqliteStorage,
  fail_lookups: AtomicBool,
  fail_listing: AtomicBool,
}

impl FaultyStorage {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
      fail_lookups: AtomicBool::new(false),
      fail_listing: AtomicBool::new(false),
    }
  }

  pub fn set_fail_lookups(&self, fail: bool) {
    self.fail_lookups.store(fail, Ordering::SeqCst);
  }

  pub fn set_fail_listing(&self, fail: bool) {
    self.fail_listing.store(fail, Ordering::SeqCst);
  }
}

impl CacheStorage for FaultyStorage {
  fn keys(&self) -> Result<Vec<String>> {
    if self.fail_listing.load(Ordering::SeqCst) {
      return Err(eyre!("disk I/O error"));
    }
    self.inner.keys()
  }

  fn generations(&self) -> Result<Vec<Generation>> {
    self.inner.generations()
  }

  fn open(&self, cache_name: &str) -> Result<()> {
    self.inner.open(cache_name)
  }

  fn delete(&self, cache_name: &str) -> Result<bool> {
    self.inner.delete(cache_name)
  }

  fn match_request(&self, cache_name: &str, request: &Request) -> Result<Option<Response>> {
    if self.fail_lookups.load(Ordering::SeqCst) {
      return Err(eyre!("database disk image is malformed"));
    }
    self.inner.match_request(cache_name, request)
  }

  fn put(&self, cache_name: &str, request: &Request, response: &Response) -> Result<()> {
    self.inner.put(cache_name, request, response)
  }

  fn put_all(&self, cache_name: &str, entries: &[(Request, Response)]) -> Result<()> {
    self.inner.put_all(cache_name, entries)
  }
}
