//! Request and response values passed across the interception boundary.

use std::collections::BTreeMap;
use std::fmt;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::Identity;

/// Header map with case-insensitive names (stored lowercased).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, name: &str, value: impl Into<String>) {
    self.0.insert(name.to_ascii_lowercase(), value.into());
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    let mut headers = Headers::new();
    for (k, v) in iter {
      headers.insert(k.as_ref(), v);
    }
    headers
  }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Headers::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name, value);
    self
  }

  /// Attach a JSON body and the matching content type.
  pub fn with_json(mut self, payload: &serde_json::Value) -> Self {
    self.headers.insert("content-type", "application/json");
    self.body = Some(payload.to_string().into_bytes());
    self
  }

  pub fn identity(&self) -> Identity {
    Identity::new(self.method.as_str(), self.url.as_str())
  }

  /// Value of the Accept header, or an empty string.
  pub fn accept(&self) -> &str {
    self.headers.get("accept").unwrap_or_default()
  }
}

/// A response, either from the network, the store, or synthesized locally.
///
/// Cloning produces a full snapshot; the store keeps its own copy while the
/// original goes back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn text(status: u16, body: &str) -> Self {
    Self::new(status, body).with_header("content-type", "text/plain;charset=UTF-8")
  }

  pub fn html(status: u16, body: &str) -> Self {
    Self::new(status, body).with_header("content-type", "text/html")
  }

  pub fn json(status: u16, body: &serde_json::Value) -> Self {
    Self::new(status, body.to_string()).with_header("content-type", "application/json")
  }

  /// Any 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only responses with status exactly 200 are written to the store.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }

  pub fn content_type(&self) -> Option<&str> {
    self.headers.get("content-type")
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

impl fmt::Display for Response {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "HTTP {}", self.status)?;
    for (name, value) in self.headers.iter() {
      writeln!(f, "{}: {}", name, value)?;
    }
    writeln!(f)?;
    write!(f, "{}", self.body_text())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_names_are_case_insensitive() {
    let mut headers = Headers::new();
    headers.insert("Content-Type", "text/html");
    assert_eq!(headers.get("content-type"), Some("text/html"));
    assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
  }

  #[test]
  fn test_only_status_200_is_cacheable() {
    assert!(Response::new(200, "").is_cacheable());
    assert!(!Response::new(204, "").is_cacheable());
    assert!(!Response::new(304, "").is_cacheable());
    assert!(Response::new(204, "").is_success());
  }

  #[test]
  fn test_request_identity_uses_method_and_url() {
    let url = Url::parse("https://example.com/css/global.css").unwrap();
    let identity = Request::get(url).identity();
    assert_eq!(identity.method, "GET");
    assert_eq!(identity.url, "https://example.com/css/global.css");
  }
}
