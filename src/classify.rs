//! Request classification: picks the strategy an intercepted request runs.

use reqwest::Method;

use crate::http::Request;

/// Category an intercepted request falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Static asset, served cache-first
  Static,
  /// `/api/` call, network-first and never written through
  Api,
  /// Page navigation, network-first with an offline page
  Html,
  /// Everything else, network-first with cache fallback
  Other,
}

/// Classify a request, or return `None` when it must pass through untouched
/// (non-GET, or a scheme other than http/https).
pub fn classify(request: &Request, static_extensions: &[String]) -> Option<RequestClass> {
  if request.method != Method::GET {
    return None;
  }
  if !matches!(request.url.scheme(), "http" | "https") {
    return None;
  }

  let path = request.url.path();
  let class = if path.starts_with("/api/") {
    RequestClass::Api
  } else if is_static_asset(path, static_extensions) {
    RequestClass::Static
  } else if request.accept().contains("text/html") {
    RequestClass::Html
  } else {
    RequestClass::Other
  };

  Some(class)
}

/// Substring match, so `/bundle.js.map` and `/font.woff2?v=3` paths count too.
fn is_static_asset(path: &str, extensions: &[String]) -> bool {
  extensions.iter().any(|ext| path.contains(ext.as_str()))
}
