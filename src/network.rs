//! The fetch primitive used by strategies, install and sync.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::{Error, Result};
use crate::http::{Headers, Request, Response};

/// Something that can perform a request over the network.
///
/// Any response the remote sends back, whatever its status, is `Ok`. `Err`
/// is reserved for the request never completing (connection refused, DNS
/// failure, aborted transfer), reported as `Error::NetworkUnavailable`.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// `reqwest`-backed network.
///
/// No client-side timeout is set; callers that need bounded latency wrap
/// calls in their own timeout.
#[derive(Clone)]
pub struct HttpNetwork {
  client: Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = Client::builder()
      .user_agent(concat!("swcache/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in request.headers.iter() {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(|e| {
      debug!(url = %request.url, error = %e, "Fetch rejected");
      Error::NetworkUnavailable(format!("{} {}: {}", request.method, request.url, e))
    })?;

    let status = response.status().as_u16();
    let headers: Headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v.to_string())))
      .collect();
    let body = response.bytes().await?.to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
