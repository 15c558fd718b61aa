use crate::error::*;
use reqwest::header::HeaderMap;
use reqwest::header::LOCATION;
use reqwest::Method;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;

pub(crate) const REPLAY_NONCE: &str = "replay-nonce";

/// A single HTTP exchange, as handed to a [`Transport`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  pub url: String,
  pub headers: HeaderMap,
  pub body: Option<Vec<u8>>,
}

impl HttpRequest {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    HttpRequest {
      method,
      url: url.into(),
      headers: HeaderMap::new(),
      body: None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: StatusCode,
  /// Header names are case-insensitive.
  pub headers: HeaderMap,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(name).and_then(|hv| hv.to_str().ok())
  }

  /// The anti-replay token issued with this response, if any.
  pub fn nonce(&self) -> Option<&str> {
    self.header(REPLAY_NONCE)
  }

  pub fn location(&self) -> Option<&str> {
    self.headers.get(LOCATION).and_then(|hv| hv.to_str().ok())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
    Ok(serde_json::from_slice(&self.body)?)
  }

  /// Returns an [`Error::Protocol`] unless the status is one of `accepted`.
  pub(crate) fn expect_status(
    self,
    context: &'static str,
    accepted: &[u16],
  ) -> Result<Self, Error> {
    if accepted.contains(&self.status.as_u16()) {
      Ok(self)
    } else {
      Err(Error::protocol(context, self.status.as_u16(), &self.body))
    }
  }

  /// Decodes the body, reporting an undecodable body as a protocol error.
  pub(crate) fn body_as<T: DeserializeOwned>(
    &self,
    context: &'static str,
  ) -> Result<T, Error> {
    self
      .json()
      .map_err(|_| Error::protocol(context, self.status.as_u16(), &self.body))
  }
}

pub type TransportFuture<'a> =
  Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send + 'a>>;

/// Performs one HTTP call. Implementations must report network level
/// failures as [`Error::Transport`] and return every HTTP response,
/// whatever its status, as `Ok`.
pub trait Transport: Send + Sync + 'static {
  fn send(&self, request: HttpRequest) -> TransportFuture<'_>;
}

/// The default [`Transport`], backed by a [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new(client: reqwest::Client) -> Self {
    ReqwestTransport { client }
  }
}

impl Transport for ReqwestTransport {
  fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
    Box::pin(async move {
      let mut builder = self
        .client
        .request(request.method, &request.url)
        .headers(request.headers);
      if let Some(body) = request.body {
        builder = builder.body(body);
      }

      let resp = builder.send().await?;
      let status = resp.status();
      let headers = resp.headers().clone();
      let body = resp.bytes().await?.to_vec();

      Ok(HttpResponse {
        status,
        headers,
        body,
      })
    })
  }
}
