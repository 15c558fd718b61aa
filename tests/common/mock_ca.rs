use acme2_http01::*;
use anyhow::anyhow;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::header::LOCATION;
use reqwest::Method;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub const DIRECTORY_URL: &str = "https://ca/dir";
pub const NEW_NONCE_URL: &str = "https://ca/nonce";
pub const NEW_ACCOUNT_URL: &str = "https://ca/acct";
pub const NEW_ORDER_URL: &str = "https://ca/order";

/// A scripted response.
#[derive(Debug, Clone)]
pub struct Reply {
  status: u16,
  body: String,
  location: Option<String>,
  delay: Option<Duration>,
  nonce: bool,
}

impl Reply {
  pub fn new(status: u16, body: impl Into<String>) -> Self {
    Reply {
      status,
      body: body.into(),
      location: None,
      delay: None,
      nonce: true,
    }
  }

  pub fn json(status: u16, body: Value) -> Self {
    Reply::new(status, body.to_string())
  }

  pub fn bad_nonce() -> Self {
    Reply::json(
      400,
      serde_json::json!({
        "type": "urn:ietf:params:acme:error:badNonce",
        "detail": "JWS has an invalid anti-replay nonce",
        "status": 400,
      }),
    )
  }

  pub fn location(mut self, location: &str) -> Self {
    self.location = Some(location.to_string());
    self
  }

  pub fn delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn without_nonce(mut self) -> Self {
    self.nonce = false;
    self
  }
}

/// An in-memory CA. Every route answers from a queue of replies; the last
/// reply of a queue is repeated for any further request. Replies carry the
/// nonces `N0`, `N1`, ... in the order they are produced.
pub struct MockCa {
  routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
  issued: Mutex<usize>,
  requests: Mutex<Vec<HttpRequest>>,
}

impl MockCa {
  pub fn new() -> Self {
    let ca = MockCa {
      routes: Mutex::new(HashMap::new()),
      issued: Mutex::new(0),
      requests: Mutex::new(vec![]),
    };
    ca.route(
      Method::GET,
      DIRECTORY_URL,
      Reply::json(
        200,
        serde_json::json!({
          "newNonce": NEW_NONCE_URL,
          "newAccount": NEW_ACCOUNT_URL,
          "newOrder": NEW_ORDER_URL,
          "revokeCert": "https://ca/revoke",
          "keyChange": "https://ca/key-change",
          "meta": { "termsOfService": "https://ca/terms" },
        }),
      )
      .without_nonce(),
    );
    ca.route(Method::HEAD, NEW_NONCE_URL, Reply::new(200, ""));
    ca
  }

  /// Replaces the replies of a route.
  pub fn route(&self, method: Method, url: &str, reply: Reply) -> &Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert((method, url.to_string()), VecDeque::from(vec![reply]));
    self
  }

  /// Replaces the replies of a route with a sequence.
  pub fn script(&self, method: Method, url: &str, replies: Vec<Reply>) {
    self
      .routes
      .lock()
      .unwrap()
      .insert((method, url.to_string()), VecDeque::from(replies));
  }

  pub fn post(&self, url: &str, reply: Reply) -> &Self {
    self.route(Method::POST, url, reply)
  }

  pub fn requests(&self) -> Vec<HttpRequest> {
    self.requests.lock().unwrap().clone()
  }

  /// The signed requests, in the order they reached the CA.
  pub fn posts(&self) -> Vec<HttpRequest> {
    self
      .requests()
      .into_iter()
      .filter(|r| r.method == Method::POST)
      .collect()
  }

  pub fn posts_to(&self, url: &str) -> Vec<HttpRequest> {
    self.posts().into_iter().filter(|r| r.url == url).collect()
  }

  fn next_reply(&self, method: &Method, url: &str) -> Option<Reply> {
    let mut routes = self.routes.lock().unwrap();
    let queue = routes.get_mut(&(method.clone(), url.to_string()))?;
    if queue.len() > 1 {
      queue.pop_front()
    } else {
      queue.front().cloned()
    }
  }

  fn next_nonce(&self) -> String {
    let mut issued = self.issued.lock().unwrap();
    let nonce = format!("N{}", *issued);
    *issued += 1;
    nonce
  }
}

impl Transport for MockCa {
  fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
    let reply = self
      .next_reply(&request.method, &request.url)
      .unwrap_or_else(|| Reply::new(404, "no such route"));
    self.requests.lock().unwrap().push(request);

    Box::pin(async move {
      if let Some(delay) = reply.delay {
        tokio::time::sleep(delay).await;
      }

      let mut headers = HeaderMap::new();
      if reply.nonce {
        headers.insert(
          "replay-nonce",
          HeaderValue::from_str(&self.next_nonce()).unwrap(),
        );
      }
      if let Some(location) = &reply.location {
        headers.insert(LOCATION, HeaderValue::from_str(location).unwrap());
      }

      Ok(HttpResponse {
        status: StatusCode::from_u16(reply.status).unwrap(),
        headers,
        body: reply.body.into_bytes(),
      })
    })
  }
}

fn envelope(request: &HttpRequest) -> anyhow::Result<SignedEnvelope> {
  let body = request
    .body
    .as_ref()
    .ok_or_else(|| anyhow!("{} {} has no body", request.method, request.url))?;
  Ok(serde_json::from_slice(body)?)
}

pub fn decode(encoded: &str) -> anyhow::Result<Value> {
  Ok(serde_json::from_slice(&b64_decode(encoded)?)?)
}

/// The decoded protected header of a signed request.
pub fn protected(request: &HttpRequest) -> Value {
  decode(&envelope(request).unwrap().protected).unwrap()
}

/// The decoded payload of a signed request; `None` for POST-as-GET.
pub fn payload(request: &HttpRequest) -> Option<Value> {
  let encoded = envelope(request).unwrap().payload;
  if encoded.is_empty() {
    return None;
  }
  Some(decode(&encoded).unwrap())
}

pub fn nonce(request: &HttpRequest) -> String {
  protected(request)["nonce"].as_str().unwrap().to_string()
}
