use crate::directory::Directory;
use crate::error::*;
use crate::jws::jws;
use crate::jws::Payload;
use crate::jws::SignedEnvelope;
use crate::key::AccountKey;
use crate::key::PrivateKey;
use crate::transport::*;
use reqwest::header::HeaderValue;
use reqwest::header::ACCEPT;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::field;
use tracing::info_span;
use tracing::instrument;
use tracing::trace;
use tracing::warn;
use tracing::Level;
use tracing::Span;
use tracing_futures::Instrument;

const CONTENT_JOSE: &str = "application/jose+json";
const ACCEPT_JSON: &str = "application/json";

/// Bounds for the waits and retries the [`Requester`] performs on its own.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  /// First wait while the directory or the initial nonce is still in flight.
  pub nonce_backoff_initial: Duration,
  /// Cap for the doubling backoff.
  pub nonce_backoff_max: Duration,
  /// Total time a request waits for initialization before giving up.
  pub nonce_timeout: Duration,
  /// How often one logical request is re-sent after a `badNonce` rejection.
  pub bad_nonce_retries: usize,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    RetryPolicy {
      nonce_backoff_initial: Duration::from_millis(50),
      nonce_backoff_max: Duration::from_secs(2),
      nonce_timeout: Duration::from_secs(30),
      bad_nonce_retries: 1,
    }
  }
}

#[derive(Debug, Clone)]
enum Readiness<T> {
  Pending,
  Ready(T),
  Failed(String),
}

#[derive(Debug, Default)]
struct NonceSlot {
  current: Option<String>,
  /// Whether the nonce published by initialization has been consumed.
  seeded: bool,
}

pub struct RequesterBuilder {
  url: String,
  transport: Option<Arc<dyn Transport>>,
  key: Option<Arc<dyn AccountKey>>,
  policy: RetryPolicy,
}

impl RequesterBuilder {
  pub fn new(url: String) -> Self {
    RequesterBuilder {
      url,
      transport: None,
      key: None,
      policy: RetryPolicy::default(),
    }
  }

  /// Use a specific [`reqwest::Client`], e.g. one trusting a test CA root.
  pub fn http_client(&mut self, http_client: reqwest::Client) -> &mut Self {
    self.transport = Some(Arc::new(ReqwestTransport::new(http_client)));
    self
  }

  pub fn transport(&mut self, transport: Arc<dyn Transport>) -> &mut Self {
    self.transport = Some(transport);
    self
  }

  /// The key every request is signed with. This is the account key, not a
  /// certificate key.
  pub fn account_key(&mut self, key: Arc<dyn AccountKey>) -> &mut Self {
    self.key = Some(key);
    self
  }

  pub fn retry_policy(&mut self, policy: RetryPolicy) -> &mut Self {
    self.policy = policy;
    self
  }

  /// Creates the [`Requester`] and starts fetching the directory and the
  /// first nonce in the background. Must be called inside a tokio runtime.
  ///
  /// Without an account key a new P-256 key is generated.
  pub fn build(&mut self) -> Result<Arc<Requester>, Error> {
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
      Error::Initialization("no tokio runtime is running".to_string())
    })?;

    let transport = self
      .transport
      .clone()
      .unwrap_or_else(|| Arc::new(ReqwestTransport::default()));
    let key = match self.key.clone() {
      Some(key) => key,
      None => Arc::new(PrivateKey::generate()?),
    };

    let (directory_tx, directory_rx) = watch::channel(Readiness::Pending);
    let (nonce_tx, nonce_rx) = watch::channel(Readiness::Pending);

    let span = info_span!("acme2_http01::Requester::initialize", directory = %self.url);
    runtime.spawn(
      initialize(transport.clone(), self.url.clone(), directory_tx, nonce_tx)
        .instrument(span),
    );

    Ok(Arc::new(Requester {
      transport,
      key,
      policy: self.policy.clone(),
      directory: directory_rx,
      initial_nonce: nonce_rx,
      nonce: Mutex::new(NonceSlot::default()),
    }))
  }
}

async fn initialize(
  transport: Arc<dyn Transport>,
  url: String,
  directory_tx: watch::Sender<Readiness<Arc<Directory>>>,
  nonce_tx: watch::Sender<Readiness<String>>,
) {
  let directory = match fetch_directory(&*transport, &url).await {
    Ok(directory) => Arc::new(directory),
    Err(err) => {
      warn!(error = %err, "failed to fetch the directory");
      directory_tx.send_replace(Readiness::Failed(err.to_string()));
      nonce_tx.send_replace(Readiness::Failed(err.to_string()));
      return;
    }
  };
  let new_nonce_url = directory.new_nonce_url.clone();
  directory_tx.send_replace(Readiness::Ready(directory));
  debug!("directory ready");

  match fetch_nonce(&*transport, &new_nonce_url).await {
    Ok(nonce) => {
      debug!(%nonce, "initial nonce ready");
      nonce_tx.send_replace(Readiness::Ready(nonce));
    }
    Err(err) => {
      warn!(error = %err, "failed to fetch the initial nonce");
      nonce_tx.send_replace(Readiness::Failed(err.to_string()));
    }
  }
}

async fn fetch_directory(
  transport: &dyn Transport,
  url: &str,
) -> Result<Directory, Error> {
  let resp = transport
    .send(HttpRequest::new(Method::GET, url))
    .await?
    .expect_status("directory", &[200])?;
  resp.body_as("directory")
}

async fn fetch_nonce(
  transport: &dyn Transport,
  new_nonce_url: &str,
) -> Result<String, Error> {
  let resp = transport
    .send(HttpRequest::new(Method::HEAD, new_nonce_url))
    .await?
    .expect_status("newNonce", &[200, 204])?;
  match resp.nonce() {
    Some(nonce) => Ok(nonce.to_string()),
    None => Err(Error::NonceExhaustion(
      "newNonce response carried no Replay-Nonce header",
    )),
  }
}

fn signed_request(
  url: &str,
  envelope: &SignedEnvelope,
) -> Result<HttpRequest, Error> {
  let mut request = HttpRequest::new(Method::POST, url);
  request
    .headers
    .insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_JOSE));
  request
    .headers
    .insert(ACCEPT, HeaderValue::from_static(ACCEPT_JSON));
  request.body = Some(serde_json::to_vec(envelope)?);
  Ok(request)
}

fn is_bad_nonce(resp: &HttpResponse) -> bool {
  resp.status.is_client_error()
    && resp
      .json::<ServerError>()
      .map(|err| err.is_bad_nonce())
      .unwrap_or(false)
}

/// The signed-request engine.
///
/// A `Requester` owns the directory, the account key and the single nonce
/// slot. Every signed request goes through [`Requester::send`], which holds
/// the slot for the whole build-sign-send-capture sequence, so the nonce of
/// one response is always the nonce of the next request.
pub struct Requester {
  transport: Arc<dyn Transport>,
  key: Arc<dyn AccountKey>,
  policy: RetryPolicy,
  directory: watch::Receiver<Readiness<Arc<Directory>>>,
  initial_nonce: watch::Receiver<Readiness<String>>,
  nonce: Mutex<NonceSlot>,
}

impl fmt::Debug for Requester {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Requester")
      .field("policy", &self.policy)
      .field("directory", &*self.directory.borrow())
      .finish_non_exhaustive()
  }
}

impl Requester {
  /// The directory, once it has been fetched.
  pub async fn directory(&self) -> Result<Arc<Directory>, Error> {
    self
      .wait_ready(&self.directory, "timed out waiting for the directory")
      .await
  }

  pub fn key(&self) -> &Arc<dyn AccountKey> {
    &self.key
  }

  pub fn thumbprint(&self) -> Result<String, Error> {
    self.key.thumbprint()
  }

  pub fn retry_policy(&self) -> &RetryPolicy {
    &self.policy
  }

  /// Sends one signed request and returns the raw response, whatever its
  /// status. Only a `badNonce` rejection is handled here: the request is
  /// rebuilt with the newly issued nonce, up to
  /// [`RetryPolicy::bad_nonce_retries`] times.
  ///
  /// Without a `kid` the request is signed with the full JWK.
  #[instrument(level = Level::DEBUG, name = "acme2_http01::Requester::send", err, skip(self, url, payload, kid), fields(url = %url, kid = ?kid, status = field::Empty))]
  pub async fn send(
    &self,
    url: &str,
    payload: &Payload,
    kid: Option<&str>,
  ) -> Result<HttpResponse, Error> {
    let mut slot = self.nonce.lock().await;
    let mut bad_nonces = 0;

    loop {
      let nonce = self.acquire_nonce(&mut slot).await?;
      trace!(%nonce, "signing request");
      let envelope = jws(url, Some(nonce), payload, &*self.key, kid)?;
      let request = signed_request(url, &envelope)?;

      let resp = self.transport.send(request).await?;
      slot.current = resp.nonce().map(str::to_string);
      Span::current().record("status", &field::display(resp.status));

      if is_bad_nonce(&resp) {
        if bad_nonces < self.policy.bad_nonce_retries {
          bad_nonces += 1;
          debug!(attempt = bad_nonces, "nonce rejected, retrying");
          continue;
        }
        return Err(Error::protocol(
          "badNonce retries exhausted",
          resp.status.as_u16(),
          &resp.body,
        ));
      }

      return Ok(resp);
    }
  }

  async fn acquire_nonce(&self, slot: &mut NonceSlot) -> Result<String, Error> {
    if let Some(nonce) = slot.current.take() {
      return Ok(nonce);
    }

    if !slot.seeded {
      match self
        .wait_ready(
          &self.initial_nonce,
          "timed out waiting for the initial nonce",
        )
        .await
      {
        Ok(nonce) => {
          slot.seeded = true;
          return Ok(nonce);
        }
        Err(Error::Initialization(reason)) => {
          slot.seeded = true;
          debug!(%reason, "initial nonce unavailable");
        }
        Err(err) => return Err(err),
      }
    }

    let directory = self.directory().await?;
    debug!("requesting a new nonce");
    fetch_nonce(&*self.transport, &directory.new_nonce_url).await
  }

  /// Waits for an initialization result with a doubling backoff, bounded by
  /// [`RetryPolicy::nonce_timeout`].
  async fn wait_ready<T: Clone>(
    &self,
    rx: &watch::Receiver<Readiness<T>>,
    timeout_reason: &'static str,
  ) -> Result<T, Error> {
    let mut rx = rx.clone();
    let started = Instant::now();
    let mut backoff = self.policy.nonce_backoff_initial;

    loop {
      let state = rx.borrow_and_update().clone();
      match state {
        Readiness::Ready(value) => return Ok(value),
        Readiness::Failed(reason) => return Err(Error::Initialization(reason)),
        Readiness::Pending => {}
      }

      let elapsed = started.elapsed();
      if elapsed >= self.policy.nonce_timeout {
        return Err(Error::NonceExhaustion(timeout_reason));
      }

      let wait = backoff.min(self.policy.nonce_timeout - elapsed);
      trace!(?wait, "initialization pending");
      if let Ok(Err(_)) = tokio::time::timeout(wait, rx.changed()).await {
        return Err(Error::Initialization(
          "initialization ended without a result".to_string(),
        ));
      }
      backoff = (backoff * 2).min(self.policy.nonce_backoff_max);
    }
  }
}
