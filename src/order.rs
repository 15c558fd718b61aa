use crate::account::Account;
use crate::authorization::Authorization;
use crate::error::*;
use crate::helpers::*;
use crate::jws::Payload;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::X509Name;
use openssl::x509::X509Req;
use openssl::x509::X509;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing::field;
use tracing::instrument;
use tracing::Level;
use tracing::Span;

#[derive(Deserialize, Debug, Eq, PartialEq, Clone, Copy)]
#[serde(rename_all = "camelCase")]
/// The status of this order.  Possible values are "pending", "ready",
/// processing", "valid", and "invalid".
pub enum OrderStatus {
  Pending,
  Ready,
  Processing,
  Valid,
  Invalid,
}

/// Where this client is in driving the order.
///
/// `Valid` is the terminal success. `Invalid` means the server gave up on
/// the order; `Errored` means a step failed on our side of the exchange
/// and the order may be resumed with [`Order::poll`].
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum OrderState {
  Created,
  Authorizing,
  Finalizing,
  Valid,
  Invalid,
  Errored,
}

impl Default for OrderState {
  fn default() -> Self {
    OrderState::Created
  }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
/// An ACME order object represents a client's request for a certificate
/// and is used to track the progress of that order through to issuance.
pub struct Order {
  #[serde(skip)]
  pub(crate) account: Option<Arc<Account>>,
  #[serde(skip)]
  pub url: String,
  #[serde(skip)]
  pub state: OrderState,

  /// The status of this order.
  pub status: OrderStatus,
  /// The timestamp after which the server will consider this order
  /// invalid.
  pub expires: Option<String>,
  /// An array of identifier objects that the order pertains to.
  pub identifiers: Vec<Identifier>,
  /// The requested value of the notBefore field in the certificate.
  pub not_before: Option<String>,
  /// The requested value of the notAfter field in the certificate.
  pub not_after: Option<String>,

  /// The error that occurred while processing the order, if any.
  pub error: Option<ServerError>,

  #[serde(rename = "authorizations")]
  /// For pending orders, the authorizations that the client needs to
  /// complete before the requested certificate can be issued. For
  /// final orders (in the "valid" or "invalid" state), the
  /// authorizations that were completed.
  ///
  /// The server does not promise that this list lines up with
  /// `identifiers`; [`Order::authorize`] reorders it as it learns the
  /// actual mapping.
  pub authorization_urls: Vec<String>,
  #[serde(rename = "finalize")]
  /// A URL that a CSR must be POSTed to once all of the order's
  /// authorizations are satisfied to finalize the order.
  pub finalize_url: String,
  #[serde(rename = "certificate")]
  /// A URL for the certificate that has been issued in response to
  /// this order.
  pub certificate_url: Option<String>,
}

#[derive(Debug)]
pub struct OrderBuilder {
  account: Arc<Account>,

  identifiers: Vec<Identifier>,
}

impl OrderBuilder {
  pub fn new(account: Arc<Account>) -> Self {
    OrderBuilder {
      account,
      identifiers: vec![],
    }
  }

  pub fn set_identifiers(&mut self, identifiers: Vec<Identifier>) -> &mut Self {
    self.identifiers = identifiers;
    self
  }

  pub fn add_dns_identifier(&mut self, fqdn: String) -> &mut Self {
    self.identifiers.push(Identifier::dns(fqdn));
    self
  }

  /// Submits the order. A 409 is accepted too: the server matched an
  /// existing order for the same identifiers and returned that one.
  #[instrument(level = Level::INFO, name = "acme2_http01::OrderBuilder::build", err, skip(self), fields(identifiers = ?self.identifiers, order = field::Empty))]
  pub async fn build(&mut self) -> Result<Order, Error> {
    if self.identifiers.is_empty() {
      return Err(Error::Input("an order needs at least one identifier"));
    }
    if self.identifiers.iter().any(|i| i.value.trim().is_empty()) {
      return Err(Error::Input("order identifiers must not be empty"));
    }

    let dir = self.account.requester()?.directory().await?;

    let resp = self
      .account
      .send(
        &dir.new_order_url,
        &Payload::Json(json!({
          "identifiers": self.identifiers,
        })),
      )
      .await?
      .expect_status("newOrder", &[201, 409])?;

    let order_url = resp
      .location()
      .ok_or_else(|| {
        Error::protocol(
          "newOrder response has no location header",
          resp.status.as_u16(),
          &resp.body,
        )
      })?
      .to_string();
    Span::current().record("order", &field::display(&order_url));

    let mut order: Order = resp.body_as("newOrder")?;
    order.account = Some(self.account.clone());
    order.url = order_url;
    order.state = OrderState::Created;
    order.track_status();

    Ok(order)
  }
}

pub enum Csr {
  /// Generate a CSR for all identifiers of the order with this key.
  Automatic(PKey<Private>),
  Custom(X509Req),
  /// A PEM encoded `CERTIFICATE REQUEST`.
  Pem(String),
  Der(Vec<u8>),
}

fn gen_csr(
  pkey: &PKey<openssl::pkey::Private>,
  domains: Vec<String>,
) -> Result<X509Req, Error> {
  if domains.is_empty() {
    return Err(Error::Input("You need to supply at least one domain name"));
  }

  let mut builder = X509Req::builder()?;
  let name = {
    let mut name = X509Name::builder()?;
    name.append_entry_by_text("CN", &domains[0])?;
    name.build()
  };
  builder.set_subject_name(&name)?;

  // Add all domains as SANs
  let san_extension = {
    let mut san = SubjectAlternativeName::new();
    for domain in domains.iter() {
      san.dns(domain);
    }
    san.build(&builder.x509v3_context(None))?
  };
  let mut stack = Stack::new()?;
  stack.push(san_extension)?;
  builder.add_extensions(&stack)?;

  builder.set_pubkey(&pkey)?;
  builder.sign(pkey, MessageDigest::sha256())?;

  Ok(builder.build())
}

/// An issued certificate as downloaded from the CA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
  /// The response body, unchanged.
  pub full_chain: String,
  /// The end-entity certificate, PEM encoded.
  pub leaf: String,
  /// The issuer chain, PEM encoded. Empty if the CA sent only the leaf.
  pub chain: String,
}

impl Certificate {
  pub fn from_full_chain(full_chain: String) -> Option<Certificate> {
    let mut parts = split_full_chain(&full_chain).into_iter();
    let leaf = parts.next()?;
    let chain = parts.collect::<Vec<_>>().concat();
    Some(Certificate {
      full_chain,
      leaf,
      chain,
    })
  }

  /// Parses the full chain, leaf first.
  pub fn x509(&self) -> Result<Vec<X509>, Error> {
    Ok(X509::stack_from_pem(self.full_chain.as_bytes())?)
  }
}

impl Order {
  /// Loads an existing order by URL, e.g. to resume after a failure.
  #[instrument(level = Level::INFO, name = "acme2_http01::Order::load", err, skip(account))]
  pub async fn load(account: Arc<Account>, url: &str) -> Result<Order, Error> {
    let resp = account
      .send(url, &Payload::Empty)
      .await?
      .expect_status("order", &[200])?;
    let mut order: Order = resp.body_as("order")?;
    order.account = Some(account);
    order.url = url.to_string();
    order.track_status();
    Ok(order)
  }

  fn account(&self) -> Result<Arc<Account>, Error> {
    self
      .account
      .clone()
      .ok_or(Error::Input("order is not bound to an account"))
  }

  /// DNS names compare case-insensitively; CAs usually lowercase them.
  fn position_of(&self, domain: &str) -> Option<usize> {
    self
      .identifiers
      .iter()
      .position(|i| i.value.eq_ignore_ascii_case(domain))
  }

  pub(crate) fn invalid(&self) -> Error {
    Error::OrderInvalid {
      url: self.url.clone(),
      error: self.error.clone(),
    }
  }

  /// Moves the local state along with the server status.
  fn track_status(&mut self) {
    match self.status {
      OrderStatus::Valid => self.state = OrderState::Valid,
      OrderStatus::Invalid => self.state = OrderState::Invalid,
      OrderStatus::Processing => self.state = OrderState::Finalizing,
      OrderStatus::Pending | OrderStatus::Ready => {
        if self.state == OrderState::Errored {
          self.state = OrderState::Authorizing;
        }
      }
    }
  }

  /// Input errors never reached the server and leave the order untouched.
  fn track_result<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
    if let Err(err) = &result {
      if !matches!(err, Error::Input(_)) {
        self.state = OrderState::Errored;
      }
    }
    result
  }

  /// Takes the server's view of the order, keeping the reconciled
  /// authorization mapping when the server still lists the same URLs.
  fn absorb(&mut self, fresh: Order) {
    let mut known = self.authorization_urls.clone();
    let mut incoming = fresh.authorization_urls.clone();
    known.sort();
    incoming.sort();
    if known != incoming {
      self.authorization_urls = fresh.authorization_urls;
    }

    self.status = fresh.status;
    self.expires = fresh.expires;
    self.not_before = fresh.not_before;
    self.not_after = fresh.not_after;
    self.error = fresh.error;
    self.finalize_url = fresh.finalize_url;
    self.certificate_url = fresh.certificate_url;
    self.track_status();
  }

  /// Fetches the authorization for `domain`.
  ///
  /// The authorization list is not guaranteed to be in identifier order.
  /// When the fetched authorization names another identifier, its URL is
  /// swapped into that identifier's slot and the lookup is repeated. Every
  /// swap puts one URL in its final place, so the loop ends after at most
  /// one swap per identifier.
  #[instrument(level = Level::INFO, name = "acme2_http01::Order::authorize", err, skip(self), fields(order = %self.url, swaps = field::Empty))]
  pub async fn authorize(
    &mut self,
    domain: &str,
  ) -> Result<Authorization, Error> {
    if self.identifiers.is_empty() {
      return Err(Error::Input("order has no identifiers to authorize"));
    }
    let position = self
      .position_of(domain)
      .ok_or(Error::Input("domain is not part of the order"))?;
    if self.authorization_urls.len() != self.identifiers.len() {
      return Err(Error::Input(
        "order does not list one authorization per identifier",
      ));
    }

    let result = self.resolve_authorization(domain, position).await;
    let authorization = self.track_result(result)?;
    if self.state == OrderState::Created {
      self.state = OrderState::Authorizing;
    }
    Ok(authorization)
  }

  async fn resolve_authorization(
    &mut self,
    domain: &str,
    position: usize,
  ) -> Result<Authorization, Error> {
    let account = self.account()?;
    let mut swaps = 0;

    loop {
      let url = self.authorization_urls[position].clone();
      let resp = account
        .send(&url, &Payload::Empty)
        .await?
        .expect_status("authorization", &[200, 201])?;
      let mut authorization: Authorization =
        resp.body_as("authorization")?;

      let found = authorization.identifier.value.clone();
      if found.eq_ignore_ascii_case(domain) {
        authorization.bind(&account, &url);
        Span::current().record("swaps", &swaps);
        return Ok(authorization);
      }

      let reconciliation = || Error::Reconciliation {
        requested: domain.to_string(),
        found: found.clone(),
      };
      if swaps >= self.identifiers.len() {
        return Err(reconciliation());
      }
      let actual = self.position_of(&found).ok_or_else(reconciliation)?;

      debug!(
        { requested = %domain, found = %found, url = %url },
        "Authorization list out of order. Swapping and retrying."
      );
      self.authorization_urls.swap(position, actual);
      swaps += 1;
    }
  }

  /// Fetches the authorization of every identifier, in identifier order.
  pub async fn authorizations(&mut self) -> Result<Vec<Authorization>, Error> {
    let domains = self
      .identifiers
      .iter()
      .map(|i| i.value.clone())
      .collect::<Vec<_>>();

    let mut authorizations = vec![];
    for domain in domains {
      authorizations.push(self.authorize(&domain).await?);
    }
    Ok(authorizations)
  }

  /// Submits the CSR. Every authorization must be valid by now.
  ///
  /// The certificate URL becomes available once the order is `valid`. Some
  /// CAs report that in the finalize response already; otherwise use
  /// [`Order::wait_done`].
  #[instrument(level = Level::INFO, name = "acme2_http01::Order::finalize", err, skip(self, csr), fields(order = %self.url, status = field::Empty))]
  pub async fn finalize(&mut self, csr: Csr) -> Result<(), Error> {
    if self.finalize_url.is_empty() {
      return Err(Error::Input("order has no finalize URL"));
    }
    if self.status == OrderStatus::Invalid {
      self.state = OrderState::Invalid;
      return Err(self.invalid());
    }

    let csr_der = match csr {
      Csr::Automatic(pkey) => gen_csr(
        &pkey,
        self
          .identifiers
          .iter()
          .map(|f| f.value.clone())
          .collect::<Vec<_>>(),
      )?
      .to_der()?,
      Csr::Custom(csr) => csr.to_der()?,
      Csr::Pem(pem) => pem_to_der(&pem)?,
      Csr::Der(der) => der,
    };

    self.state = OrderState::Finalizing;
    let result = self.submit_csr(&b64(&csr_der)).await;
    self.track_result(result)?;
    Span::current().record("status", &field::debug(&self.status));
    Ok(())
  }

  async fn submit_csr(&mut self, csr_b64: &str) -> Result<(), Error> {
    let account = self.account()?;
    let resp = account
      .send(&self.finalize_url, &Payload::Json(json!({ "csr": csr_b64 })))
      .await?
      .expect_status("finalize", &[200, 202])?;
    let fresh: Order = resp.body_as("finalize")?;
    self.absorb(fresh);
    Ok(())
  }

  /// Downloads the certificate, if the order has one yet.
  #[instrument(level = Level::INFO, name = "acme2_http01::Order::certificate", err, skip(self), fields(order = %self.url))]
  pub async fn certificate(&self) -> Result<Option<Certificate>, Error> {
    let certificate_url = match self.certificate_url.clone() {
      Some(certificate_url) => certificate_url,
      None => return Ok(None),
    };

    let account = self.account()?;
    let resp = account
      .send(&certificate_url, &Payload::Empty)
      .await?
      .expect_status("certificate", &[200])?;

    match Certificate::from_full_chain(resp.text()) {
      Some(cert) => Ok(Some(cert)),
      None => Err(Error::protocol(
        "certificate response contains no PEM document",
        resp.status.as_u16(),
        &resp.body,
      )),
    }
  }

  #[instrument(level = Level::DEBUG, name = "acme2_http01::Order::poll", err, skip(self), fields(order = %self.url, status = field::Empty))]
  pub async fn poll(&mut self) -> Result<(), Error> {
    let account = self.account()?;
    let result = async {
      account
        .send(&self.url, &Payload::Empty)
        .await?
        .expect_status("order poll", &[200])?
        .body_as::<Order>("order poll")
    }
    .await;
    let fresh = self.track_result(result)?;
    self.absorb(fresh);
    Span::current().record("status", &field::debug(&self.status));
    Ok(())
  }

  /// Polls while the order is `pending`, at most `attempts` times.
  pub async fn wait_ready(
    &mut self,
    poll_interval: Duration,
    attempts: usize,
  ) -> Result<(), Error> {
    self
      .wait_while(poll_interval, attempts, |status| {
        status == OrderStatus::Pending
      })
      .await
  }

  /// Polls until the order is `valid` or `invalid`, at most `attempts`
  /// times.
  pub async fn wait_done(
    &mut self,
    poll_interval: Duration,
    attempts: usize,
  ) -> Result<(), Error> {
    self
      .wait_while(poll_interval, attempts, |status| {
        status == OrderStatus::Pending
          || status == OrderStatus::Ready
          || status == OrderStatus::Processing
      })
      .await
  }

  async fn wait_while(
    &mut self,
    poll_interval: Duration,
    attempts: usize,
    pending: impl Fn(OrderStatus) -> bool,
  ) -> Result<(), Error> {
    let mut i: usize = 0;

    while pending(self.status) {
      if i >= attempts {
        return Err(Error::MaxAttemptsExceeded);
      }

      debug!(
        { delay = ?poll_interval, status = ?self.status },
        "Order not done. Waiting to poll."
      );
      tokio::time::sleep(poll_interval).await;
      self.poll().await?;

      i += 1;
    }

    Ok(())
  }
}
