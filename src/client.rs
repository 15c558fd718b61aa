use crate::account::Account;
use crate::account::AccountBuilder;
use crate::authorization::AuthorizationStatus;
use crate::authorization::Challenge;
use crate::authorization::ChallengeStatus;
use crate::authorization::Http01Challenge;
use crate::authorization::HTTP_01;
use crate::error::*;
use crate::order::Certificate;
use crate::order::Csr;
use crate::order::Order;
use crate::order::OrderBuilder;
use crate::order::OrderStatus;
use crate::requester::Requester;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing::instrument;
use tracing::Level;

/// Sequences the steps of an http-01 issuance.
///
/// The client holds no account or order state of its own; every step takes
/// and returns the handles it works on, so several accounts and orders can
/// be driven through one [`Requester`].
#[derive(Debug, Clone)]
pub struct Client {
  requester: Arc<Requester>,
}

impl Client {
  pub fn new(requester: Arc<Requester>) -> Self {
    Client { requester }
  }

  pub fn requester(&self) -> &Arc<Requester> {
    &self.requester
  }

  /// Registers the account key, agreeing to the terms of service.
  pub async fn register(&self, email: &str) -> Result<Arc<Account>, Error> {
    if email.trim().is_empty() {
      return Err(Error::Input("an email address is required to register"));
    }

    AccountBuilder::new(self.requester.clone())
      .email(email)
      .terms_of_service_agreed(true)
      .only_return_existing(false)
      .build()
      .await
  }

  pub async fn start_order(
    &self,
    account: &Arc<Account>,
    domains: &[&str],
  ) -> Result<Order, Error> {
    let mut builder = OrderBuilder::new(account.clone());
    for domain in domains {
      builder.add_dns_identifier(domain.to_string());
    }
    builder.build().await
  }

  /// Fetches the authorization for `domain` and picks its http-01
  /// challenge.
  pub async fn request_authorization(
    &self,
    order: &mut Order,
    domain: &str,
  ) -> Result<Http01Challenge, Error> {
    let authorization = order.authorize(domain).await?;
    authorization.http01()
  }

  /// Asks the CA to validate the challenge. The key authorization must be
  /// served by then.
  pub async fn trigger_challenge(
    &self,
    challenge: &Http01Challenge,
  ) -> Result<Challenge, Error> {
    challenge.challenge.validate().await
  }

  pub async fn check_challenge(
    &self,
    challenge: &Http01Challenge,
  ) -> Result<ChallengeStatus, Error> {
    Ok(challenge.challenge.poll().await?.status)
  }

  /// Polls the challenge until it is `valid` or `invalid`.
  pub async fn wait_for_challenge(
    &self,
    challenge: &Http01Challenge,
    poll_interval: Duration,
    attempts: usize,
  ) -> Result<ChallengeStatus, Error> {
    let challenge = challenge.challenge.poll().await?;
    Ok(challenge.wait_done(poll_interval, attempts).await?.status)
  }

  /// Finalizes the order, waits for the certificate URL and downloads the
  /// certificate.
  #[instrument(level = Level::INFO, name = "acme2_http01::Client::request_certificate", err, skip(self, order, csr), fields(order = %order.url))]
  pub async fn request_certificate(
    &self,
    order: &mut Order,
    csr: Csr,
    poll_interval: Duration,
    attempts: usize,
  ) -> Result<Certificate, Error> {
    order.finalize(csr).await?;

    if order.certificate_url.is_none() {
      order.wait_done(poll_interval, attempts).await?;
    }
    if order.status == OrderStatus::Invalid {
      return Err(order.invalid());
    }

    match order.certificate().await? {
      Some(cert) => Ok(cert),
      None => Err(Error::protocol(
        "order is valid but lists no certificate",
        200,
        order.url.as_bytes(),
      )),
    }
  }

  /// Runs the whole flow for `domains`.
  ///
  /// `publish` is called with every http-01 challenge before it is
  /// triggered; it must make the key authorization reachable at the
  /// challenge path on the domain.
  #[instrument(level = Level::INFO, name = "acme2_http01::Client::issue", err, skip(self, account, csr, publish))]
  pub async fn issue<F>(
    &self,
    account: &Arc<Account>,
    domains: &[&str],
    csr: Csr,
    mut publish: F,
    poll_interval: Duration,
    attempts: usize,
  ) -> Result<Certificate, Error>
  where
    F: FnMut(&Http01Challenge) -> Result<(), Error>,
  {
    let mut order = self.start_order(account, domains).await?;
    info!(order = %order.url, "order created");

    for domain in domains {
      let authorization = order.authorize(domain).await?;
      if authorization.status == AuthorizationStatus::Valid {
        info!(%domain, "authorization already valid");
        continue;
      }

      let challenge = authorization.http01()?;
      if challenge.challenge.status != ChallengeStatus::Valid {
        publish(&challenge)?;
        let done = self
          .trigger_challenge(&challenge)
          .await?
          .wait_done(poll_interval, attempts)
          .await?;
        if done.status != ChallengeStatus::Valid {
          return Err(Error::ChallengeFailed {
            domain: challenge.domain.clone(),
            error: done.error,
          });
        }
      }

      // A valid challenge does not make the authorization valid at once.
      let authorization = authorization
        .poll()
        .await?
        .wait_done(poll_interval, attempts)
        .await?;
      if authorization.status != AuthorizationStatus::Valid {
        return Err(Error::ChallengeFailed {
          domain: challenge.domain.clone(),
          error: authorization.get_challenge(HTTP_01).and_then(|c| c.error),
        });
      }
      info!(%domain, "authorization valid");
    }

    order.wait_ready(poll_interval, attempts).await?;
    self
      .request_certificate(&mut order, csr, poll_interval, attempts)
      .await
  }
}
