use crate::account::Account;
use crate::error::*;
use crate::helpers::Identifier;
use crate::jws::Payload;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing::field;
use tracing::instrument;
use tracing::Level;
use tracing::Span;

pub const HTTP_01: &str = "http-01";

const WELL_KNOWN_ACME_CHALLENGE: &str = "/.well-known/acme-challenge/";

#[derive(Deserialize, Debug, Eq, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
/// The status of this authorization. Possible values are "pending",
/// "valid", "invalid", "deactivated", "expired", and "revoked".
pub enum AuthorizationStatus {
  Pending,
  Valid,
  Invalid,
  Deactivated,
  Expired,
  Revoked,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
/// An ACME authorization object represents a server's authorization
/// for an account to represent an identifier.
pub struct Authorization {
  #[serde(skip)]
  pub(crate) account: Option<Arc<Account>>,
  #[serde(skip)]
  pub url: String,

  /// The identifier that the account is authorized to represent.
  pub identifier: Identifier,
  /// The status of this authorization.
  pub status: AuthorizationStatus,
  /// The timestamp after which the server will consider this
  /// authorization invalid.
  pub expires: Option<String>,
  /// For pending authorizations, the challenges that the client can
  /// fulfill in order to prove possession of the identifier. For
  /// valid authorizations, the challenge that was validated. For
  /// invalid authorizations, the challenge that was attempted and
  /// failed.
  pub challenges: Vec<Challenge>,
  pub wildcard: Option<bool>,
}

#[derive(Deserialize, Debug, Eq, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
/// The status of this challenge. Possible values are "pending",
/// "processing", "valid", and "invalid".
pub enum ChallengeStatus {
  Pending,
  Processing,
  Valid,
  Invalid,
}

impl ChallengeStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, ChallengeStatus::Valid | ChallengeStatus::Invalid)
  }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
  #[serde(skip)]
  pub(crate) account: Option<Arc<Account>>,

  #[serde(rename = "type")]
  /// The type of challenge encoded in the object.
  pub typ: String,
  /// The URL to which a response can be posted.
  pub url: String,
  /// The status of this challenge.
  pub status: ChallengeStatus,
  /// The time at which the server validated this challenge.
  pub validated: Option<String>,

  /// Error that occurred while the server was validating the
  /// challenge, if any.
  pub error: Option<ServerError>,

  /// A random value that uniquely identifies the challenge.
  pub token: Option<String>,
}

/// The path the CA fetches for an http-01 challenge.
pub fn http01_path(token: &str) -> String {
  format!("{}{}", WELL_KNOWN_ACME_CHALLENGE, token)
}

/// The body that must be served at [`http01_path`].
pub fn key_authorization(token: &str, thumbprint: &str) -> String {
  format!("{}.{}", token, thumbprint)
}

/// An http-01 challenge together with what has to be served for it.
#[derive(Debug, Clone)]
pub struct Http01Challenge {
  /// The identifier the challenge proves control of.
  pub domain: String,
  pub token: String,
  /// `/.well-known/acme-challenge/{token}`
  pub path: String,
  /// `{token}.{thumbprint}`
  pub key_authorization: String,
  pub challenge: Challenge,
}

impl Http01Challenge {
  pub fn new(
    domain: &str,
    challenge: Challenge,
    thumbprint: &str,
  ) -> Result<Self, Error> {
    let token = challenge
      .token
      .clone()
      .ok_or_else(|| Error::MissingChallenge {
        domain: domain.to_string(),
        typ: HTTP_01,
      })?;

    Ok(Http01Challenge {
      domain: domain.to_string(),
      path: http01_path(&token),
      key_authorization: key_authorization(&token, thumbprint),
      token,
      challenge,
    })
  }
}

impl Authorization {
  pub(crate) fn bind(&mut self, account: &Arc<Account>, url: &str) {
    self.account = Some(account.clone());
    self.url = url.to_string();
    for challenge in &mut self.challenges {
      challenge.account = Some(account.clone())
    }
  }

  fn account(&self) -> Result<&Arc<Account>, Error> {
    self
      .account
      .as_ref()
      .ok_or(Error::Input("authorization is not bound to an account"))
  }

  pub fn get_challenge(&self, typ: &str) -> Option<Challenge> {
    for challenge in &self.challenges {
      if challenge.typ == typ {
        return Some(challenge.clone());
      }
    }
    None
  }

  /// The http-01 challenge of this authorization, with its path and key
  /// authorization derived.
  pub fn http01(&self) -> Result<Http01Challenge, Error> {
    let challenge =
      self
        .get_challenge(HTTP_01)
        .ok_or_else(|| Error::MissingChallenge {
          domain: self.identifier.value.clone(),
          typ: HTTP_01,
        })?;
    let thumbprint = self.account()?.thumbprint()?;
    Http01Challenge::new(&self.identifier.value, challenge, &thumbprint)
  }

  #[instrument(level = Level::DEBUG, name = "acme2_http01::Authorization::poll", err, skip(self), fields(url = ?self.url, status = field::Empty))]
  pub async fn poll(&self) -> Result<Authorization, Error> {
    let account = self.account()?.clone();

    let resp = account
      .send(&self.url, &Payload::Empty)
      .await?
      .expect_status("authorization poll", &[200])?;
    let mut authorization: Authorization =
      resp.body_as("authorization poll")?;
    authorization.bind(&account, &self.url);
    Span::current().record("status", &field::debug(&authorization.status));
    Ok(authorization)
  }

  #[instrument(level = Level::INFO, name = "acme2_http01::Authorization::wait_done", err, skip(self), fields(url = ?self.url))]
  pub async fn wait_done(
    self,
    poll_interval: Duration,
    attempts: usize,
  ) -> Result<Authorization, Error> {
    let mut authorization = self;

    let mut i: usize = 0;

    while authorization.status == AuthorizationStatus::Pending {
      if i >= attempts {
        return Err(Error::MaxAttemptsExceeded);
      }

      debug!(
        { delay = ?poll_interval },
        "Authorization still pending. Waiting to poll."
      );
      tokio::time::sleep(poll_interval).await;
      authorization = authorization.poll().await?;

      i += 1;
    }

    Ok(authorization)
  }
}

impl Challenge {
  fn account(&self) -> Result<&Arc<Account>, Error> {
    self
      .account
      .as_ref()
      .ok_or(Error::Input("challenge is not bound to an account"))
  }

  /// Tells the server the challenge is ready to be checked.
  #[instrument(level = Level::INFO, name = "acme2_http01::Challenge::validate", err, skip(self), fields(url = ?self.url, status = field::Empty))]
  pub async fn validate(&self) -> Result<Challenge, Error> {
    let account = self.account()?.clone();

    let resp = account
      .send(&self.url, &Payload::Json(json!({})))
      .await?
      .expect_status("challenge trigger", &[200, 202])?;
    let mut challenge: Challenge = resp.body_as("challenge trigger")?;
    challenge.account = Some(account);
    Span::current().record("status", &field::debug(&challenge.status));

    Ok(challenge)
  }

  #[instrument(level = Level::DEBUG, name = "acme2_http01::Challenge::poll", err, skip(self), fields(url = ?self.url, status = field::Empty))]
  pub async fn poll(&self) -> Result<Challenge, Error> {
    let account = self.account()?.clone();

    let resp = account
      .send(&self.url, &Payload::Empty)
      .await?
      .expect_status("challenge poll", &[200, 202])?;
    let mut challenge: Challenge = resp.body_as("challenge poll")?;
    challenge.account = Some(account);
    Span::current().record("status", &field::debug(&challenge.status));
    Ok(challenge)
  }

  /// Polls until the challenge is `valid` or `invalid`, at most `attempts`
  /// times.
  #[instrument(level = Level::INFO, name = "acme2_http01::Challenge::wait_done", err, skip(self), fields(url = ?self.url))]
  pub async fn wait_done(
    self,
    poll_interval: Duration,
    attempts: usize,
  ) -> Result<Challenge, Error> {
    let mut challenge = self;

    let mut i: usize = 0;

    while !challenge.status.is_terminal() {
      if i >= attempts {
        return Err(Error::MaxAttemptsExceeded);
      }

      debug!(
        { delay = ?poll_interval, status = ?challenge.status },
        "Challenge not done. Waiting to poll."
      );
      tokio::time::sleep(poll_interval).await;
      challenge = challenge.poll().await?;

      i += 1;
    }

    Ok(challenge)
  }
}
