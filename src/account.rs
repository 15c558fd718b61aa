use crate::error::*;
use crate::jws::eab_jws;
use crate::jws::Payload;
use crate::requester::Requester;
use crate::transport::HttpResponse;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::field;
use tracing::instrument;
use tracing::Level;
use tracing::Span;

/// The status of an [`Account`]. `Deactivated` is client initiated,
/// `Revoked` server initiated.
#[derive(Deserialize, Eq, PartialEq, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub enum AccountStatus {
  Valid,
  Deactivated,
  Revoked,
}

#[derive(Debug, Clone)]
pub(crate) struct ExternalAccountBinding {
  key_id: String,
  /// The MAC key the CA handed out with `key_id`.
  private_key: PKey<Private>,
}

/// A registered account, bound to the [`Requester`] that signs its requests.
///
/// Created through an [`AccountBuilder`] or [`crate::Client::register`].
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Account {
  #[serde(skip)]
  pub(crate) requester: Option<Arc<Requester>>,

  #[serde(skip)]
  /// The account ID of this account. This is the key identifier (`kid`)
  /// every later request is signed with.
  pub id: String,

  /// The status of this account.
  pub status: AccountStatus,
  /// An array of URLs that the server can use to contact the client for
  /// issues related to this account.
  pub contact: Option<Vec<String>>,
  /// Including this field in a newAccount request, with a value of true,
  /// indicates the client's agreement with the terms of service.
  pub terms_of_service_agreed: Option<bool>,
  /// A URL from which a list of orders submitted by this account can be
  /// fetched.
  #[serde(rename = "orders")]
  pub orders_url: Option<String>,
}

/// Registers the requester's account key, or looks up the account already
/// registered for it.
#[derive(Debug)]
pub struct AccountBuilder {
  requester: Arc<Requester>,

  eab_config: Option<ExternalAccountBinding>,

  contact: Option<Vec<String>>,
  terms_of_service_agreed: Option<bool>,
  only_return_existing: Option<bool>,
}

impl AccountBuilder {
  pub fn new(requester: Arc<Requester>) -> Self {
    AccountBuilder {
      requester,
      eab_config: None,
      contact: None,
      terms_of_service_agreed: None,
      only_return_existing: None,
    }
  }

  pub fn external_account_binding(
    &mut self,
    key_id: String,
    private_key: PKey<Private>,
  ) -> &mut Self {
    self.eab_config = Some(ExternalAccountBinding {
      key_id,
      private_key,
    });
    self
  }

  /// Contact URLs, e.g. `mailto:` addresses. Which schemes are accepted is
  /// up to the CA.
  pub fn contact(&mut self, contact: Vec<String>) -> &mut Self {
    self.contact = Some(contact);
    self
  }

  /// Shorthand for a single `mailto:` contact.
  pub fn email(&mut self, email: &str) -> &mut Self {
    self.contact(vec![format!("mailto:{}", email)])
  }

  pub fn terms_of_service_agreed(
    &mut self,
    terms_of_service_agreed: bool,
  ) -> &mut Self {
    self.terms_of_service_agreed = Some(terms_of_service_agreed);
    self
  }

  /// Fail instead of creating an account when the key is unknown.
  pub fn only_return_existing(
    &mut self,
    only_return_existing: bool,
  ) -> &mut Self {
    self.only_return_existing = Some(only_return_existing);
    self
  }

  /// The request is signed with the requester's account key and carries the
  /// full public key. A 201 means the account was created, a 200 that the
  /// key was already registered.
  #[instrument(level = Level::INFO, name = "acme2_http01::AccountBuilder::build", err, skip(self), fields(contact = ?self.contact, terms_of_service_agreed = ?self.terms_of_service_agreed, only_return_existing = ?self.only_return_existing, account_id = field::Empty))]
  pub async fn build(&mut self) -> Result<Arc<Account>, Error> {
    if let Some(contact) = &self.contact {
      if contact.iter().any(|c| c.trim().is_empty() || c == "mailto:") {
        return Err(Error::Input("account contact must not be empty"));
      }
    }

    let directory = self.requester.directory().await?;
    let url = directory.new_account_url.clone();

    let mut payload = json!({
      "termsOfServiceAgreed": self.terms_of_service_agreed.unwrap_or(false),
      "onlyReturnExisting": self.only_return_existing.unwrap_or(false),
    });
    if let Some(contact) = &self.contact {
      payload["contact"] = json!(contact);
    }
    if let Some(eab_config) = &self.eab_config {
      let jwk = self.requester.key().jwk()?;
      let binding =
        eab_jws(&url, &eab_config.key_id, &eab_config.private_key, &jwk)?;
      payload["externalAccountBinding"] = serde_json::to_value(binding)?;
    }

    let resp = self
      .requester
      .send(&url, &Payload::Json(payload), None)
      .await?
      .expect_status("newAccount", &[200, 201])?;

    let account_id = resp
      .location()
      .ok_or_else(|| {
        Error::protocol(
          "newAccount response has no location header",
          resp.status.as_u16(),
          &resp.body,
        )
      })?
      .to_string();
    Span::current().record("account_id", &field::display(&account_id));

    let mut acc: Account = resp.body_as("newAccount")?;
    acc.requester = Some(self.requester.clone());
    acc.id = account_id;
    Ok(Arc::new(acc))
  }
}

impl Account {
  pub(crate) fn requester(&self) -> Result<&Arc<Requester>, Error> {
    self
      .requester
      .as_ref()
      .ok_or(Error::Input("account is not bound to a requester"))
  }

  /// Sends a request signed with this account's key identifier.
  pub(crate) async fn send(
    &self,
    url: &str,
    payload: &Payload,
  ) -> Result<HttpResponse, Error> {
    self.requester()?.send(url, payload, Some(&self.id)).await
  }

  /// The http-01 key authorization suffix for this account.
  pub fn thumbprint(&self) -> Result<String, Error> {
    self.requester()?.thumbprint()
  }
}
