use serde::Deserialize;

/// The endpoints an ACME server advertises. Fetched once, when the
/// [`crate::Requester`] is built, and never mutated afterwards.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
  #[serde(rename = "newNonce")]
  pub new_nonce_url: String,
  #[serde(rename = "newAccount")]
  pub new_account_url: String,
  #[serde(rename = "newOrder")]
  pub new_order_url: String,
  #[serde(rename = "revokeCert")]
  pub revoke_cert_url: Option<String>,
  #[serde(rename = "keyChange")]
  pub key_change_url: Option<String>,
  #[serde(rename = "newAuthz")]
  pub new_authz_url: Option<String>,
  pub meta: Option<DirectoryMeta>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
  pub terms_of_service: Option<String>,
  pub website: Option<String>,
  pub caa_identities: Option<Vec<String>>,
  pub external_account_required: Option<bool>,
}
