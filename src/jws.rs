use crate::error::*;
use crate::helpers::*;
use crate::key::AccountKey;
use crate::key::Jwk;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::sign::Signer;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub(crate) struct JwsHeader {
  pub alg: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub kid: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub jwk: Option<Jwk>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub nonce: Option<String>,
  pub url: String,
}

/// The flattened JWS JSON serialization sent on the wire.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SignedEnvelope {
  pub protected: String,
  pub payload: String,
  pub signature: String,
}

/// What a signed request carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
  Json(Value),
  /// POST-as-GET: the payload is the empty string, not `"{}"`.
  Empty,
}

impl Payload {
  pub(crate) fn encode(&self) -> Result<String, Error> {
    match self {
      Payload::Json(value) => Ok(b64(serde_json::to_string(value)?.as_bytes())),
      Payload::Empty => Ok(String::new()),
    }
  }
}

impl From<Value> for Payload {
  fn from(value: Value) -> Self {
    Payload::Json(value)
  }
}

/// Builds and signs an envelope for `url`. Without a `kid` the full public
/// key is embedded, which is only acceptable for newAccount.
pub(crate) fn jws(
  url: &str,
  nonce: Option<String>,
  payload: &Payload,
  key: &dyn AccountKey,
  kid: Option<&str>,
) -> Result<SignedEnvelope, Error> {
  let mut header = JwsHeader {
    alg: key.algorithm().to_string(),
    nonce,
    url: url.to_string(),
    ..Default::default()
  };

  if let Some(kid) = kid {
    header.kid = Some(kid.to_string());
  } else {
    header.jwk = Some(key.jwk()?);
  }

  let protected_b64 = b64(serde_json::to_string(&header)?.as_bytes());
  let payload_b64 = payload.encode()?;

  let signature_b64 = b64(
    &key.sign(format!("{}.{}", protected_b64, payload_b64).as_bytes())?,
  );

  Ok(SignedEnvelope {
    protected: protected_b64,
    payload: payload_b64,
    signature: signature_b64,
  })
}

/// The external account binding: the account JWK signed with the CA issued
/// MAC key, embedded in the newAccount payload.
pub(crate) fn eab_jws(
  url: &str,
  key_id: &str,
  hmac_key: &PKey<Private>,
  account_jwk: &Jwk,
) -> Result<SignedEnvelope, Error> {
  let header = JwsHeader {
    alg: "HS256".to_string(),
    kid: Some(key_id.to_string()),
    url: url.to_string(),
    ..Default::default()
  };

  let protected_b64 = b64(serde_json::to_string(&header)?.as_bytes());
  let payload_b64 = b64(serde_json::to_string(account_jwk)?.as_bytes());

  let signature_b64 = {
    let mut signer = Signer::new(MessageDigest::sha256(), hmac_key)?;
    signer.update(format!("{}.{}", protected_b64, payload_b64).as_bytes())?;
    b64(&signer.sign_to_vec()?)
  };

  Ok(SignedEnvelope {
    protected: protected_b64,
    payload: payload_b64,
    signature: signature_b64,
  })
}
