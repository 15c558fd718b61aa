use crate::error::Error;
use data_encoding::BASE64URL_NOPAD;
use openssl::ec::EcGroup;
use openssl::ec::EcKey;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::rsa::Rsa;
use pem_rfc7468::LineEnding;
use serde::Deserialize;
use serde::Serialize;

const PEM_DOCUMENT_BEGIN: &str = "-----BEGIN";

/// This is a identifier for a resource that the ACME server
/// can provision certificates for (a domain).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
  /// The type of identifier.
  pub r#type: String,
  /// The identifier itself.
  pub value: String,
}

impl Identifier {
  pub fn dns(value: impl Into<String>) -> Self {
    Identifier {
      r#type: "dns".to_string(),
      value: value.into(),
    }
  }
}

/// Base64url without padding, as used throughout JOSE.
pub fn b64(data: &[u8]) -> String {
  BASE64URL_NOPAD.encode(data)
}

pub fn b64_decode(data: &str) -> Result<Vec<u8>, Error> {
  Ok(BASE64URL_NOPAD.decode(data.as_bytes())?)
}

/// Strips the PEM armor and returns the DER body.
pub fn pem_to_der(pem: &str) -> Result<Vec<u8>, Error> {
  let (_label, der) = pem_rfc7468::decode_vec(pem.trim().as_bytes())?;
  Ok(der)
}

pub fn der_to_pem(der: &[u8], label: &str) -> Result<String, Error> {
  Ok(pem_rfc7468::encode_string(label, LineEnding::LF, der)?)
}

/// Splits a full-chain PEM blob into its documents. The first entry is the
/// leaf certificate, the rest is the issuer chain.
pub fn split_full_chain(pem: &str) -> Vec<String> {
  pem
    .trim()
    .split(PEM_DOCUMENT_BEGIN)
    .filter(|doc| !doc.trim().is_empty())
    .map(|doc| format!("{}{}\n", PEM_DOCUMENT_BEGIN, doc.trim_end()))
    .collect()
}

/// Generate a new RSA private key using the specified size,
/// using the system random.
pub fn gen_rsa_private_key(bits: u32) -> Result<PKey<Private>, Error> {
  let rsa = Rsa::generate(bits)?;
  let key = PKey::from_rsa(rsa)?;
  Ok(key)
}

/// Generate a new P-256 private key using the system random.
pub fn gen_ec_p256_private_key() -> Result<PKey<Private>, Error> {
  let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
  let ec = EcKey::generate(&group)?;
  let key = PKey::from_ec_key(ec)?;
  Ok(key)
}
