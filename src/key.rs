use crate::error::*;
use crate::helpers::*;
use openssl::bn::BigNum;
use openssl::bn::BigNumContext;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::hash;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::Id;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::sign::Signer;
use serde::Deserialize;
use serde::Serialize;

/// P-256 coordinates and ES256 signature halves are 32 bytes wide.
const P256_FIELD_BYTES: i32 = 32;

/// A JSON Web Key holding only the members required for its key type.
///
/// Members are declared in lexicographic order, so the serialized form is
/// the canonical input of an RFC 7638 thumbprint.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Jwk {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub crv: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub e: Option<String>,
  pub kty: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub n: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub x: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub y: Option<String>,
}

impl Jwk {
  pub fn rsa(e: &[u8], n: &[u8]) -> Jwk {
    Jwk {
      crv: None,
      e: Some(b64(e)),
      kty: "RSA".to_string(),
      n: Some(b64(n)),
      x: None,
      y: None,
    }
  }

  pub fn ec_p256(x: &[u8], y: &[u8]) -> Jwk {
    Jwk {
      crv: Some("P-256".to_string()),
      e: None,
      kty: "EC".to_string(),
      n: None,
      x: Some(b64(x)),
      y: Some(b64(y)),
    }
  }

  /// The RFC 7638 thumbprint of this key.
  pub fn thumbprint(&self) -> Result<String, Error> {
    let canonical = serde_json::to_string(self)?;
    Ok(b64(&hash(MessageDigest::sha256(), canonical.as_bytes())?))
  }
}

/// The account key: everything the signed-request engine needs from it.
pub trait AccountKey: Send + Sync {
  /// The JWS `alg` value for signatures produced by [`AccountKey::sign`].
  fn algorithm(&self) -> &'static str;

  fn jwk(&self) -> Result<Jwk, Error>;

  fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error>;

  /// Stable identifier of the account key, used in http-01 key
  /// authorizations.
  fn thumbprint(&self) -> Result<String, Error> {
    self.jwk()?.thumbprint()
  }
}

/// An RSA or P-256 account key held by OpenSSL.
#[derive(Clone, Debug)]
pub struct PrivateKey {
  pkey: PKey<Private>,
}

impl PrivateKey {
  pub fn new(pkey: PKey<Private>) -> Result<Self, Error> {
    match pkey.id() {
      Id::RSA => Ok(PrivateKey { pkey }),
      Id::EC => {
        let curve = pkey.ec_key()?.group().curve_name();
        if curve == Some(Nid::X9_62_PRIME256V1) {
          Ok(PrivateKey { pkey })
        } else {
          Err(Error::Input("only P-256 EC account keys are supported"))
        }
      }
      _ => Err(Error::Input("account keys must be RSA or P-256")),
    }
  }

  pub fn from_pem(pem: &[u8]) -> Result<Self, Error> {
    Self::new(PKey::private_key_from_pem(pem)?)
  }

  /// A new P-256 key from the system random.
  pub fn generate() -> Result<Self, Error> {
    Self::new(gen_ec_p256_private_key()?)
  }

  pub fn pkey(&self) -> &PKey<Private> {
    &self.pkey
  }
}

impl AccountKey for PrivateKey {
  fn algorithm(&self) -> &'static str {
    match self.pkey.id() {
      Id::EC => "ES256",
      _ => "RS256",
    }
  }

  fn jwk(&self) -> Result<Jwk, Error> {
    match self.pkey.id() {
      Id::EC => {
        let ec = self.pkey.ec_key()?;
        let mut ctx = BigNumContext::new()?;
        let mut x = BigNum::new()?;
        let mut y = BigNum::new()?;
        ec.public_key().affine_coordinates_gfp(
          ec.group(),
          &mut x,
          &mut y,
          &mut ctx,
        )?;
        Ok(Jwk::ec_p256(
          &x.to_vec_padded(P256_FIELD_BYTES)?,
          &y.to_vec_padded(P256_FIELD_BYTES)?,
        ))
      }
      _ => {
        let rsa = self.pkey.rsa()?;
        Ok(Jwk::rsa(&rsa.e().to_vec(), &rsa.n().to_vec()))
      }
    }
  }

  fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut signer = Signer::new(MessageDigest::sha256(), &self.pkey)?;
    signer.update(data)?;
    let signature = signer.sign_to_vec()?;

    if self.pkey.id() != Id::EC {
      return Ok(signature);
    }

    // JWS wants the fixed width r || s form, not DER.
    let sig = EcdsaSig::from_der(&signature)?;
    let mut raw = sig.r().to_vec_padded(P256_FIELD_BYTES)?;
    raw.extend(sig.s().to_vec_padded(P256_FIELD_BYTES)?);
    Ok(raw)
  }
}
