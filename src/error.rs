use serde::Deserialize;

const BAD_NONCE: &str = "urn:ietf:params:acme:error:badNonce";

#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The CA could not be reached, or the exchange failed below the ACME
  /// layer (DNS, TLS, connection reset, unreadable body).
  #[error(transparent)]
  Transport(Box<dyn std::error::Error + Send + Sync>),

  /// The CA answered with a status code that the current step does not
  /// accept, or with a body that could not be understood.
  #[error("{context}: unexpected response {status}: {body}")]
  Protocol {
    context: &'static str,
    status: u16,
    body: String,
  },

  /// No nonce became available in time for a signed request.
  #[error("no usable nonce: {0}")]
  NonceExhaustion(&'static str),

  /// An authorization named an identifier that is not part of the order, or
  /// the authorization list could not be aligned with the identifier list.
  #[error("authorization requested for {requested} names {found}, which cannot be reconciled with the order")]
  Reconciliation { requested: String, found: String },

  /// The caller supplied something that can never succeed. Nothing was sent.
  #[error("invalid input: {0}")]
  Input(&'static str),

  #[error("authorization for {domain} offers no {typ} challenge")]
  MissingChallenge { domain: String, typ: &'static str },

  #[error("challenge for {domain} failed validation")]
  ChallengeFailed {
    domain: String,
    error: Option<ServerError>,
  },

  #[error("order {url} is invalid")]
  OrderInvalid {
    url: String,
    error: Option<ServerError>,
  },

  /// Fetching the directory or the initial nonce failed.
  #[error("requester initialization failed: {0}")]
  Initialization(String),

  #[error("the maximum poll attempts have been exceeded")]
  MaxAttemptsExceeded,

  #[error(transparent)]
  Other(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub(crate) fn protocol(
    context: &'static str,
    status: u16,
    body: &[u8],
  ) -> Self {
    Error::Protocol {
      context,
      status,
      body: String::from_utf8_lossy(body).into_owned(),
    }
  }

  /// The status code carried by a [`Error::Protocol`] error.
  pub fn status(&self) -> Option<u16> {
    match self {
      Error::Protocol { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// Parses the body of a [`Error::Protocol`] error as an ACME problem
  /// document.
  pub fn server_error(&self) -> Option<ServerError> {
    match self {
      Error::Protocol { body, .. } => serde_json::from_str(body).ok(),
      _ => None,
    }
  }
}

impl From<reqwest::Error> for Error {
  fn from(err: reqwest::Error) -> Self {
    Self::Transport(Box::new(err))
  }
}

impl From<serde_json::Error> for Error {
  fn from(err: serde_json::Error) -> Self {
    Self::Other(Box::new(err))
  }
}

impl From<openssl::error::ErrorStack> for Error {
  fn from(err: openssl::error::ErrorStack) -> Self {
    Self::Other(Box::new(err))
  }
}

impl From<pem_rfc7468::Error> for Error {
  fn from(err: pem_rfc7468::Error) -> Self {
    Self::Other(Box::new(err))
  }
}

impl From<data_encoding::DecodeError> for Error {
  fn from(err: data_encoding::DecodeError) -> Self {
    Self::Other(Box::new(err))
  }
}

/// This is an error as returned by the ACME server.
#[derive(Deserialize, Debug, Clone, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("ServerError({}): {}: {}", r#type.clone().unwrap_or_default(), title.clone().unwrap_or_default(), detail.clone().unwrap_or_default())]
pub struct ServerError {
  /// The type of this error.
  pub r#type: Option<String>,
  /// The human readable title of this error.
  pub title: Option<String>,
  /// The status code of this error.
  pub status: Option<u16>,
  /// The human readable extra description for this error.
  pub detail: Option<String>,
}

impl ServerError {
  pub fn is_bad_nonce(&self) -> bool {
    self.r#type.as_deref() == Some(BAD_NONCE)
  }
}
