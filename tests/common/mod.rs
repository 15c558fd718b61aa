pub mod mock_ca;

use acme2_http01::*;
use mock_ca::*;
use serde_json::json;
use serde_json::Value;
use std::sync::Arc;

pub const ACCOUNT_URL: &str = "https://ca/acct/1";
pub const ORDER_URL: &str = "https://ca/order/1";
pub const FINALIZE_URL: &str = "https://ca/order/1/finalize";
pub const CERT_URL: &str = "https://ca/cert/1";

pub fn requester(ca: &Arc<MockCa>) -> Arc<Requester> {
  RequesterBuilder::new(DIRECTORY_URL.to_string())
    .transport(ca.clone())
    .build()
    .unwrap()
}

pub fn account_body() -> Value {
  json!({
    "status": "valid",
    "contact": ["mailto:a@b.com"],
    "termsOfServiceAgreed": true,
    "orders": "https://ca/acct/1/orders",
  })
}

/// Registers `a@b.com` against the CA.
pub async fn registered(ca: &Arc<MockCa>) -> (Client, Arc<Account>) {
  ca.post(
    NEW_ACCOUNT_URL,
    Reply::json(201, account_body()).location(ACCOUNT_URL),
  );
  let client = Client::new(requester(ca));
  let account = client.register("a@b.com").await.unwrap();
  (client, account)
}

pub fn order_body(status: &str, domains: &[&str], authz: &[String]) -> Value {
  let identifiers = domains
    .iter()
    .map(|d| json!({ "type": "dns", "value": d }))
    .collect::<Vec<_>>();
  json!({
    "status": status,
    "expires": "2026-10-24T00:00:00Z",
    "identifiers": identifiers,
    "authorizations": authz,
    "finalize": FINALIZE_URL,
  })
}

pub fn authz_url(token: &str) -> String {
  format!("https://ca/authz/{}", token)
}

pub fn challenge_url(token: &str) -> String {
  format!("https://ca/chall/{}", token)
}

/// A pending authorization for `domain` offering http-01 and dns-01.
pub fn authz_body(domain: &str, token: &str) -> Value {
  json!({
    "identifier": { "type": "dns", "value": domain },
    "status": "pending",
    "expires": "2026-10-24T00:00:00Z",
    "challenges": [
      {
        "type": "dns-01",
        "url": format!("https://ca/chall/dns-{}", token),
        "status": "pending",
        "token": format!("dns-{}", token),
      },
      {
        "type": "http-01",
        "url": challenge_url(token),
        "status": "pending",
        "token": token,
      },
    ],
  })
}

pub fn authz_with_status(domain: &str, token: &str, status: &str) -> Value {
  let mut body = authz_body(domain, token);
  body["status"] = json!(status);
  body
}

pub fn challenge_body(token: &str, status: &str) -> Value {
  json!({
    "type": "http-01",
    "url": challenge_url(token),
    "status": status,
    "token": token,
  })
}

/// Scripts newOrder for `domains`, listing `authz` as given.
pub async fn ordered(
  ca: &Arc<MockCa>,
  client: &Client,
  account: &Arc<Account>,
  domains: &[&str],
  authz: &[String],
) -> Order {
  ca.post(
    NEW_ORDER_URL,
    Reply::json(201, order_body("pending", domains, authz)).location(ORDER_URL),
  );
  client.start_order(account, domains).await.unwrap()
}

pub fn full_chain() -> String {
  let leaf = der_to_pem(b"leaf certificate", "CERTIFICATE").unwrap();
  let issuer = der_to_pem(b"issuer certificate", "CERTIFICATE").unwrap();
  format!("{}{}", leaf, issuer)
}
