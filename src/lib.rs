//! An async ACMEv2 client for issuing certificates through http-01
//! challenges.
//!
//! A [`Requester`] owns the directory, the account key and the nonce; every
//! signed request goes through it. [`Order`] tracks one certificate order,
//! and [`Client`] sequences registration, authorization, challenge
//! validation and finalization on top of both.

mod account;
mod authorization;
mod client;
mod directory;
mod error;
mod helpers;
mod jws;
mod key;
mod order;
mod requester;
mod transport;

pub use account::*;
pub use authorization::*;
pub use client::*;
pub use directory::*;
pub use error::Error;
pub use error::ServerError;
pub use helpers::*;
pub use jws::Payload;
pub use jws::SignedEnvelope;
pub use key::*;
pub use order::*;
pub use requester::*;
pub use transport::*;
