//! Provisioning certificates from ACME (Automatic Certificate Management Environment) providers
//! such as [Let's Encrypt](https://letsencrypt.org/).
//!
//! It follows the [RFC 8555](https://datatracker.ietf.org/doc/html/rfc8555) spec, using ACME v2 to
//! issue/renew certificates. Requests are signed with an RSA account key (`RS256`).
//!
//! # Usage
//!
//! ```no_run
//! use acme::{order::issue::issue_certificate, AcmeClient, ClientConfig, DirectoryUrl};
//! # async fn run(solver: &dyn acme::solver::ChallengeSolver) -> acme::Result<()> {
//!
//! let client = AcmeClient::generate(DirectoryUrl::LetsEncryptStaging, ClientConfig::default())?;
//! client.initialize().await?;
//! client
//!     .resolve_account(vec!["mailto:admin@example.com".to_owned()], true)
//!     .await?;
//!
//! let key = acme::create_rsa_key(acme::DEFAULT_RSA_BITS)?;
//! let cert = issue_certificate(
//!     &client,
//!     &["example.com", "www.example.com"],
//!     solver,
//!     &key,
//!     &acme::Cancellation::never(),
//! )
//! .await?;
//!
//! println!("{}", cert.certificate());
//! # Ok(())
//! # }
//! ```
//!
//! # Domain Ownership
//!
//! Most website TLS certificates tries to prove ownership/control over the domain they are issued
//! for. For ACME, this means proving you control either:
//!
//! - a server answering HTTP requests for that domain;
//! - the DNS server answering name lookups against the domain.
//!
//! To use this library, there are points in the flow where you would need to modify either the web
//! server or DNS server before progressing to get the certificate. A [`ChallengeSolver`] does that
//! on behalf of [`issue_certificate`]; [`DnsSolver`] and [`HttpSolver`] cover the common cases.
//!
//! ## Multiple Domains
//!
//! When creating a new order, it's possible to provide multiple alt-names that will also be part of
//! the certificate. The ACME API requires you to prove ownership of each such domain. See
//! [`AcmeClient::authorizations`].
//!
//! # Rate Limits
//!
//! The ACME API provider Let's Encrypt uses [rate limits] to ensure the API is not being abused. It
//! might be tempting to put the polling intervals of [`ClientConfig`] really low, but balance this
//! against the real risk of having access cut off.
//!
//! ## Use Staging For Development!
//!
//! Especially take care to use the Let's Encrypt staging environment for development where the rate
//! limits are more relaxed. See [`DirectoryUrl::LetsEncryptStaging`].
//!
//! [`ChallengeSolver`]: crate::solver::ChallengeSolver
//! [`DnsSolver`]: crate::solver::DnsSolver
//! [`HttpSolver`]: crate::solver::HttpSolver
//! [`issue_certificate`]: crate::order::issue::issue_certificate
//! [rate limits]: https://letsencrypt.org/docs/rate-limits

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod acc;
mod cert;
mod client;
mod dir;
mod error;
mod jws;
mod req;
mod trans;
mod util;

pub mod api;
pub mod order;
pub mod poll;
pub mod solver;


pub use crate::{
    acc::RevocationReason,
    cert::{create_rsa_key, Certificate, DEFAULT_RSA_BITS},
    client::{AcmeClient, ClientConfig},
    dir::DirectoryUrl,
    error::{AcmeError, Error, ProblemKind, Result},
    poll::{cancellation, CancelHandle, Cancellation, PollPolicy},
    req::{HttpClient, HttpRequest, HttpResponse},
};
