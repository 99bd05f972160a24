//! Challenge solvers: the external capabilities that make a challenge answerable.
//!
//! A solver provisions the proof for a challenge (a DNS TXT record, a file served over HTTP) and
//! returns once the proof is visible, so the server can be told to validate it.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    api::{Authorization, Challenge, ChallengeType},
    error::{Error, Result},
    poll::{Cancellation, PollPolicy},
    req::{HttpClient, HttpRequest},
};

/// Provisions challenge proofs.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Challenge types this solver can answer, most preferred first.
    fn supported(&self) -> &[ChallengeType];

    /// Makes the proof for `challenge` visible. Returns once the server can validate it.
    async fn provision(
        &self,
        auth: &Authorization,
        challenge: &Challenge,
        cancel: &Cancellation,
    ) -> Result<()>;

    /// Removes the proof once validation is over.
    async fn cleanup(&self, _auth: &Authorization, _challenge: &Challenge) -> Result<()> {
        Ok(())
    }
}

/// Outcome of creating a TXT record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxtRecordOutcome {
    /// The record was created with this provider ID.
    Created(String),

    /// An identical record exists already.
    AlreadyExists,
}

impl TxtRecordOutcome {
    /// The provider's record ID; empty for a record that already existed.
    pub fn record_id(self) -> String {
        match self {
            TxtRecordOutcome::Created(id) => id,
            TxtRecordOutcome::AlreadyExists => String::new(),
        }
    }
}

/// A DNS provider API.
#[async_trait]
pub trait DnsProvisioner: Send + Sync {
    /// The provider's zone ID for `root_domain` (e.g. `example.com`).
    async fn zone_id(&self, root_domain: &str) -> Result<String>;

    async fn create_txt_record(
        &self,
        zone_id: &str,
        name: &str,
        value: &str,
        ttl: u32,
    ) -> Result<TxtRecordOutcome>;

    /// The TXT strings currently published under `name`, as seen by a resolver.
    async fn query_txt(&self, name: &str) -> Result<HashSet<String>>;

    async fn delete_txt_record(&self, _zone_id: &str, _record_id: &str) -> Result<()> {
        Ok(())
    }
}

/// `_acme-challenge.` + the identifier, without its wildcard label.
pub fn challenge_record_name(identifier: &str) -> String {
    format!(
        "_acme-challenge.{}",
        identifier.strip_prefix("*.").unwrap_or(identifier)
    )
}

/// The last two labels of `domain`.
pub fn root_domain(domain: &str) -> &str {
    let domain = domain.trim_end_matches('.');

    match domain.rmatch_indices('.').nth(1) {
        Some((idx, _)) => &domain[idx + 1..],
        None => domain,
    }
}

/// Answers `dns-01` challenges through a [`DnsProvisioner`].
#[derive(Debug)]
pub struct DnsSolver<P> {
    provisioner: P,
    ttl: u32,
    propagation: PollPolicy,

    /// `(zone, record id)` by challenge URL.
    records: Mutex<HashMap<String, (String, String)>>,
}

impl<P: DnsProvisioner> DnsSolver<P> {
    pub fn new(provisioner: P) -> Self {
        DnsSolver {
            provisioner,
            ttl: 3600,
            propagation: PollPolicy::new(std::time::Duration::from_secs(5), 50),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// How long to wait for a created record to show up in DNS.
    pub fn with_propagation(mut self, propagation: PollPolicy) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    async fn wait_for_propagation(
        &self,
        name: &str,
        value: &str,
        cancel: &Cancellation,
    ) -> Result<()> {
        let mut poller = self.propagation.start(format!("TXT record {name}"));
        poller.attempt()?;

        loop {
            match cancel.guard(self.provisioner.query_txt(name)).await? {
                Ok(values) if values.contains(value) => {
                    log::info!("TXT record {name} is visible");
                    return Ok(());
                }
                Ok(_) => log::debug!("TXT record {name} not visible yet"),
                Err(err) => log::debug!("Querying TXT {name} failed: {err}"),
            }

            poller.tick(cancel).await?;
        }
    }
}

#[async_trait]
impl<P: DnsProvisioner> ChallengeSolver for DnsSolver<P> {
    fn supported(&self) -> &[ChallengeType] {
        &[ChallengeType::Dns01]
    }

    async fn provision(
        &self,
        auth: &Authorization,
        challenge: &Challenge,
        cancel: &Cancellation,
    ) -> Result<()> {
        let identifier = &auth.identifier.value;
        let value = proof(auth, challenge)?;
        let name = challenge_record_name(identifier);

        let zone_id = self.provisioner.zone_id(root_domain(identifier)).await?;
        log::debug!("Adding TXT entry {name} with value {value}");

        let record_id = self
            .provisioner
            .create_txt_record(&zone_id, &name, value, self.ttl)
            .await?
            .record_id();
        if record_id.is_empty() {
            log::debug!("TXT entry {name} already exists");
        }

        self.records
            .lock()
            .insert(challenge.url.clone(), (zone_id, record_id));

        self.wait_for_propagation(&name, value, cancel).await
    }

    async fn cleanup(&self, _auth: &Authorization, challenge: &Challenge) -> Result<()> {
        let record = self.records.lock().remove(&challenge.url);

        match record {
            Some((zone_id, record_id)) if !record_id.is_empty() => {
                self.provisioner.delete_txt_record(&zone_id, &record_id).await
            }
            _ => Ok(()),
        }
    }
}

/// Something that serves files under `/.well-known/acme-challenge/` for a domain.
#[async_trait]
pub trait HttpChallengeHost: Send + Sync {
    /// Serves `key_authorization` at `http://{domain}/.well-known/acme-challenge/{token}`.
    async fn publish(&self, domain: &str, token: &str, key_authorization: &str) -> Result<()>;

    async fn unpublish(&self, _domain: &str, _token: &str) -> Result<()> {
        Ok(())
    }
}

/// The URL an `http-01` proof is served from.
pub fn http_challenge_url(domain: &str, token: &str) -> String {
    format!("http://{domain}/.well-known/acme-challenge/{token}")
}

/// Answers `http-01` challenges through an [`HttpChallengeHost`], checking the published file
/// with a plain GET before returning.
#[derive(Debug)]
pub struct HttpSolver<H, C = reqwest::Client> {
    host: H,
    http: C,
    verify: bool,
}

impl<H: HttpChallengeHost> HttpSolver<H> {
    pub fn new(host: H) -> Self {
        Self::with_http(host, reqwest::Client::new())
    }
}

impl<H: HttpChallengeHost, C: HttpClient> HttpSolver<H, C> {
    pub fn with_http(host: H, http: C) -> Self {
        HttpSolver {
            host,
            http,
            verify: true,
        }
    }

    /// Skips the self-check GET, e.g. when the domain does not resolve to this host yet.
    pub fn without_verification(mut self) -> Self {
        self.verify = false;
        self
    }

    async fn verify(&self, domain: &str, token: &str, expected: &str) -> Result<()> {
        let url = http_challenge_url(domain, token);
        let res = self.http.send(HttpRequest::get(&url)).await?;

        if !res.status.is_success() {
            return Err(Error::Challenge {
                identifier: domain.to_owned(),
                reason: format!("{url} answered {}", res.status),
            });
        }

        if res.body != expected {
            return Err(Error::Challenge {
                identifier: domain.to_owned(),
                reason: format!("{url} does not serve the key authorization"),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl<H: HttpChallengeHost, C: HttpClient> ChallengeSolver for HttpSolver<H, C> {
    fn supported(&self) -> &[ChallengeType] {
        &[ChallengeType::Http01]
    }

    async fn provision(
        &self,
        auth: &Authorization,
        challenge: &Challenge,
        cancel: &Cancellation,
    ) -> Result<()> {
        let domain = &auth.identifier.value;
        let key_authorization = proof(auth, challenge)?;

        cancel
            .guard(self.host.publish(domain, &challenge.token, key_authorization))
            .await??;

        if self.verify {
            cancel
                .guard(self.verify(domain, &challenge.token, key_authorization))
                .await??;
        }

        Ok(())
    }

    async fn cleanup(&self, auth: &Authorization, challenge: &Challenge) -> Result<()> {
        self.host
            .unpublish(&auth.identifier.value, &challenge.token)
            .await
    }
}

fn proof<'a>(auth: &Authorization, challenge: &'a Challenge) -> Result<&'a str> {
    challenge
        .authorization_token
        .as_deref()
        .ok_or_else(|| Error::Challenge {
            identifier: auth.identifier.value.clone(),
            reason: "authorization token was not computed".to_owned(),
        })
}
