//! The ACME orchestrator: directory, nonces, account, orders, finalization, certificates and
//! revocation.

use std::{collections::HashSet, time::Duration};

use eyre::WrapErr as _;
use parking_lot::RwLock;
use rsa::RsaPrivateKey;
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use zeroize::Zeroizing;

use crate::{
    acc::{AcmeKey, RevocationReason},
    api,
    cert::{create_csr_der, Certificate},
    dir::DirectoryUrl,
    error::{Error, ProblemKind, Result},
    poll::{Cancellation, PollPolicy},
    req::HttpClient,
    trans::{AcmeResponse, Transport},
    util::base64url,
};

/// Tunables of an [`AcmeClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Sent with every request when the client builds its own HTTP client.
    pub user_agent: String,

    /// Per-request timeout when the client builds its own HTTP client.
    pub request_timeout: Duration,

    /// Retries of order creation after transient failures.
    pub order_retry: PollPolicy,

    /// Polling of `pending` authorizations.
    pub authorization_poll: PollPolicy,

    /// Polling of `processing` orders.
    pub order_poll: PollPolicy,

    /// How many times a request rejected with `badNonce` is repeated with a fresh nonce.
    pub bad_nonce_retries: u32,

    /// Upper bound of authorizations fetched or awaited at the same time.
    pub authorization_concurrency: usize,

    /// Fetch authorizations, orders and certificates with signed POST-as-GET requests instead of
    /// plain GETs.
    pub post_as_get: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned(),
            request_timeout: Duration::from_secs(30),
            order_retry: PollPolicy::new(Duration::from_secs(5), 12),
            authorization_poll: PollPolicy::new(Duration::from_secs(5), 60),
            order_poll: PollPolicy::new(Duration::from_millis(500), 120),
            bad_nonce_retries: 3,
            authorization_concurrency: 4,
            post_as_get: false,
        }
    }
}

/// Entry point for accessing an ACME API.
///
/// One client drives one account. The usual sequence is:
///
/// 1. [`initialize`](Self::initialize): fetch the directory and the first nonce.
/// 2. [`resolve_account`](Self::resolve_account): look the key's account up, or register one.
///    From here on every request is signed with the account URL.
/// 3. [`new_order`](Self::new_order), then prove control of each identifier (see
///    [`authorizations`](Self::authorizations) and [`complete_challenge`](Self::complete_challenge)).
/// 4. [`wait_until_ready`](Self::wait_until_ready), [`finalize`](Self::finalize),
///    [`wait_for_certificate`](Self::wait_for_certificate) and
///    [`certificate`](Self::certificate).
///
/// [`issue_certificate`](crate::order::issue::issue_certificate) runs steps 3 and 4 with a
/// [`ChallengeSolver`](crate::solver::ChallengeSolver).
#[derive(Debug)]
pub struct AcmeClient<C = reqwest::Client> {
    directory_url: String,
    config: ClientConfig,
    pub(crate) transport: Transport<C>,
    directory: RwLock<Option<api::Directory>>,
    account: RwLock<Option<api::Account>>,
}

impl AcmeClient<reqwest::Client> {
    /// Client for the CA at `url`, signing with `account_key`.
    pub fn new(
        url: DirectoryUrl<'_>,
        account_key: RsaPrivateKey,
        config: ClientConfig,
    ) -> Result<Self> {
        let http = build_http(&url, &config)?;
        Self::with_http(url, http, account_key, config)
    }

    /// Client signing with a PKCS#8 or PKCS#1 PEM account key.
    pub fn from_pem(
        url: DirectoryUrl<'_>,
        account_key_pem: &str,
        config: ClientConfig,
    ) -> Result<Self> {
        let key = AcmeKey::from_pem(account_key_pem)?;
        let http = build_http(&url, &config)?;
        Ok(Self::with_acme_key(url, http, key, config))
    }

    /// Client signing with a freshly generated account key.
    ///
    /// Persist the key with [`account_key_pem`](Self::account_key_pem) to use the same account
    /// again later.
    pub fn generate(url: DirectoryUrl<'_>, config: ClientConfig) -> Result<Self> {
        let key = crate::create_rsa_key(crate::cert::DEFAULT_RSA_BITS)?;
        Self::new(url, key, config)
    }
}

fn build_http(url: &DirectoryUrl<'_>, config: &ClientConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.request_timeout)
        .build()
        .map_err(|err| Error::Network {
            url: url.to_url().into_owned(),
            source: Box::new(err),
        })
}

impl<C: HttpClient> AcmeClient<C> {
    /// Client over a caller-supplied HTTP implementation.
    pub fn with_http(
        url: DirectoryUrl<'_>,
        http: C,
        account_key: RsaPrivateKey,
        config: ClientConfig,
    ) -> Result<Self> {
        let key = AcmeKey::from_key(account_key)?;
        Ok(Self::with_acme_key(url, http, key, config))
    }

    pub(crate) fn with_acme_key(
        url: DirectoryUrl<'_>,
        http: C,
        key: AcmeKey,
        config: ClientConfig,
    ) -> Self {
        AcmeClient {
            directory_url: url.to_url().into_owned(),
            config,
            transport: Transport::new(http, key),
            directory: RwLock::new(None),
            account: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// URL the directory is fetched from.
    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    /// Account private key (PKCS#8 PEM).
    pub fn account_key_pem(&self) -> Result<Zeroizing<String>> {
        self.transport.acme_key().to_pem()
    }

    /// The account key's JWK thumbprint.
    pub fn thumbprint(&self) -> Result<String> {
        self.transport.acme_key().jwk().thumbprint()
    }

    /// `token.thumbprint`, the expected response of `http-01` (and other non-DNS) challenges.
    pub fn key_authorization(&self, token: &str) -> Result<String> {
        self.transport.acme_key().key_authorization(token)
    }

    /// The `dns-01` TXT record value for `token`.
    pub fn dns_key_authorization(&self, token: &str) -> Result<String> {
        self.transport.acme_key().dns_key_authorization(token)
    }

    /// Fetches the directory and caches it. Safe to call repeatedly; every call re-fetches.
    pub async fn directory(&self) -> Result<api::Directory> {
        let res = self.transport.get(&self.directory_url).await?;
        let directory = res.json::<api::Directory>("directory")?;

        *self.directory.write() = Some(directory.clone());
        Ok(directory)
    }

    /// The cached directory, fetching it on first use.
    pub(crate) async fn cached_directory(&self) -> Result<api::Directory> {
        let cached = self.directory.read().clone();
        match cached {
            Some(directory) => Ok(directory),
            None => self.directory().await,
        }
    }

    /// Requests a fresh nonce from the newNonce endpoint.
    pub async fn new_nonce(&self) -> Result<()> {
        let directory = self.cached_directory().await?;
        self.transport.head(&directory.new_nonce).await
    }

    /// Fetches the directory and primes the nonce pool.
    pub async fn initialize(&self) -> Result<api::Directory> {
        let directory = self.directory().await?;
        self.transport.head(&directory.new_nonce).await?;
        Ok(directory)
    }

    /// Signed POST, fetching a nonce first when none is cached.
    pub(crate) async fn signed_post<T>(&self, url: &str, payload: &T) -> Result<AcmeResponse>
    where
        T: Serialize + ?Sized,
    {
        let mut bad_nonces = 0;

        loop {
            match self.transport.post(url, payload).await {
                Err(Error::NoNonce) => self.new_nonce().await?,

                // The ACME API may at any point invalidate all nonces.
                Err(err)
                    if err.problem_kind() == Some(ProblemKind::BadNonce)
                        && bad_nonces < self.config.bad_nonce_retries =>
                {
                    bad_nonces += 1;
                    log::warn!(
                        "Retrying {url} on bad nonce ({bad_nonces}/{})",
                        self.config.bad_nonce_retries
                    );
                }

                res => return res,
            }
        }
    }

    /// GET, or signed POST-as-GET when [`ClientConfig::post_as_get`] is set.
    pub(crate) async fn fetch(&self, url: &str) -> Result<AcmeResponse> {
        if self.config.post_as_get {
            self.signed_post(url, &api::EmptyString).await
        } else {
            self.transport.get(url).await
        }
    }

    /// The resolved account, if any.
    pub fn account(&self) -> Option<api::Account> {
        self.account.read().clone()
    }

    /// The account URL requests are signed with, once known.
    pub fn account_url(&self) -> Option<String> {
        self.transport.acme_key().key_id()
    }

    /// Looks up the account of the signing key without creating one.
    ///
    /// Fails with [`ProblemKind::AccountDoesNotExist`] when the key is unknown to the server.
    pub async fn find_account(&self) -> Result<api::Account> {
        let directory = self.cached_directory().await?;
        let res = self
            .signed_post(&directory.new_account, &api::Account::lookup())
            .await?;
        self.adopt_account(res).await
    }

    /// Registers an account for the signing key, agreeing to the terms of service.
    ///
    /// For a key that already has an account the server returns the existing one.
    pub async fn register(&self, contacts: Vec<String>) -> Result<api::Account> {
        let directory = self.cached_directory().await?;

        if let Some(tos) = directory.terms_of_service() {
            log::debug!("Agreeing to terms of service {tos}");
        }

        let res = self
            .signed_post(&directory.new_account, &api::Account::registration(contacts))
            .await?;
        self.adopt_account(res).await
    }

    /// Looks up the key's account when `try_existing` is set, registering one if the server does
    /// not know the key. Any other lookup failure is returned.
    pub async fn resolve_account(
        &self,
        contacts: Vec<String>,
        try_existing: bool,
    ) -> Result<api::Account> {
        if let Some(account) = self.account() {
            return Ok(account);
        }

        if try_existing {
            match self.find_account().await {
                Ok(account) => return Ok(account),
                Err(err) if err.problem_kind() == Some(ProblemKind::AccountDoesNotExist) => {
                    log::info!("No account for this key yet, registering");
                }
                Err(err) => return Err(err),
            }
        }

        self.register(contacts).await
    }

    /// Makes the account in `res` the signing identity: from now on requests carry `kid`.
    async fn adopt_account(&self, res: AcmeResponse) -> Result<api::Account> {
        let account = res.json::<api::Account>("newAccount")?;

        let kid = account
            .location
            .clone()
            .ok_or_else(|| Error::invalid_response("newAccount", &res.url, "missing Location header"))?;
        self.transport.adopt_key_id(kid).await;

        *self.account.write() = Some(account.clone());
        Ok(account)
    }

    fn require_account(&self, operation: &str) -> Result<()> {
        match self.account_url() {
            Some(_) => Ok(()),
            None => Err(Error::Precondition(format!(
                "{operation} requires a resolved account"
            ))),
        }
    }

    /// Create a new order to issue a certificate for `domains`.
    ///
    /// Duplicates are dropped. The order asks to expire in two days.
    ///
    /// Every call creates a new order with the ACME API provider, even when the domain names
    /// supplied are exactly the same.
    pub async fn new_order(&self, domains: &[&str]) -> Result<api::Order> {
        if domains.is_empty() {
            return Err(Error::Precondition("an order needs at least one domain".to_owned()));
        }
        self.require_account("newOrder")?;

        let mut dedup = HashSet::new();
        let identifiers = domains
            .iter()
            .filter(|domain| dedup.insert(**domain))
            .map(|domain| api::Identifier::dns(domain))
            .collect();

        let expires = (OffsetDateTime::now_utc() + time::Duration::days(2))
            .format(&Rfc3339)
            .wrap_err("format order expiry")?;

        let new_order = api::NewOrder {
            identifiers,
            expires: Some(expires),
            not_before: None,
            not_after: None,
        };

        let directory = self.cached_directory().await?;
        let res = self.signed_post(&directory.new_order, &new_order).await?;
        let order = res.json::<api::Order>("newOrder")?;

        match &order.location {
            Some(location) => log::info!("Placed order {location} for {}", domains.join(", ")),
            None => {
                return Err(Error::invalid_response(
                    "newOrder",
                    &res.url,
                    "missing Location header",
                ))
            }
        }

        Ok(order)
    }

    /// [`new_order`](Self::new_order), repeated on transient failures per
    /// [`ClientConfig::order_retry`]. Problems with a terminal meaning are returned immediately.
    pub async fn new_order_with_retry(
        &self,
        domains: &[&str],
        cancel: &Cancellation,
    ) -> Result<api::Order> {
        let mut poller = self.config.order_retry.start("order creation");
        poller.attempt()?;

        loop {
            match cancel.guard(self.new_order(domains)).await? {
                Err(err) if err.is_transient() => {
                    log::warn!("Order creation failed, retrying: {err}");
                    poller.tick(cancel).await?;
                }
                res => return res,
            }
        }
    }

    /// Re-fetches `order` from its location.
    pub async fn update_order(&self, order: &api::Order) -> Result<api::Order> {
        let location = order.location.as_deref().ok_or_else(|| {
            Error::Precondition("order has no location to fetch it from".to_owned())
        })?;

        let res = self.fetch(location).await?;
        let mut updated = res.json::<api::Order>("order")?;

        if updated.location.is_none() {
            log::warn!("Server sent no Location for order {location}");
        }
        updated.retain_location(Some(location));

        Ok(updated)
    }

    /// Polls `order` while it is `processing`.
    ///
    /// Returns the order in the first status that is not `processing`.
    pub async fn wait_for_order(
        &self,
        mut order: api::Order,
        cancel: &Cancellation,
    ) -> Result<api::Order> {
        let mut poller = self.config.order_poll.start("order processing");

        while order.is_status_processing() {
            poller.tick(cancel).await?;
            order = cancel.guard(self.update_order(&order)).await??;
        }

        Ok(order)
    }

    /// Re-fetches `order` once its authorizations are done and waits until it is `ready`.
    ///
    /// An order that is already `valid` is returned as is. Any other status is an error
    /// carrying the order's problem.
    pub async fn wait_until_ready(
        &self,
        order: &api::Order,
        cancel: &Cancellation,
    ) -> Result<api::Order> {
        let order = cancel.guard(self.update_order(order)).await??;
        let order = self.wait_for_order(order, cancel).await?;

        match order.status {
            api::OrderStatus::Ready | api::OrderStatus::Valid => Ok(order),
            _ => Err(order_failed(order)),
        }
    }

    /// Submits a CSR for the order's identifiers, signed by `certificate_key`.
    ///
    /// The server's verdict is returned as is: an order that is not `ready` yet fails with
    /// [`ProblemKind::OrderNotReady`] and is not retried.
    pub async fn finalize(
        &self,
        order: &api::Order,
        certificate_key: &RsaPrivateKey,
    ) -> Result<api::Order> {
        self.require_account("finalize")?;

        let domains = order.domains();
        let csr = create_csr_der(certificate_key, &domains)?;
        let finalize = api::Finalize {
            csr: base64url(&csr),
        };

        log::debug!("Finalizing order {}", order.finalize);
        let res = self.signed_post(&order.finalize, &finalize).await?;
        let mut updated = res.json::<api::Order>("finalize")?;

        // the finalize response carries the finalize URL, not the order's
        updated.location = None;
        updated.retain_location(order.location.as_deref());

        Ok(updated)
    }

    /// Polls a finalized order until it is `valid`.
    pub async fn wait_for_certificate(
        &self,
        order: api::Order,
        cancel: &Cancellation,
    ) -> Result<api::Order> {
        let order = self.wait_for_order(order, cancel).await?;

        if order.is_status_valid() {
            Ok(order)
        } else {
            Err(order_failed(order))
        }
    }

    /// Downloads the certificate chain of a `valid` order.
    pub async fn certificate(&self, order: &api::Order) -> Result<Certificate> {
        if !order.is_status_valid() {
            return Err(Error::Precondition(format!(
                "certificate requested for an order that is {:?}, not valid",
                order.status
            )));
        }

        let url = order.certificate.as_deref().ok_or_else(|| {
            Error::Precondition("valid order has no certificate URL".to_owned())
        })?;

        let pem = self.fetch(url).await?.certificate_chain()?;
        let cert = Certificate::parse(pem)?;

        log::info!("Downloaded certificate from {url}");
        Ok(cert)
    }

    /// Revokes the DER-encoded certificate. A certificate that is already revoked counts as
    /// success.
    pub async fn revoke_certificate(
        &self,
        certificate_der: &[u8],
        reason: RevocationReason,
    ) -> Result<()> {
        if certificate_der.is_empty() {
            return Err(Error::Precondition("no certificate to revoke".to_owned()));
        }

        let revocation = api::Revocation {
            certificate: base64url(certificate_der),
            reason: reason.code(),
        };

        let directory = self.cached_directory().await?;
        match self.signed_post(&directory.revoke_cert, &revocation).await {
            Ok(_) => Ok(()),
            Err(err) if err.problem_kind() == Some(ProblemKind::AlreadyRevoked) => {
                log::warn!("Certificate was already revoked");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Revokes the end-entity certificate of `cert`.
    pub async fn revoke(&self, cert: &Certificate, reason: RevocationReason) -> Result<()> {
        self.revoke_certificate(&cert.certificate_der()?, reason).await
    }

    /// Pre-authorizes `domain` ahead of any order.
    ///
    /// Fails without a request when the server does not offer pre-authorization.
    pub async fn new_authorization(&self, domain: &str) -> Result<api::Authorization> {
        self.require_account("newAuthz")?;

        let directory = self.cached_directory().await?;
        let url = directory.new_authz.as_deref().ok_or_else(|| {
            Error::Precondition("directory does not advertise newAuthz".to_owned())
        })?;

        let res = self
            .signed_post(
                url,
                &api::NewAuthorization {
                    identifier: api::Identifier::dns(domain),
                },
            )
            .await?;

        let mut auth = res.json::<api::Authorization>("newAuthz")?;
        self.fill_authorization_tokens(&mut auth)?;
        Ok(auth)
    }

    /// Tells the server `challenge` is ready to be validated.
    pub async fn complete_challenge(&self, challenge: &api::Challenge) -> Result<api::Challenge> {
        self.update_challenge(&challenge.url, &challenge.token).await
    }

    /// Tells the server the challenge at `url` with `token` is ready to be validated.
    pub async fn update_challenge(&self, url: &str, token: &str) -> Result<api::Challenge> {
        self.require_account("challenge response")?;

        let body = api::KeyAuthorization {
            key_authorization: self.key_authorization(token)?,
        };

        log::debug!("Responding to challenge {url}");
        let res = self.signed_post(url, &body).await?;
        res.json::<api::Challenge>("challenge")
    }

    /// Computes the authorization token of every challenge in `auth`.
    pub(crate) fn fill_authorization_tokens(&self, auth: &mut api::Authorization) -> Result<()> {
        for challenge in &mut auth.challenges {
            let token = match challenge.kind() {
                api::ChallengeType::Dns01 => self.dns_key_authorization(&challenge.token)?,
                _ => self.key_authorization(&challenge.token)?,
            };
            challenge.authorization_token = Some(token);
        }

        Ok(())
    }
}

fn order_failed(order: api::Order) -> Error {
    Error::OrderFailed {
        url: order.location.unwrap_or_default(),
        status: format!("{:?}", order.status).to_lowercase(),
        problem: order.error,
    }
}
