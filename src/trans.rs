use std::collections::VecDeque;

use parking_lot::Mutex;
use reqwest::header::{HeaderMap, LOCATION};
use serde::Serialize;

use crate::{
    acc::AcmeKey,
    api::ApiObject,
    error::{Error, Result},
    jws,
    req::{handle_error, HttpClient, HttpRequest, HttpResponse, MIME_PEM_CHAIN},
};

const REPLAY_NONCE: &str = "replay-nonce";

/// Signed and unsigned exchanges with the ACME API.
///
/// Setup is:
///
/// 1. `Transport::new()`
/// 2. `head()` against the newNonce url to prime the nonce pool
/// 3. `post()` against the newAccount url, signed with the embedded JWK
/// 4. `adopt_key_id()` with the returned `Location` header
/// 5. `post()` for all calls after that, signed with the key ID.
///
/// No retry happens here. A POST with an empty nonce pool fails with [`Error::NoNonce`].
#[derive(Debug)]
pub(crate) struct Transport<C> {
    http: C,
    acme_key: AcmeKey,
    nonce_pool: NoncePool,

    /// Serializes signed requests so that nonce consumption and key ID changes are atomic.
    post_gate: tokio::sync::Mutex<()>,
}

impl<C: HttpClient> Transport<C> {
    pub(crate) fn new(http: C, acme_key: AcmeKey) -> Self {
        Transport {
            http,
            acme_key,
            nonce_pool: NoncePool::default(),
            post_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// The key used in the transport.
    pub(crate) fn acme_key(&self) -> &AcmeKey {
        &self.acme_key
    }

    #[cfg(test)]
    pub(crate) fn nonce_pool(&self) -> &NoncePool {
        &self.nonce_pool
    }

    /// Switches request signing from the embedded JWK to the account URL.
    ///
    /// Waits for in-flight signed requests so no request is signed with a half-published
    /// identity.
    pub(crate) async fn adopt_key_id(&self, kid: String) -> bool {
        let _gate = self.post_gate.lock().await;
        log::debug!("Key ID is: {kid}");
        self.acme_key.set_key_id(kid)
    }

    /// Unsigned GET.
    pub(crate) async fn get(&self, url: &str) -> Result<AcmeResponse> {
        log::debug!("GET {url}");
        let res = self.http.send(HttpRequest::get(url)).await?;
        self.nonce_pool.harvest(&res);
        Ok(AcmeResponse::new(url, handle_error(url, res)?))
    }

    /// Unsigned HEAD, used to fetch a fresh nonce.
    pub(crate) async fn head(&self, url: &str) -> Result<()> {
        log::debug!("Request new nonce");
        let res = self.http.send(HttpRequest::head(url)).await?;

        let harvested = self.nonce_pool.harvest(&res);
        handle_error(url, res)?;

        if !harvested {
            return Err(Error::invalid_response(
                "newNonce",
                url,
                "missing Replay-Nonce header",
            ));
        }

        Ok(())
    }

    /// Signed POST of `payload` to `url`.
    pub(crate) async fn post<T>(&self, url: &str, payload: &T) -> Result<AcmeResponse>
    where
        T: Serialize + ?Sized,
    {
        let _gate = self.post_gate.lock().await;

        let nonce = self.nonce_pool.take().ok_or(Error::NoNonce)?;
        let jws = jws::encode(&self.acme_key, url, nonce, payload)?;
        let body = serde_json::to_string(&jws)
            .map_err(|err| Error::Crypto(eyre::eyre!("serialize JWS: {err}")))?;

        log::debug!("Call endpoint: {url}");
        let res = self.http.send(HttpRequest::post_jose(url, body)).await?;

        // Regardless of the request being a success or not, there might be a nonce in the
        // response.
        self.nonce_pool.harvest(&res);

        Ok(AcmeResponse::new(url, handle_error(url, res)?))
    }
}

/// Shared pool of nonces.
#[derive(Default, Debug)]
pub(crate) struct NoncePool {
    pool: Mutex<VecDeque<String>>,
}

impl NoncePool {
    const CAPACITY: usize = 10;

    /// Stores the `Replay-Nonce` of `res`, if any. Returns whether one was found.
    pub(crate) fn harvest(&self, res: &HttpResponse) -> bool {
        let Some(nonce) = res.header(REPLAY_NONCE) else {
            return false;
        };

        // see https://datatracker.ietf.org/doc/html/rfc8555#section-6.5.1
        if nonce.is_empty() || !nonce.bytes().all(is_base64url_byte) {
            log::warn!("Ignoring malformed nonce {nonce:?}");
            return false;
        }

        log::trace!("Extracting new nonce");
        self.push(nonce.to_owned());
        true
    }

    pub(crate) fn push(&self, nonce: String) {
        let mut pool = self.pool.lock();
        pool.push_back(nonce);

        if pool.len() > Self::CAPACITY {
            pool.pop_front();
        }
    }

    pub(crate) fn take(&self) -> Option<String> {
        let nonce = self.pool.lock().pop_front();
        if nonce.is_some() {
            log::trace!("Use previous nonce");
        }
        nonce
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pool.lock().len()
    }
}

fn is_base64url_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

/// A successful response.
#[derive(Debug, Clone)]
pub(crate) struct AcmeResponse {
    pub(crate) url: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: String,
    media_type: Option<String>,
}

impl AcmeResponse {
    fn new(url: &str, res: HttpResponse) -> Self {
        let media_type = res.media_type();
        AcmeResponse {
            url: url.to_owned(),
            headers: res.headers,
            body: res.body,
            media_type,
        }
    }

    pub(crate) fn location(&self) -> Option<&str> {
        self.headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
    }

    /// Deserializes the JSON body and fills the location slot from the `Location` header.
    pub(crate) fn json<T: ApiObject>(&self, request: &'static str) -> Result<T> {
        if self.body.trim().is_empty() {
            return Err(Error::invalid_response(request, &self.url, "empty body"));
        }

        let mut obj = serde_json::from_str::<T>(&self.body)
            .map_err(|err| Error::invalid_response(request, &self.url, err))?;

        if let Some(location) = self.location() {
            obj.set_location(location.to_owned());
        }

        Ok(obj)
    }

    /// The body as an opaque PEM certificate chain.
    pub(crate) fn certificate_chain(self) -> Result<String> {
        if self.media_type.as_deref() != Some(MIME_PEM_CHAIN) {
            return Err(Error::invalid_response(
                "certificate",
                &self.url,
                format!(
                    "expected {MIME_PEM_CHAIN}, got {}",
                    self.media_type.as_deref().unwrap_or("no content type")
                ),
            ));
        }

        Ok(self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api,
        test::{account_key, MockHttp},
    };

    #[test]
    fn pool_is_fifo_and_bounded() {
        let pool = NoncePool::default();
        for i in 0..12 {
            pool.push(format!("n{i}"));
        }

        assert_eq!(pool.len(), 10);
        assert_eq!(pool.take().as_deref(), Some("n2"));
        assert_eq!(pool.take().as_deref(), Some("n3"));
        assert_eq!(pool.len(), 8);
    }

    #[tokio::test]
    async fn post_without_nonce_fails_before_sending() {
        let http = MockHttp::new();
        let transport = Transport::new(http.clone(), account_key());

        let err = transport
            .post("https://acme.test/new-acct", &api::EmptyObject)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoNonce));
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn nonces_are_never_reused() {
        let http = MockHttp::new();
        http.reply("HEAD", "https://acme.test/new-nonce", 200, "");
        http.reply("POST", "https://acme.test/x", 200, "{}");
        let transport = Transport::new(http.clone(), account_key());

        transport.head("https://acme.test/new-nonce").await.unwrap();
        for _ in 0..5 {
            transport.post("https://acme.test/x", &api::EmptyObject).await.unwrap();
        }

        let nonces = http
            .requests()
            .iter()
            .filter(|req| req.method == reqwest::Method::POST)
            .map(|req| crate::test::decode_jws(req).0["nonce"].as_str().unwrap().to_owned())
            .collect::<Vec<_>>();

        let mut unique = nonces.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(nonces.len(), 5);
        assert_eq!(unique.len(), 5);
    }

    #[tokio::test]
    async fn nonce_is_harvested_from_error_responses() {
        let http = MockHttp::new();
        http.reply_problem(
            "POST",
            "https://acme.test/x",
            403,
            "urn:ietf:params:acme:error:unauthorized",
        );
        let transport = Transport::new(http.clone(), account_key());
        transport.nonce_pool().push("first".to_owned());

        let err = transport.post("https://acme.test/x", &api::EmptyObject).await.unwrap_err();
        assert!(matches!(err, Error::Acme(_)));
        assert_eq!(transport.nonce_pool().len(), 1);
    }

    #[tokio::test]
    async fn head_without_nonce_is_invalid_response() {
        let http = MockHttp::new().without_nonces();
        http.reply("HEAD", "https://acme.test/new-nonce", 200, "");
        let transport = Transport::new(http, account_key());

        let err = transport.head("https://acme.test/new-nonce").await.unwrap_err();
        assert!(matches!(err, Error::InvalidResponse { request: "newNonce", .. }));
    }

    #[tokio::test]
    async fn head_error_status_wins_over_nonce() {
        let http = MockHttp::new();
        http.reply("HEAD", "https://acme.test/new-nonce", 503, "");
        let transport = Transport::new(http, account_key());

        let err = transport.head("https://acme.test/new-nonce").await.unwrap_err();
        assert!(matches!(err, Error::Http { status: 503, .. }));
        assert_eq!(transport.nonce_pool().len(), 1);
    }

    #[tokio::test]
    async fn json_fills_location() {
        let http = MockHttp::new();
        http.reply_with(
            "GET",
            "https://acme.test/order/1",
            200,
            &[("location", "https://acme.test/order/1")],
            r#"{"status":"pending","identifiers":[],"authorizations":[],"finalize":"https://acme.test/fin/1"}"#,
        );
        let transport = Transport::new(http, account_key());

        let res = transport.get("https://acme.test/order/1").await.unwrap();
        let order: api::Order = res.json("order").unwrap();
        assert_eq!(order.location.as_deref(), Some("https://acme.test/order/1"));
    }

    #[tokio::test]
    async fn empty_body_is_invalid_response() {
        let http = MockHttp::new();
        http.reply("GET", "https://acme.test/order/1", 200, "");
        let transport = Transport::new(http, account_key());

        let res = transport.get("https://acme.test/order/1").await.unwrap();
        let err = res.json::<api::Order>("order").unwrap_err();
        assert!(matches!(err, Error::InvalidResponse { request: "order", .. }));
    }

    #[tokio::test]
    async fn certificate_requires_pem_content_type() {
        let http = MockHttp::new();
        http.reply_with(
            "GET",
            "https://acme.test/cert/1",
            200,
            &[("content-type", "application/json")],
            "{}",
        );
        let transport = Transport::new(http, account_key());

        let res = transport.get("https://acme.test/cert/1").await.unwrap();
        assert!(res.certificate_chain().is_err());
    }
}
