use futures::stream::{self, StreamExt as _, TryStreamExt as _};

use crate::{
    api::{self, AuthorizationStatus},
    error::{Error, Result},
    poll::Cancellation,
    req::HttpClient,
    AcmeClient,
};

impl<C: HttpClient> AcmeClient<C> {
    /// Fetches the authorization at `url` and computes the authorization token of each challenge.
    ///
    /// `dns-01` challenges get the TXT record value, every other type the key authorization.
    pub async fn authorization(&self, url: &str) -> Result<api::Authorization> {
        let res = self.fetch(url).await?;
        let mut auth = res.json::<api::Authorization>("authorization")?;

        auth.location = Some(url.to_owned());
        self.fill_authorization_tokens(&mut auth)?;

        Ok(auth)
    }

    /// Fetches every authorization of `order`, a bounded number at a time. The result keeps the
    /// order's sequence.
    pub async fn authorizations(&self, order: &api::Order) -> Result<Vec<api::Authorization>> {
        stream::iter(&order.authorizations)
            .map(|url| self.authorization(url))
            .buffered(self.config().authorization_concurrency.max(1))
            .try_collect()
            .await
    }

    /// The authorizations of `order` that still need a challenge answered.
    ///
    /// An authorization that is `valid`, or has a `valid` challenge, is skipped.
    pub async fn pending_authorizations(
        &self,
        order: &api::Order,
    ) -> Result<Vec<api::Authorization>> {
        let mut auths = self.authorizations(order).await?;

        auths.retain(|auth| {
            let satisfied = auth.is_satisfied();
            if satisfied {
                log::debug!("Authorization for {} already valid", auth.identifier.value);
            }
            !satisfied
        });

        Ok(auths)
    }

    /// Polls the authorization at `url` while it is `pending`.
    ///
    /// An authorization that turns out anything but `valid` fails with
    /// [`Error::ValidationFailed`], carrying the failed challenge's problem.
    pub async fn wait_for_authorization(
        &self,
        url: &str,
        cancel: &Cancellation,
    ) -> Result<api::Authorization> {
        let mut poller = self.config().authorization_poll.start(format!("authorization {url}"));
        poller.attempt()?;

        loop {
            let auth = cancel.guard(self.authorization(url)).await??;

            match auth.status {
                AuthorizationStatus::Pending => poller.tick(cancel).await?,

                AuthorizationStatus::Valid => {
                    log::info!("Authorization for {} is valid", auth.identifier.value);
                    return Ok(auth);
                }

                status => {
                    log::debug!("Authorization for {} is {status:?}", auth.identifier.value);
                    return Err(Error::ValidationFailed {
                        identifier: auth.identifier.value.clone(),
                        problem: auth.challenge_error().cloned(),
                    });
                }
            }
        }
    }

    /// Waits for every authorization in `urls`, a bounded number at a time.
    ///
    /// The first failure aborts the wait for all others.
    pub async fn wait_for_authorizations(
        &self,
        urls: &[String],
        cancel: &Cancellation,
    ) -> Result<Vec<api::Authorization>> {
        stream::iter(urls)
            .map(|url| self.wait_for_authorization(url, cancel))
            .buffer_unordered(self.config().authorization_concurrency.max(1))
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        api,
        error::{Error, ProblemKind},
        poll::{cancellation, Cancellation},
        test::{ready_client, BASE},
    };

    fn authz_body(domain: &str, status: &str, challenge_status: &str) -> String {
        format!(
            r#"{{
                "identifier": {{ "type": "dns", "value": "{domain}" }},
                "status": "{status}",
                "challenges": [
                    {{ "type": "http-01", "status": "{challenge_status}", "url": "{BASE}/chall/{domain}/http", "token": "MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w" }},
                    {{ "type": "dns-01", "status": "pending", "url": "{BASE}/chall/{domain}/dns", "token": "MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w" }}
                ]
            }}"#
        )
    }

    fn order(authorizations: &[&str]) -> api::Order {
        serde_json::from_value(serde_json::json!({
            "status": "pending",
            "identifiers": [],
            "authorizations": authorizations,
            "finalize": format!("{BASE}/finalize/1"),
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn authorization_tokens_are_computed_locally() {
        let (client, http) = ready_client().await;
        let url = format!("{BASE}/authz/a");
        http.reply("GET", &url, 200, &authz_body("a.example.com", "pending", "pending"));

        let auth = client.authorization(&url).await.unwrap();

        assert_eq!(auth.location.as_deref(), Some(&*url));
        assert_eq!(
            auth.http_challenge().unwrap().authorization_token.as_deref(),
            Some("MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w.rou2TD_y2u-dNxbVqjy0G-aUrTfgZtTLxeP3Yk7f4tk")
        );
        assert_eq!(
            auth.dns_challenge().unwrap().authorization_token.as_deref(),
            Some("rsxkUyC9f5UsWJnGGYW9KON22UM6hNgnGhrMuHja694")
        );
    }

    #[tokio::test]
    async fn satisfied_authorizations_are_skipped() {
        let (client, http) = ready_client().await;
        let urls = [
            format!("{BASE}/authz/a"),
            format!("{BASE}/authz/b"),
            format!("{BASE}/authz/c"),
        ];
        http.reply("GET", &urls[0], 200, &authz_body("a.example.com", "valid", "valid"));
        http.reply("GET", &urls[1], 200, &authz_body("b.example.com", "pending", "valid"));
        http.reply("GET", &urls[2], 200, &authz_body("c.example.com", "pending", "pending"));

        let order = order(&[&urls[0], &urls[1], &urls[2]]);

        let all = client.authorizations(&order).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].identifier.value, "c.example.com");

        let pending = client.pending_authorizations(&order).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].identifier.value, "c.example.com");
    }

    #[tokio::test]
    async fn pending_authorization_is_polled_until_valid() {
        let (client, http) = ready_client().await;
        let url = format!("{BASE}/authz/a");
        http.reply("GET", &url, 200, &authz_body("a.example.com", "pending", "pending"));
        http.reply("GET", &url, 200, &authz_body("a.example.com", "pending", "processing"));
        http.reply("GET", &url, 200, &authz_body("a.example.com", "valid", "valid"));

        let auth = client
            .wait_for_authorization(&url, &Cancellation::never())
            .await
            .unwrap();
        assert_eq!(auth.status, api::AuthorizationStatus::Valid);
        assert_eq!(http.requests_to("GET", &url).len(), 3);
    }

    #[tokio::test]
    async fn invalid_authorization_reports_identifier_and_problem() {
        let (client, http) = ready_client().await;
        let ok = format!("{BASE}/authz/ok");
        let bad = format!("{BASE}/authz/bad");
        http.reply("GET", &ok, 200, &authz_body("ok.example.com", "valid", "valid"));
        http.reply(
            "GET",
            &bad,
            200,
            r#"{
                "identifier": { "type": "dns", "value": "bad.example.com" },
                "status": "invalid",
                "challenges": [{
                    "type": "dns-01",
                    "status": "invalid",
                    "url": "https://acme.test/chall/bad",
                    "token": "t",
                    "error": {
                        "type": "urn:ietf:params:acme:error:dns",
                        "detail": "DNS problem: NXDOMAIN looking up TXT for _acme-challenge.bad.example.com",
                        "status": 400
                    }
                }]
            }"#,
        );

        let err = client
            .wait_for_authorizations(&[ok, bad], &Cancellation::never())
            .await
            .unwrap_err();

        match err {
            Error::ValidationFailed {
                identifier,
                problem,
            } => {
                assert_eq!(identifier, "bad.example.com");
                let problem = problem.unwrap();
                assert_eq!(
                    crate::error::ProblemKind::from_urn(&problem._type),
                    ProblemKind::Dns
                );
            }
            err => panic!("unexpected error: {err}"),
        }
    }

    #[tokio::test]
    async fn authorization_poll_is_bounded() {
        let (client, http) = ready_client().await;
        let url = format!("{BASE}/authz/a");
        http.reply("GET", &url, 200, &authz_body("a.example.com", "pending", "pending"));

        let err = client
            .wait_for_authorization(&url, &Cancellation::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(
            http.requests_to("GET", &url).len() as u32,
            client.config().authorization_poll.max_attempts.unwrap()
        );
    }

    #[tokio::test]
    async fn cancelled_wait_stops_polling() {
        let (client, http) = ready_client().await;
        let url = format!("{BASE}/authz/a");
        http.reply("GET", &url, 200, &authz_body("a.example.com", "pending", "pending"));

        let (handle, cancel) = cancellation();
        handle.cancel();

        let err = client.wait_for_authorization(&url, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(http.requests_to("GET", &url).is_empty());
    }
}
