//! Order life cycle.
//!
//! An order goes through a life cycle of different states that require various actions by
//! the user:
//!
//! 1. First prove ownership of every identifier:
//!    * [`AcmeClient::new_order`] -> [`AcmeClient::authorizations`] -> [`select_challenge`] ->
//!      provision -> [`AcmeClient::complete_challenge`] ->
//!      [`AcmeClient::wait_for_authorizations`]
//! 2. Then submit CSR and download the cert:
//!    * [`AcmeClient::wait_until_ready`] -> [`AcmeClient::finalize`] ->
//!      [`AcmeClient::wait_for_certificate`] -> [`AcmeClient::certificate`]
//!
//! [`issue::issue_certificate`] drives the whole sequence.
//!
//! [`AcmeClient::new_order`]: crate::AcmeClient::new_order
//! [`AcmeClient::authorizations`]: crate::AcmeClient::authorizations
//! [`AcmeClient::complete_challenge`]: crate::AcmeClient::complete_challenge
//! [`AcmeClient::wait_for_authorizations`]: crate::AcmeClient::wait_for_authorizations
//! [`AcmeClient::wait_until_ready`]: crate::AcmeClient::wait_until_ready
//! [`AcmeClient::finalize`]: crate::AcmeClient::finalize
//! [`AcmeClient::wait_for_certificate`]: crate::AcmeClient::wait_for_certificate
//! [`AcmeClient::certificate`]: crate::AcmeClient::certificate

use crate::api::{self, ChallengeType};

mod auth;
pub mod issue;

/// Picks the challenge to answer for `auth`, following the order of `preference`.
///
/// Wildcard identifiers can only be proven over DNS, so for them only `dns-01` is considered.
pub fn select_challenge<'a>(
    auth: &'a api::Authorization,
    preference: &[ChallengeType],
) -> Option<&'a api::Challenge> {
    if auth.is_wildcard() {
        return preference
            .contains(&ChallengeType::Dns01)
            .then(|| auth.dns_challenge())
            .flatten();
    }

    preference.iter().find_map(|&kind| auth.challenge(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authz(identifier: &str, wildcard: bool) -> api::Authorization {
        serde_json::from_value(serde_json::json!({
            "identifier": { "type": "dns", "value": identifier },
            "status": "pending",
            "wildcard": wildcard,
            "challenges": [
                { "type": "http-01", "status": "pending", "url": "https://acme.test/c/http", "token": "a" },
                { "type": "dns-01", "status": "pending", "url": "https://acme.test/c/dns", "token": "b" },
                { "type": "tls-alpn-01", "status": "pending", "url": "https://acme.test/c/tls", "token": "c" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn follows_preference_order() {
        let auth = authz("example.com", false);

        let dns_first = [ChallengeType::Dns01, ChallengeType::Http01];
        assert_eq!(select_challenge(&auth, &dns_first).unwrap().url, "https://acme.test/c/dns");

        let http_first = [ChallengeType::Http01, ChallengeType::Dns01];
        assert_eq!(select_challenge(&auth, &http_first).unwrap().url, "https://acme.test/c/http");

        assert!(select_challenge(&auth, &[]).is_none());
    }

    #[test]
    fn wildcard_only_accepts_dns() {
        let auth = authz("example.com", true);

        assert!(select_challenge(&auth, &[ChallengeType::Http01]).is_none());
        assert_eq!(
            select_challenge(&auth, &[ChallengeType::Http01, ChallengeType::Dns01])
                .unwrap()
                .url,
            "https://acme.test/c/dns"
        );
    }
}
