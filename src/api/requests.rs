//! Request bodies that only ever travel client → server.

use serde::Serialize;

use crate::api::Identifier;

/// newOrder request ([RFC 8555 §7.4]).
///
/// [RFC 8555 §7.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.4
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub identifiers: Vec<Identifier>,

    /// Requested order expiry, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,
}

/// newAuthz pre-authorization request ([RFC 8555 §7.4.1]).
///
/// [RFC 8555 §7.4.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.4.1
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAuthorization {
    pub identifier: Identifier,
}

/// Body telling the server a challenge is ready to be validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyAuthorization {
    /// `token.thumbprint`.
    pub key_authorization: String,
}

/// Finalize request carrying the CSR ([RFC 8555 §7.4]).
///
/// [RFC 8555 §7.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.4
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finalize {
    /// PKCS#10 request in base64url-encoded DER (not PEM).
    pub csr: String,
}

/// revokeCert request ([RFC 8555 §7.6]).
///
/// [RFC 8555 §7.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.6
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revocation {
    /// base64url-encoded DER of the certificate.
    pub certificate: String,

    /// A reasonCode from [RFC 5280 §5.3.1]; absent means "unspecified".
    ///
    /// [RFC 5280 §5.3.1]: https://datatracker.ietf.org/doc/html/rfc5280#section-5.3.1
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<u8>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn new_order_body() {
        let order = NewOrder {
            identifiers: vec![Identifier::dns("example.com")],
            expires: Some("2026-10-18T00:00:00Z".to_owned()),
            not_before: None,
            not_after: None,
        };

        assert_eq!(
            serde_json::to_value(&order).unwrap(),
            json!({
                "identifiers": [{ "type": "dns", "value": "example.com" }],
                "expires": "2026-10-18T00:00:00Z",
            })
        );
    }

    #[test]
    fn key_authorization_body() {
        let body = KeyAuthorization {
            key_authorization: "tok.thumb".to_owned(),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "keyAuthorization": "tok.thumb" })
        );
    }

    #[test]
    fn unspecified_revocation_reason_is_absent() {
        let body = Revocation {
            certificate: "MIIB".to_owned(),
            reason: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "certificate": "MIIB" })
        );
    }
}
