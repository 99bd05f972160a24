use serde::{Deserialize, Serialize};

use crate::util::string_or_number;

/// The status of an [`Account`].
///
/// See [RFC 8555 §7.1.6].
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Pending,
    Valid,
    Deactivated,
    Revoked,
}

/// An ACME account resource.
///
/// Serves both as the newAccount request body and as the server's account object.
///
/// See [RFC 8555 §7.1.2].
///
/// # Example JSON
///
/// ```json
/// {
///   "status": "valid",
///   "contact": [
///     "mailto:cert-admin@example.com",
///     "mailto:admin@example.com"
///   ],
///   "termsOfServiceAgreed": true,
///   "orders": "https://example.com/acme/acct/evOfKhNU60wg/orders"
/// }
/// ```
///
/// [RFC 8555 §7.1.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.2
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AccountStatus>,

    /// `mailto:` or `tel:` URIs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_of_service_agreed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_return_existing: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub orders: Option<String>,

    /// Server-assigned account ID. Some servers send a number, others a string.
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,

    /// Creation timestamp, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    /// The account's public key as echoed by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_ip: Option<String>,

    /// The account URL, taken from the `Location` header. Used as the JWS `kid` thereafter.
    #[serde(skip)]
    pub location: Option<String>,
}

impl Account {
    /// newAccount body registering a new account.
    pub(crate) fn registration(contact: Vec<String>) -> Self {
        Account {
            contact: (!contact.is_empty()).then_some(contact),
            terms_of_service_agreed: Some(true),
            ..Default::default()
        }
    }

    /// newAccount body looking up the account of the signing key without creating one.
    pub(crate) fn lookup() -> Self {
        Account {
            only_return_existing: Some(true),
            ..Default::default()
        }
    }

    pub fn is_status_valid(&self) -> bool {
        self.status == Some(AccountStatus::Valid)
    }

    pub fn is_status_deactivated(&self) -> bool {
        self.status == Some(AccountStatus::Deactivated)
    }

    pub fn is_status_revoked(&self) -> bool {
        self.status == Some(AccountStatus::Revoked)
    }

    pub fn terms_of_service_agreed(&self) -> bool {
        self.terms_of_service_agreed.unwrap_or(false)
    }
}

impl super::ApiObject for Account {
    fn set_location(&mut self, location: String) {
        self.location = Some(location);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_body() {
        let body = Account::registration(vec!["mailto:foo@bar.com".to_owned()]);
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "contact": ["mailto:foo@bar.com"],
                "termsOfServiceAgreed": true,
            })
        );

        let body = Account::registration(vec![]);
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({ "termsOfServiceAgreed": true })
        );
    }

    #[test]
    fn lookup_body() {
        assert_eq!(
            serde_json::to_value(Account::lookup()).unwrap(),
            serde_json::json!({ "onlyReturnExisting": true })
        );
    }

    #[test]
    fn server_account_object() {
        let acc: Account = serde_json::from_str(
            r#"{
                "id": 7728515,
                "key": { "kty": "RSA", "n": "abc", "e": "AQAB" },
                "contact": ["mailto:foo@bar.com"],
                "initialIp": "90.171.37.12",
                "createdAt": "2018-12-31T17:15:40.399104457Z",
                "status": "valid"
            }"#,
        )
        .unwrap();

        assert!(acc.is_status_valid());
        assert_eq!(acc.id.as_deref(), Some("7728515"));
        assert_eq!(acc.initial_ip.as_deref(), Some("90.171.37.12"));
        assert_eq!(acc.location, None);
    }
}
