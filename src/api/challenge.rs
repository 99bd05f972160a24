use serde::{Deserialize, Serialize};

use crate::api;

/// The status of an [`api::Challenge`].
///
/// See [RFC 8555 §7.1.6].
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// Challenge types this crate knows how to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
    Other,
}

impl ChallengeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeType::Http01 => "http-01",
            ChallengeType::Dns01 => "dns-01",
            ChallengeType::TlsAlpn01 => "tls-alpn-01",
            ChallengeType::Other => "other",
        }
    }

    fn from_type(_type: &str) -> Self {
        match _type {
            "http-01" => ChallengeType::Http01,
            "dns-01" => ChallengeType::Dns01,
            "tls-alpn-01" => ChallengeType::TlsAlpn01,
            _ => ChallengeType::Other,
        }
    }
}

/// An ACME challenge object.
///
/// Represents a server's offer to validate a client's possession of an identifier in a specific
/// way.
///
/// See [RFC 8555 §7.1.5].
///
/// # Example JSON
///
/// ```json
/// {
///   "type": "http-01",
///   "status": "pending",
///   "url": "https://acme-staging-v02.api.letsencrypt.org/acme/challenge/YTqpYUthlVfwBncUufE8IRA2TkzZkN4eYWWLMSRqcSs/216789597",
///   "token": "MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w"
/// }
/// ```
///
/// [RFC 8555 §7.1.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.5
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Type of challenge encoded in the object.
    #[serde(rename = "type")]
    pub _type: String,

    /// URL to which a response can be posted.
    pub url: String,

    /// Status of this challenge.
    pub status: ChallengeStatus,

    /// Time at which the server validated this challenge.
    ///
    /// Uses RFC 3339 format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated: Option<String>,

    /// Error that occurred while the server was validating the challenge, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<api::Problem>,

    #[serde(default)]
    pub token: String,

    /// Value to provision for this challenge, computed locally from the token and the account key
    /// thumbprint. Never sent by the server.
    ///
    /// The TXT record value for `dns-01`, the key authorization for every other type.
    #[serde(skip)]
    pub authorization_token: Option<String>,
}

impl Challenge {
    pub fn kind(&self) -> ChallengeType {
        ChallengeType::from_type(&self._type)
    }

    pub fn is_status_valid(&self) -> bool {
        self.status == ChallengeStatus::Valid
    }
}

impl api::ApiObject for Challenge {}
