use serde::{Deserialize, Serialize};

use crate::api;

/// The status of an [`api::Authorization`].
///
/// See [RFC 8555 §7.1.6].
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

// on incorrect challenge, something like:
//
//   "challenges": [
//     {
//       "type": "dns-01",
//       "status": "invalid",
//       "error": {
//         "type": "urn:ietf:params:acme:error:dns",
//         "detail": "DNS problem: NXDOMAIN looking up TXT for _acme-challenge.martintest.foobar.com",
//         "status": 400
//       },
//       "url": "https://example.com/acme/challenge/afyChhlFB8GLLmIqEnqqcXzX0Ss3GBw6oUlKAGDG6lY/221695600",
//       "token": "YsNqBWZnyYjDun3aUC2CkCopOaqZRrI5hp3tUjxPLQU"
//     },

/// An ACME authorization object.
///
/// Represents a server's authorization for an account to represent an identifier.
///
/// See [RFC 8555 §7.1.4].
///
/// [RFC 8555 §7.1.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.4
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Authorization identifier.
    pub identifier: api::Identifier,

    /// Authorization status.
    pub status: AuthorizationStatus,

    /// The timestamp after which the server will consider this authorization invalid.
    ///
    /// Uses RFC 3339 format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    /// - For pending authorizations, the challenges that the client can fulfill in order to prove
    ///   possession of the identifier.
    /// - For valid authorizations, the challenge that was validated.
    /// - For invalid authorizations, the challenge that was attempted and failed.
    #[serde(default)]
    pub challenges: Vec<api::Challenge>,

    /// Present and true for authorizations created from a wildcard DNS identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wildcard: Option<bool>,

    /// The authorization URL this object was fetched from.
    #[serde(skip)]
    pub location: Option<String>,
}

impl Authorization {
    /// Returns true if authorization was created for a wildcard domain.
    pub fn is_wildcard(&self) -> bool {
        self.wildcard.unwrap_or(false) || self.identifier.is_wildcard()
    }

    /// Whether nothing remains to be done for this identifier: the authorization is already
    /// `valid`, or one of its challenges is.
    pub fn is_satisfied(&self) -> bool {
        self.status == AuthorizationStatus::Valid
            || self.challenges.iter().any(api::Challenge::is_status_valid)
    }

    pub fn is_status_pending(&self) -> bool {
        self.status == AuthorizationStatus::Pending
    }

    /// Returns the first challenge of type `kind`, if one is present.
    pub fn challenge(&self, kind: api::ChallengeType) -> Option<&api::Challenge> {
        self.challenges.iter().find(|c| c.kind() == kind)
    }

    /// Returns an `http-01` challenge, if one is present.
    pub fn http_challenge(&self) -> Option<&api::Challenge> {
        self.challenge(api::ChallengeType::Http01)
    }

    /// Returns a `dns-01` challenge, if one is present.
    pub fn dns_challenge(&self) -> Option<&api::Challenge> {
        self.challenge(api::ChallengeType::Dns01)
    }

    /// The first problem reported by any of the challenges.
    pub fn challenge_error(&self) -> Option<&api::Problem> {
        self.challenges.iter().find_map(|c| c.error.as_ref())
    }
}

impl api::ApiObject for Authorization {
    fn set_location(&mut self, location: String) {
        self.location = Some(location);
    }
}
