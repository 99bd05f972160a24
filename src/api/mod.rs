//! JSON API payloads: the wire schema of ACME.
//!
//! These are the records exchanged with the server. Responses are immutable once received,
//! except for the `location` slots which the client fills from the `Location` response header.

use std::fmt;

use serde::{
    de::DeserializeOwned,
    ser::{SerializeMap as _, Serializer},
    Deserialize, Serialize,
};

mod account;
mod authorization;
mod challenge;
mod directory;
mod identifier;
mod order;
mod requests;

pub use self::{
    account::{Account, AccountStatus},
    authorization::{Authorization, AuthorizationStatus},
    challenge::{Challenge, ChallengeStatus, ChallengeType},
    directory::{Directory, DirectoryMeta},
    identifier::Identifier,
    order::{Order, OrderStatus},
    requests::{Finalize, KeyAuthorization, NewAuthorization, NewOrder, Revocation},
};

/// Response objects that may be addressed by a `Location` header.
///
/// The default implementation ignores the header, for objects (such as the directory) that have
/// no location slot.
pub trait ApiObject: DeserializeOwned {
    fn set_location(&mut self, _location: String) {}
}

/// Serializes to `""`.
///
/// Used as the payload of POST-as-GET requests.
pub struct EmptyString;

impl Serialize for EmptyString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("")
    }
}

/// Serializes to `{}`.
pub struct EmptyObject;

impl Serialize for EmptyObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_map(Some(0))?.end()
    }
}

/// An RFC 7807 problem document (`application/problem+json`).
///
/// See [RFC 8555 §6.7](https://datatracker.ietf.org/doc/html/rfc8555#section-6.7).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// URN identifying the error category, e.g. `urn:ietf:params:acme:error:badNonce`.
    #[serde(rename = "type", default)]
    pub _type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// HTTP status code the server attached to the problem, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subproblems: Option<Vec<Subproblem>>,

    /// The response body the problem was parsed from.
    #[serde(skip)]
    pub raw_json: Option<String>,
}

impl Problem {
    pub fn detail(&self) -> &str {
        self.detail.as_deref().unwrap_or_default()
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self._type),
            _ => write!(f, "{}", self._type),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type")]
    pub _type: String,
    pub detail: Option<String>,
    pub identifier: Option<Identifier>,
}
