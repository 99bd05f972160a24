use serde::{Deserialize, Serialize};

use crate::api;

/// The status of an [`api::Order`].
///
/// `pending`, `ready` and `processing` are transient; `valid` and `invalid` are terminal.
///
/// See [RFC 8555 §7.1.6].
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Valid | OrderStatus::Invalid)
    }
}

/// An ACME order object.
///
/// Represents a client's request for a certificate and is used to track the progress of that order
/// through to issuance.
///
/// See [RFC 8555 §7.1.3].
///
/// [RFC 8555 §7.1.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.3
///
/// # Example JSON
///
/// ```json
/// {
///   "status": "pending",
///   "expires": "2019-01-09T08:26:43.570360537Z",
///   "identifiers": [
///     {
///       "type": "dns",
///       "value": "acmetest.algesten.se"
///     }
///   ],
///   "authorizations": [
///     "https://example.com/acme/authz/YTqpYUthlVfwBncUufE8IRA2TkzZkN4eYWWLMSRqcSs"
///   ],
///   "finalize": "https://example.com/acme/finalize/7738992/18234324"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub status: OrderStatus,

    /// Uses RFC 3339 format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    pub identifiers: Vec<api::Identifier>,

    /// Uses RFC 3339 format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,

    /// Uses RFC 3339 format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,

    /// Why the order is `invalid`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<api::Problem>,

    #[serde(default)]
    pub authorizations: Vec<String>,

    pub finalize: String,

    /// Only present once the order is `valid`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    /// The order URL from the `Location` header of the newOrder response.
    #[serde(skip)]
    pub location: Option<String>,
}

impl Order {
    /// Returns all domains associated with this order.
    pub fn domains(&self) -> Vec<&str> {
        self.identifiers
            .iter()
            .map(|identifier| identifier.value.as_str())
            .collect()
    }

    pub fn is_status_ready(&self) -> bool {
        self.status == OrderStatus::Ready
    }

    pub fn is_status_processing(&self) -> bool {
        self.status == OrderStatus::Processing
    }

    pub fn is_status_valid(&self) -> bool {
        self.status == OrderStatus::Valid
    }

    /// Carries the location over from a previous copy of this order.
    ///
    /// Some servers omit the `Location` header when an order is re-fetched.
    pub(crate) fn retain_location(&mut self, previous: Option<&str>) {
        if self.location.is_none() {
            self.location = previous.map(ToOwned::to_owned);
        }
    }
}

impl api::ApiObject for Order {
    fn set_location(&mut self, location: String) {
        self.location = Some(location);
    }
}
