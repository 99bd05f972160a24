mod acme_key;

pub(crate) use self::acme_key::AcmeKey;

/// Enumeration of reasons for revocation.
///
/// The reason codes are taken from [RFC 5280 §5.3.1].
///
/// [RFC 5280 §5.3.1]: https://tools.ietf.org/html/rfc5280#section-5.3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevocationReason {
    #[default]
    Unspecified = 0,
    KeyCompromise = 1,
    CACompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    // value 7 is not used
    RemoveFromCRL = 8,
    PrivilegeWithdrawn = 9,
    AACompromise = 10,
}

impl RevocationReason {
    /// The `reason` member of a revokeCert request.
    pub(crate) fn code(self) -> Option<u8> {
        match self {
            // > the reason code CRL entry extension SHOULD be absent instead of
            // > using the unspecified (0) reasonCode value
            // see <https://datatracker.ietf.org/doc/html/rfc5280#section-5.3.1>
            RevocationReason::Unspecified => None,

            reason => Some(reason as u8),
        }
    }
}
