//! Crate error type and the ACME problem taxonomy.

use std::fmt;

use crate::api::Problem;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while talking to an ACME server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server answered with an `application/problem+json` document.
    #[error(transparent)]
    Acme(#[from] AcmeError),

    /// Non-success response without a problem document.
    #[error("HTTP {status} from {url}: {body}")]
    Http { url: String, status: u16, body: String },

    /// The HTTP client failed before a response was received.
    #[error("request to {url} failed")]
    Network {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A response that does not have the shape the request calls for.
    #[error("invalid {request} response from {url}: {reason}")]
    InvalidResponse {
        request: &'static str,
        url: String,
        reason: String,
    },

    /// Caller misuse, detected before any network I/O.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A signed request was attempted with an empty nonce pool.
    #[error("no nonce available; HEAD newNonce first")]
    NoNonce,

    #[error("gave up waiting for {what} after {attempts} attempts")]
    Timeout { what: String, attempts: u32 },

    #[error("operation cancelled")]
    Cancelled,

    /// An authorization ended up `invalid`.
    #[error("validation of {identifier} failed{}", fmt_problem(.problem))]
    ValidationFailed {
        identifier: String,
        problem: Option<Problem>,
    },

    /// An order ended in a status other than the one the workflow needs.
    #[error("order {url} is {status}{}", fmt_problem(.problem))]
    OrderFailed {
        url: String,
        status: String,
        problem: Option<Problem>,
    },

    /// A challenge solver could not provision or verify its challenge.
    #[error("challenge for {identifier}: {reason}")]
    Challenge { identifier: String, reason: String },

    /// Key, CSR or certificate handling.
    #[error("{0:#}")]
    Crypto(eyre::Report),
}

fn fmt_problem(problem: &Option<Problem>) -> String {
    match problem {
        Some(problem) => format!(": {problem}"),
        None => String::new(),
    }
}

impl From<eyre::Report> for Error {
    fn from(err: eyre::Report) -> Self {
        Error::Crypto(err)
    }
}

impl Error {
    /// The problem kind, when this error is a protocol error.
    pub fn problem_kind(&self) -> Option<ProblemKind> {
        match self {
            Error::Acme(err) => Some(err.kind),
            _ => None,
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Network failures, HTTP errors without a problem document and the `serverInternal` and
    /// `badNonce` problems are transient. Every other problem has a terminal meaning.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network { .. } | Error::Http { .. } => true,
            Error::Acme(err) => matches!(err.kind, ProblemKind::ServerInternal | ProblemKind::BadNonce),
            _ => false,
        }
    }

    pub(crate) fn invalid_response(
        request: &'static str,
        url: &str,
        reason: impl fmt::Display,
    ) -> Self {
        Error::InvalidResponse {
            request,
            url: url.to_owned(),
            reason: reason.to_string(),
        }
    }
}

/// A problem document returned by the server, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmeError {
    pub kind: ProblemKind,

    /// HTTP status of the response carrying the problem.
    pub status: u16,

    pub problem: Problem,
}

impl AcmeError {
    /// Classifies `problem` by its `type` URN. Never fails: unknown URNs map to
    /// [`ProblemKind::Other`].
    pub fn from_problem(problem: Problem, status: u16) -> Self {
        AcmeError {
            kind: ProblemKind::from_urn(&problem._type),
            status,
            problem,
        }
    }

    /// The raw `type` URN.
    pub fn urn(&self) -> &str {
        &self.problem._type
    }

    pub fn detail(&self) -> &str {
        self.problem.detail()
    }
}

impl fmt::Display for AcmeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ACME problem ({:?}, HTTP {}): {}", self.kind, self.status, self.problem)
    }
}

impl std::error::Error for AcmeError {}

impl Problem {
    pub(crate) fn into_error(self, status: u16) -> Error {
        Error::Acme(AcmeError::from_problem(problem_with_status(self, status), status))
    }
}

fn problem_with_status(mut problem: Problem, status: u16) -> Problem {
    problem.status.get_or_insert(status);
    problem
}

/// Error categories defined in [RFC 8555 §6.7].
///
/// [RFC 8555 §6.7]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ProblemKind {
    AccountDoesNotExist,
    AlreadyRevoked,
    BadCsr,
    BadNonce,
    BadPublicKey,
    BadRevocationReason,
    BadSignatureAlgorithm,
    Caa,
    Connection,
    Dns,
    ExternalAccountRequired,
    IncorrectResponse,
    InvalidContact,
    Malformed,
    OrderNotReady,
    RateLimited,
    RejectedIdentifier,
    ServerInternal,
    Tls,
    Unauthorized,
    UnsupportedContact,
    UnsupportedIdentifier,
    UserActionRequired,

    /// Any URN not in the registry.
    Other,
}

const URN_PREFIX: &str = "urn:ietf:params:acme:error:";

static REGISTRY: &[(&str, ProblemKind)] = &[
    ("urn:ietf:params:acme:error:accountDoesNotExist", ProblemKind::AccountDoesNotExist),
    ("urn:ietf:params:acme:error:alreadyRevoked", ProblemKind::AlreadyRevoked),
    ("urn:ietf:params:acme:error:badCSR", ProblemKind::BadCsr),
    ("urn:ietf:params:acme:error:badNonce", ProblemKind::BadNonce),
    ("urn:ietf:params:acme:error:badPublicKey", ProblemKind::BadPublicKey),
    ("urn:ietf:params:acme:error:badRevocationReason", ProblemKind::BadRevocationReason),
    ("urn:ietf:params:acme:error:badSignatureAlgorithm", ProblemKind::BadSignatureAlgorithm),
    ("urn:ietf:params:acme:error:caa", ProblemKind::Caa),
    ("urn:ietf:params:acme:error:connection", ProblemKind::Connection),
    ("urn:ietf:params:acme:error:dns", ProblemKind::Dns),
    ("urn:ietf:params:acme:error:externalAccountRequired", ProblemKind::ExternalAccountRequired),
    ("urn:ietf:params:acme:error:incorrectResponse", ProblemKind::IncorrectResponse),
    ("urn:ietf:params:acme:error:invalidContact", ProblemKind::InvalidContact),
    ("urn:ietf:params:acme:error:malformed", ProblemKind::Malformed),
    ("urn:ietf:params:acme:error:orderNotReady", ProblemKind::OrderNotReady),
    ("urn:ietf:params:acme:error:rateLimited", ProblemKind::RateLimited),
    ("urn:ietf:params:acme:error:rejectedIdentifier", ProblemKind::RejectedIdentifier),
    ("urn:ietf:params:acme:error:serverInternal", ProblemKind::ServerInternal),
    ("urn:ietf:params:acme:error:tls", ProblemKind::Tls),
    ("urn:ietf:params:acme:error:unauthorized", ProblemKind::Unauthorized),
    ("urn:ietf:params:acme:error:unsupportedContact", ProblemKind::UnsupportedContact),
    ("urn:ietf:params:acme:error:unsupportedIdentifier", ProblemKind::UnsupportedIdentifier),
    ("urn:ietf:params:acme:error:userActionRequired", ProblemKind::UserActionRequired),
];

impl ProblemKind {
    /// Looks up `urn` in the registry, ignoring ASCII case.
    pub fn from_urn(urn: &str) -> Self {
        REGISTRY
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(urn.trim()))
            .map_or(ProblemKind::Other, |&(_, kind)| kind)
    }

    /// The registered URN, or `None` for [`ProblemKind::Other`].
    pub fn urn(self) -> Option<&'static str> {
        REGISTRY
            .iter()
            .find(|&&(_, kind)| kind == self)
            .map(|&(urn, _)| urn)
    }

    /// The URN without the `urn:ietf:params:acme:error:` prefix.
    pub fn short_name(self) -> Option<&'static str> {
        self.urn().map(|urn| &urn[URN_PREFIX.len()..])
    }
}
