//! JSON Web Key and JSON Web Signature handling.
//!
//! See [RFC 8555 §6.2](https://datatracker.ietf.org/doc/html/rfc8555#section-6.2),
//! [RFC 7515](https://datatracker.ietf.org/doc/html/rfc7515) and
//! [RFC 7638](https://datatracker.ietf.org/doc/html/rfc7638).

use eyre::WrapErr as _;
use rsa::{
    signature::{SignatureEncoding as _, Signer as _},
    traits::PublicKeyParts as _,
    RsaPublicKey,
};
use serde::{Deserialize, Serialize};

use crate::{
    acc::AcmeKey,
    error::Result,
    util::{base64url, sha256_base64url},
};

/// The only algorithm this crate signs with: RSASSA-PKCS1-v1_5 using SHA-256.
pub(crate) const ALG_RS256: &str = "RS256";

/// JWS Protected Header as defined in [RFC 8555 §6.2].
///
/// > For newAccount requests, and for revokeCert requests authenticated by a certificate key,
/// there MUST be a "jwk" field. This field MUST contain the public key corresponding to the
/// private key used to sign the JWS.
/// >
/// > For all other requests, the request is signed using an existing account, and there MUST be a
/// "kid" field. This field MUST contain the account URL received by POSTing to the newAccount
/// resource.
///
/// [RFC 8555 §6.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.2
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsProtectedHeader {
    /// Algorithm. Always `RS256`.
    pub alg: String,

    /// JSON Web Key.
    ///
    /// Mutually exclusive with `kid` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,

    /// Key ID, the account URL.
    ///
    /// Mutually exclusive with `jwk` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Anti-replay token, see [RFC 8555 §6.5].
    ///
    /// [RFC 8555 §6.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.5
    pub nonce: String,

    /// The URL this JWS is directed at, see [RFC 8555 §6.4].
    ///
    /// [RFC 8555 §6.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.4
    pub url: String,
}

impl JwsProtectedHeader {
    pub(crate) fn new_jwk(jwk: Jwk, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: ALG_RS256.to_owned(),
            jwk: Some(jwk),
            kid: None,
            nonce,
            url: url.to_owned(),
        }
    }

    pub(crate) fn new_kid(kid: String, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: ALG_RS256.to_owned(),
            jwk: None,
            kid: Some(kid),
            nonce,
            url: url.to_owned(),
        }
    }
}

/// An RSA public key as a JSON Web Key.
///
/// Only `kty`, `n` and `e` take part in the [thumbprint](Jwk::thumbprint); the optional members
/// are carried for completeness when a server echoes a key back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Public exponent, base64url big-endian.
    pub e: String,

    /// Key type. `RSA` for every key this crate produces.
    pub kty: String,

    /// Modulus, base64url big-endian.
    pub n: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub _use: Option<String>,
}

impl Jwk {
    /// JWK thumbprint ([RFC 7638]): `base64url(SHA-256(canonical JSON of {e, kty, n}))`.
    ///
    /// [RFC 7638]: https://datatracker.ietf.org/doc/html/rfc7638
    pub fn thumbprint(&self) -> Result<String> {
        let jwk_json = serde_json::to_string(&JwkThumb::from(self))
            .wrap_err("serialize JWK thumbprint input")?;
        Ok(sha256_base64url(&jwk_json))
    }
}

impl From<&RsaPublicKey> for Jwk {
    fn from(key: &RsaPublicKey) -> Self {
        Jwk {
            e: base64url(&key.e().to_bytes_be()),
            kty: "RSA".to_owned(),
            n: base64url(&key.n().to_bytes_be()),
            alg: None,
            kid: None,
            _use: None,
        }
    }
}

#[derive(Debug, Serialize)]
// LEXICAL ORDER OF FIELDS MATTER!
struct JwkThumb<'a> {
    e: &'a str,
    kty: &'a str,
    n: &'a str,
}

impl<'a> From<&'a Jwk> for JwkThumb<'a> {
    fn from(jwk: &'a Jwk) -> Self {
        JwkThumb {
            e: &jwk.e,
            kty: &jwk.kty,
            n: &jwk.n,
        }
    }
}

/// <https://datatracker.ietf.org/doc/html/rfc7515#section-7.2.2>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenedJsonJws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

/// Signs `payload` for `url` with the account key.
///
/// The protected header carries `kid` once the account URL is known to `key`, and the full `jwk`
/// before that.
pub(crate) fn encode<T: Serialize + ?Sized>(
    key: &AcmeKey,
    url: &str,
    nonce: String,
    payload: &T,
) -> Result<FlattenedJsonJws> {
    let protected = match key.key_id() {
        Some(kid) => JwsProtectedHeader::new_kid(kid, url, nonce),
        None => JwsProtectedHeader::new_jwk(key.jwk().clone(), url, nonce),
    };

    sign(key, &protected, payload)
}

/// Construct JWS with protected header according to [RFC 7515 §5.1].
///
/// [RFC 7515 §5.1]: https://datatracker.ietf.org/doc/html/rfc7515#section-5.1
fn sign<T: Serialize + ?Sized>(
    key: &AcmeKey,
    protected: &JwsProtectedHeader,
    payload: &T,
) -> Result<FlattenedJsonJws> {
    let protected = {
        let pro_json = serde_json::to_string(protected).wrap_err("serialize JWS header")?;
        base64url(&pro_json)
    };

    let payload = {
        let payload_json = serde_json::to_string(payload).wrap_err("serialize JWS payload")?;

        // HACK: empty string detection is bad way to do this
        if payload_json == "\"\"" {
            // This is a special case produced by api::EmptyString (POST-as-GET) and should
            // not be further base64url encoded.
            String::new()
        } else {
            base64url(&payload_json)
        }
    };

    let to_sign = format!("{protected}.{payload}");
    let signature = key
        .signing_key()
        .try_sign(to_sign.as_bytes())
        .wrap_err("RS256 signing failed")?;

    Ok(FlattenedJsonJws {
        protected,
        payload,
        signature: base64url(&signature.to_bytes()),
    })
}
