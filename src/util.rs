use base64::prelude::*;
use serde::{de, Deserialize, Deserializer};
use sha2::{Digest as _, Sha256};

/// Unpadded, URL-safe base64 as required everywhere in JOSE/ACME.
pub(crate) fn base64url<T: ?Sized + AsRef<[u8]>>(input: &T) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(input)
}

/// `base64url(SHA-256(input))`.
pub(crate) fn sha256_base64url<T: ?Sized + AsRef<[u8]>>(input: &T) -> String {
    base64url(&Sha256::digest(input.as_ref()))
}

/// Accepts account IDs sent either as JSON numbers (Let's Encrypt) or strings (Pebble et al.).
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(u64),
    }

    match Option::<Id>::deserialize(deserializer) {
        Ok(Some(Id::Str(id))) => Ok(Some(id)),
        Ok(Some(Id::Num(id))) => Ok(Some(id.to_string())),
        Ok(None) => Ok(None),
        Err(err) => Err(de::Error::custom(format!("account id: {err}"))),
    }
}
