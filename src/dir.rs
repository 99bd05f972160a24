use std::borrow::Cow;

const LETSENCRYPT_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETSENCRYPT_STAGING_URL: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Enumeration of known ACME API directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryUrl<'a> {
    /// The main Let's Encrypt directory.
    ///
    /// Not appropriate for testing / development.
    LetsEncrypt,

    /// The staging Let's Encrypt directory.
    ///
    /// Use for testing and development. Doesn't issue "valid" certificates. The root signing
    /// certificate is not supposed to be in any trust chains.
    LetsEncryptStaging,

    /// An arbitrary CA endpoint.
    ///
    /// The directory is fetched from `{endpoint}/directory`, unless the URL already points at
    /// the directory itself.
    Other(&'a str),
}

impl DirectoryUrl<'_> {
    pub(crate) fn to_url(&self) -> Cow<'_, str> {
        match self {
            DirectoryUrl::LetsEncrypt => Cow::Borrowed(LETSENCRYPT_URL),
            DirectoryUrl::LetsEncryptStaging => Cow::Borrowed(LETSENCRYPT_STAGING_URL),
            DirectoryUrl::Other(url) if url.ends_with("/directory") => Cow::Borrowed(url),
            DirectoryUrl::Other(url) => {
                Cow::Owned(format!("{}/directory", url.trim_end_matches('/')))
            }
        }
    }
}
