use std::io::{BufReader, Cursor};

use der::{asn1::Ia5String, Decode as _, Encode as _};
use eyre::{eyre, WrapErr as _};
use pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _};
use rsa::{pkcs1v15, RsaPrivateKey};
use sha2::Sha256;
use time::OffsetDateTime;
use x509_cert::{
    builder::{Builder, RequestBuilder as CsrBuilder},
    ext::pkix::{name::GeneralName, SubjectAltName},
    name::Name,
};
use zeroize::Zeroizing;

use crate::error::Result;

/// Key size used for generated account and certificate keys.
pub const DEFAULT_RSA_BITS: usize = 2048;

/// Make an RSA private key (from which we can derive a public key).
pub fn create_rsa_key(bits: usize) -> Result<RsaPrivateKey> {
    let mut csprng = rand::thread_rng();
    Ok(RsaPrivateKey::new(&mut csprng, bits).wrap_err("generate RSA key")?)
}

/// Orders `domains` for a CSR.
///
/// A wildcard never becomes the Common Name while a non-wildcard name is available: when the first
/// name is a wildcard, the first non-wildcard name is moved to the front.
pub(crate) fn csr_names<'a>(domains: &[&'a str]) -> Vec<&'a str> {
    let mut names = domains.to_vec();

    if names.first().is_some_and(|name| name.starts_with('*')) {
        if let Some(idx) = names.iter().position(|name| !name.starts_with('*')) {
            let primary = names.remove(idx);
            names.insert(0, primary);
        }
    }

    names
}

/// Creates a CSR with `domains` and signs it with `key`.
///
/// The primary name (see [`csr_names`]) is picked for the CSR's Common Name (CN). All domains are
/// added to a Subject Alternative Name (SAN) extension.
pub(crate) fn create_csr(
    key: &RsaPrivateKey,
    domains: &[&str],
) -> eyre::Result<x509_cert::request::CertReq> {
    let names = csr_names(domains);
    let primary_domain = names
        .first()
        .ok_or_else(|| eyre!("CSR needs at least one domain"))?;

    let subject = format!("CN={primary_domain}")
        .parse::<Name>()
        .wrap_err_with(|| format!("invalid CSR subject {primary_domain}"))?;

    let signer = pkcs1v15::SigningKey::<Sha256>::new(key.clone());
    let mut csr = CsrBuilder::new(subject, &signer).wrap_err("CSR builder")?;

    let san = names
        .iter()
        .map(|domain| Ia5String::new(domain).map(GeneralName::DnsName))
        .collect::<Result<Vec<_>, _>>()
        .wrap_err("domain is not IA5")?;
    csr.add_extension(&SubjectAltName(san))
        .wrap_err("add SAN extension")?;

    csr.build::<pkcs1v15::Signature>().wrap_err("build csr")
}

/// DER encoding of [`create_csr`], as the finalize request wants it.
pub(crate) fn create_csr_der(key: &RsaPrivateKey, domains: &[&str]) -> eyre::Result<Vec<u8>> {
    create_csr(key, domains)?.to_der().wrap_err("encode csr")
}

/// An issued certificate chain, optionally with the private key it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    private_key_pem: Option<Zeroizing<String>>,
    certificate: String,
    end_entity: x509_cert::Certificate,
}

impl Certificate {
    /// Parses a PEM chain as returned by the CA. The end-entity certificate comes first.
    pub fn parse(certificate: String) -> Result<Self> {
        let chain = pem_chain(&certificate)?;
        let ee = chain
            .first()
            .ok_or_else(|| eyre!("no certificates in chain"))?;
        let end_entity =
            x509_cert::Certificate::from_der(ee).wrap_err("end-entity certificate is not X.509")?;

        Ok(Certificate {
            private_key_pem: None,
            certificate,
            end_entity,
        })
    }

    /// Attaches the private key (PKCS#8 PEM) the certificate was issued for.
    pub fn with_private_key(mut self, private_key_pem: Zeroizing<String>) -> Result<Self> {
        RsaPrivateKey::from_pkcs8_pem(&private_key_pem)
            .map_err(|err| eyre!("invalid private key: {err}"))?;
        self.private_key_pem = Some(private_key_pem);
        Ok(self)
    }

    /// The private key in PEM format, when attached.
    pub fn private_key(&self) -> Option<&str> {
        self.private_key_pem.as_deref().map(String::as_str)
    }

    /// The private key in DER encoding, when attached.
    pub fn private_key_der(&self) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let Some(pem) = &self.private_key_pem else {
            return Ok(None);
        };

        let key = RsaPrivateKey::from_pkcs8_pem(pem).map_err(|err| eyre!("private key: {err}"))?;
        let der = key
            .to_pkcs8_der()
            .map_err(|err| eyre!("private key: {err}"))?;
        Ok(Some(Zeroizing::new(der.as_bytes().to_vec())))
    }

    /// The issued certificate file in PEM format.
    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    /// The issued certificate chain in DER format.
    pub fn certificate_chain(&self) -> Result<Vec<Vec<u8>>> {
        pem_chain(&self.certificate)
    }

    /// The end-entity certificate in DER format.
    pub fn certificate_der(&self) -> Result<Vec<u8>> {
        Ok(self
            .end_entity
            .to_der()
            .wrap_err("encode end-entity certificate")?)
    }

    pub fn end_entity(&self) -> &x509_cert::Certificate {
        &self.end_entity
    }

    /// Inspect the certificate to count the number of (whole) valid days left.
    ///
    /// It's up to the ACME API provider to decide how long an issued certificate is valid.
    /// Let's Encrypt sets the validity to 90 days. This function reports 89 days for newly
    /// issued cert, since it counts _whole_ days.
    ///
    /// It is possible to get negative days for an expired certificate.
    pub fn valid_days_left(&self) -> Result<i64> {
        let not_after = self
            .end_entity
            .tbs_certificate
            .validity
            .not_after
            .to_unix_duration();

        let not_after = i64::try_from(not_after.as_secs())
            .ok()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
            .ok_or_else(|| eyre!("notAfter out of range"))?;

        Ok((not_after - OffsetDateTime::now_utc()).whole_days())
    }
}

fn pem_chain(pem: &str) -> Result<Vec<Vec<u8>>> {
    let mut rdr = BufReader::new(Cursor::new(pem));

    Ok(rustls_pemfile::certs(&mut rdr)
        .map(|res| res.map(|cert| cert.to_vec()))
        .collect::<Result<Vec<_>, _>>()
        .wrap_err("read PEM certificate chain")?)
}
