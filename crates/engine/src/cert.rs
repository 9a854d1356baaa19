//! Certificate inspection
//!
//! The engine only needs three facts about a certificate: who issued it,
//! when it expires, and which names it covers.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::trace;
use x509_parser::prelude::*;

use certward_common::{normalize_domain, DomainSet};

use crate::errors::CertError;

/// Facts parsed from a PEM certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Issuer distinguished name, rendered as text
    pub issuer: String,
    pub not_after: DateTime<Utc>,
    /// Subject CN plus DNS subject alternative names
    pub names: DomainSet,
}

impl CertInfo {
    /// Parse the first certificate in a PEM buffer
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self, CertError> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem_bytes)
            .map_err(|e| CertError::Pem(e.to_string()))?;
        let (_, cert) =
            X509Certificate::from_der(&pem.contents).map_err(|e| CertError::X509(e.to_string()))?;

        let issuer = cert.issuer().to_string();
        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or(CertError::Timestamp)?;

        let mut raw_names: Vec<String> = Vec::new();
        for cn in cert.subject().iter_common_name() {
            if let Ok(value) = cn.as_str() {
                push_if_domain(&mut raw_names, value);
            }
        }
        let san = cert
            .subject_alternative_name()
            .map_err(|e| CertError::X509(e.to_string()))?;
        if let Some(san) = san {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    push_if_domain(&mut raw_names, dns);
                }
            }
        }

        Ok(Self {
            issuer,
            not_after,
            names: DomainSet::parse(raw_names)?,
        })
    }

    /// Read and parse a certificate file
    pub fn from_file(path: &Path) -> Result<Self, CertError> {
        let bytes = fs::read(path).map_err(|source| CertError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pem(&bytes)
    }

    /// Whether the issuer carries the test-CA "fake" marker
    pub fn has_fake_issuer(&self) -> bool {
        self.issuer.to_lowercase().contains("fake")
    }

    /// Whether fewer than `days` days remain before `not_after`
    pub fn expires_within(&self, days: u32, now: DateTime<Utc>) -> bool {
        self.not_after - now < chrono::Duration::days(i64::from(days))
    }
}

// Subject CNs are free text; only the ones that look like host names count.
fn push_if_domain(names: &mut Vec<String>, value: &str) {
    match normalize_domain(value) {
        Ok(_) => names.push(value.to_string()),
        Err(e) => trace!(value = %value, error = %e, "Ignoring non-domain certificate name"),
    }
}

/// Split an issued PEM chain into the leaf certificate and the rest
pub fn split_chain(fullchain_pem: &str) -> Result<(String, String), CertError> {
    let blocks = ::pem::parse_many(fullchain_pem).map_err(|e| CertError::Pem(e.to_string()))?;
    let Some((leaf, rest)) = blocks.split_first() else {
        return Err(CertError::Pem("no certificate in issued chain".to_string()));
    };
    Ok((::pem::encode(leaf), ::pem::encode_many(rest)))
}

/// Concatenate a certificate and its chain
pub fn fullchain(cert_pem: &str, chain_pem: &str) -> String {
    let mut out = String::with_capacity(cert_pem.len() + chain_pem.len() + 1);
    out.push_str(cert_pem);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(chain_pem);
    out
}

/// Load a CSR from disk, accepting PEM or DER, and return the DER bytes
pub fn load_csr(path: &Path) -> Result<Vec<u8>, CertError> {
    let bytes = fs::read(path).map_err(|source| CertError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.starts_with(b"-----BEGIN") {
        let parsed = ::pem::parse(&bytes).map_err(|e| CertError::Pem(e.to_string()))?;
        Ok(parsed.into_contents())
    } else {
        Ok(bytes)
    }
}

/// Names requested by a DER-encoded CSR
pub fn csr_domains(csr_der: &[u8]) -> Result<DomainSet, CertError> {
    let (_, csr) =
        X509CertificationRequest::from_der(csr_der).map_err(|e| CertError::X509(e.to_string()))?;

    let mut raw_names: Vec<String> = Vec::new();
    for cn in csr.certification_request_info.subject.iter_common_name() {
        if let Ok(value) = cn.as_str() {
            push_if_domain(&mut raw_names, value);
        }
    }
    if let Some(extensions) = csr.requested_extensions() {
        for ext in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = ext {
                for name in &san.general_names {
                    if let GeneralName::DNSName(dns) = name {
                        push_if_domain(&mut raw_names, dns);
                    }
                }
            }
        }
    }

    Ok(DomainSet::parse(raw_names)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::mint_cert;

    #[test]
    fn test_names_from_sans() {
        let (cert, _) = mint_cert(&["www.a.com", "A.com"], "a.com", 2099);
        let info = CertInfo::from_pem(cert.as_bytes()).unwrap();
        assert_eq!(info.names, DomainSet::parse(["a.com", "www.a.com"]).unwrap());
    }

    #[test]
    fn test_non_domain_cn_is_ignored() {
        let (cert, _) = mint_cert(&["a.com"], "Fake LE Intermediate X1", 2099);
        let info = CertInfo::from_pem(cert.as_bytes()).unwrap();
        assert_eq!(info.names.as_slice(), ["a.com"]);
        assert!(info.has_fake_issuer());
    }

    #[test]
    fn test_expiry_window() {
        let (cert, _) = mint_cert(&["a.com"], "a.com", 2020);
        let info = CertInfo::from_pem(cert.as_bytes()).unwrap();
        assert!(info.expires_within(30, Utc::now()));
        assert!(!info.has_fake_issuer());

        let (cert, _) = mint_cert(&["a.com"], "a.com", 2099);
        let info = CertInfo::from_pem(cert.as_bytes()).unwrap();
        assert!(!info.expires_within(30, Utc::now()));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            CertInfo::from_pem(b"not a certificate"),
            Err(CertError::Pem(_))
        ));
    }

    #[test]
    fn test_split_chain() {
        let (leaf, _) = mint_cert(&["a.com"], "a.com", 2099);
        let (issuer, _) = mint_cert(&["ca.example"], "ca.example", 2099);
        let joined = fullchain(&leaf, &issuer);

        let (cert, chain) = split_chain(&joined).unwrap();
        assert_eq!(
            CertInfo::from_pem(cert.as_bytes()).unwrap().names.as_slice(),
            ["a.com"]
        );
        assert_eq!(
            CertInfo::from_pem(chain.as_bytes()).unwrap().names.as_slice(),
            ["ca.example"]
        );
    }

    #[test]
    fn test_fullchain_inserts_newline() {
        assert_eq!(fullchain("A", "B\n"), "A\nB\n");
        assert_eq!(fullchain("A\n", "B\n"), "A\nB\n");
    }

    #[test]
    fn test_csr_domains() {
        let key = rcgen::KeyPair::generate().unwrap();
        let params =
            rcgen::CertificateParams::new(vec!["a.com".to_string(), "b.com".to_string()]).unwrap();
        let csr = params.serialize_request(&key).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("req.pem");
        fs::write(&path, csr.pem().unwrap()).unwrap();

        let der = load_csr(&path).unwrap();
        assert_eq!(der, csr.der().to_vec());
        let names = csr_domains(&der).unwrap();
        assert_eq!(names, DomainSet::parse(["a.com", "b.com"]).unwrap());
    }
}
