//! CA certificate handling shared by the SQL and CredHub backends.

use rustls_pki_types::pem::PemObject;
use rustls_pki_types::CertificateDer;
use tracing::debug;

use crate::error::StoreError;

/// A parsed set of trusted CA certificates.
///
/// Built from operator-supplied PEM text, which frequently arrives indented
/// from YAML manifests; leading whitespace on each line is ignored.
#[derive(Clone)]
pub struct CaBundle {
    pem: Vec<u8>,
    certificates: Vec<CertificateDer<'static>>,
}

impl CaBundle {
    /// Parses every `CERTIFICATE` block in `pem`. Each one must be a
    /// certificate usable as a trust anchor.
    ///
    /// `owner` names what the bundle is for and is only used in errors.
    pub fn parse(pem: &str, owner: &str) -> Result<Self, StoreError> {
        let invalid = || StoreError::Connection(format!("invalid CA cert for {owner}"));
        let normalised = normalise_pem(pem);

        let certificates = CertificateDer::pem_slice_iter(normalised.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                debug!(error = %e, owner, "CA bundle is not valid PEM");
                invalid()
            })?;

        if certificates.is_empty() {
            return Err(invalid());
        }
        for cert in &certificates {
            webpki::anchor_from_trusted_cert(cert).map_err(|e| {
                debug!(error = ?e, owner, "CA bundle holds an unusable certificate");
                invalid()
            })?;
        }

        Ok(Self {
            pem: normalised.into_bytes(),
            certificates,
        })
    }

    /// The PEM text with indentation and blank lines removed.
    pub fn pem(&self) -> &[u8] {
        &self.pem
    }

    /// DER encoding of each certificate, in file order.
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

impl std::fmt::Debug for CaBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaBundle")
            .field("certificates", &self.certificates.len())
            .finish()
    }
}

fn normalise_pem(pem: &str) -> String {
    let mut out = String::with_capacity(pem.len());
    for line in pem.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}
