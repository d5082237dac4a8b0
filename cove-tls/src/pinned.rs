//! Verify a server by its leaf SubjectPublicKeyInfo fingerprint.

use std::fmt::Display;

use rustls::{
    DigitallySignedStruct,
    client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    },
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use thiserror::Error;
use x509_parser::prelude::{FromDer, X509Certificate};

#[derive(Debug, Error)]
pub enum PinnedSpkiError {
    #[error("leaf certificate failed to parse: {0}")]
    BadLeafCert(String),
}

/// Compute the SHA-256 fingerprint of a certificate's DER-encoded
/// SubjectPublicKeyInfo.
pub fn spki_fingerprint(
    cert_der: &[u8],
) -> Result<cove_sha256::Hash, PinnedSpkiError> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|err| PinnedSpkiError::BadLeafCert(err.to_string()))?;
    let spki_der = cert.tbs_certificate.subject_pki.raw;
    Ok(cove_sha256::digest(spki_der))
}

/// A [`ServerCertVerifier`] which accepts exactly one server leaf key.
///
/// The remote presented a leaf during the handshake; we accept it iff the
/// SHA-256 of its DER-encoded SubjectPublicKeyInfo equals the attested
/// fingerprint. CA trust, validity windows, and SNI are intentionally not
/// consulted: the pin is the whole policy, and the TLS 1.3 handshake
/// signature check proves the peer actually holds the pinned key.
#[derive(Debug)]
pub struct PinnedSpkiVerifier {
    expected_fingerprint: cove_sha256::Hash,
}

impl PinnedSpkiVerifier {
    pub fn new(expected_fingerprint: cove_sha256::Hash) -> Self {
        Self {
            expected_fingerprint,
        }
    }
}

impl ServerCertVerifier for PinnedSpkiVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer,
        _intermediates: &[CertificateDer],
        _server_name: &ServerName,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let actual = spki_fingerprint(end_entity.as_ref())
            .map_err(|err| rustls_err(format!("{err:#}")))?;

        if actual != self.expected_fingerprint {
            return Err(rustls_err("Certificate fingerprint mismatch"));
        }

        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        // We intentionally do not support TLSv1.2.
        let error = rustls::PeerIncompatible::ServerDoesNotSupportTls12Or13;
        Err(rustls::Error::PeerIncompatible(error))
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &crate::COVE_SIGNATURE_ALGORITHMS,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        crate::COVE_SUPPORTED_VERIFY_SCHEMES.clone()
    }
}

/// Convenience to create a [`rustls::Error`] from a [`Display`]able object.
fn rustls_err(s: impl Display) -> rustls::Error {
    rustls::Error::General(s.to_string())
}
