//! TLS presets and the pinned-leaf-key verifier used to talk to enclaves.
//!
//! The pinned verifier ignores CA trust entirely: the attestation already
//! told us exactly which leaf key the enclave holds, so the only check that
//! matters is that the presented leaf's SubjectPublicKeyInfo hashes to the
//! attested fingerprint and that the peer proves possession of that key in
//! the handshake.

use std::sync::{Arc, LazyLock};

/// Allow accessing [`rustls`] via `cove_tls::rustls`.
pub use rustls;
use rustls::{ClientConfig, crypto::WebPkiSupportedAlgorithms};
/// Allow accessing [`webpki_roots`] via `cove_tls::webpki_roots`.
pub use webpki_roots;

mod pinned;

pub use pinned::{PinnedSpkiError, PinnedSpkiVerifier, spki_fingerprint};

/// Cove TLS protocol versions: TLSv1.3 only.
pub static COVE_TLS_PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] =
    &[&rustls::version::TLS13];

/// Cove default value for [`ClientConfig::alpn_protocols`]:
/// HTTP/2 and HTTP/1.1.
pub static COVE_ALPN_PROTOCOLS: LazyLock<Vec<Vec<u8>>> =
    LazyLock::new(|| vec!["h2".into(), "http/1.1".into()]);

/// Our [`rustls::crypto::CryptoProvider`].
/// Use this instead of [`rustls::crypto::ring::default_provider`].
pub static COVE_CRYPTO_PROVIDER: LazyLock<Arc<rustls::crypto::CryptoProvider>> =
    LazyLock::new(|| {
        Arc::new(rustls::crypto::ring::default_provider())
    });

/// The signature verification algorithms we accept in handshakes. Enclave
/// leaf keys are commonly ECDSA P-256, but nothing here depends on that.
pub static COVE_SIGNATURE_ALGORITHMS: LazyLock<WebPkiSupportedAlgorithms> =
    LazyLock::new(|| COVE_CRYPTO_PROVIDER.signature_verification_algorithms);

/// The value to pass to
/// [`ServerCertVerifier::supported_verify_schemes`](rustls::client::danger::ServerCertVerifier::supported_verify_schemes).
pub static COVE_SUPPORTED_VERIFY_SCHEMES: LazyLock<
    Vec<rustls::SignatureScheme>,
> = LazyLock::new(|| {
    COVE_SIGNATURE_ALGORITHMS
        .mapping
        .iter()
        .map(|(sigscheme, _sig_verify_alg)| *sigscheme)
        .collect()
});

/// Helper to get a builder for a [`ClientConfig`] with Cove's presets.
/// NOTE: Remember: Set `alpn_protocols` to [`COVE_ALPN_PROTOCOLS`] afterwards!
pub fn client_config_builder()
-> rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier> {
    ClientConfig::builder_with_provider(COVE_CRYPTO_PROVIDER.clone())
        .with_protocol_versions(COVE_TLS_PROTOCOL_VERSIONS)
        .expect("Checked in tests")
}

/// A [`ClientConfig`] which accepts exactly the server leaf whose SPKI
/// hashes to `expected_fingerprint`.
pub fn pinned_client_config(
    expected_fingerprint: cove_sha256::Hash,
) -> ClientConfig {
    let verifier = PinnedSpkiVerifier::new(expected_fingerprint);
    let mut config = client_config_builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    config.alpn_protocols = COVE_ALPN_PROTOCOLS.clone();
    config
}

/// Mozilla's webpki roots as a lazily-initialized [`rustls::RootCertStore`].
///
/// Ordinary HTTPS fetches (release index, key discovery) trust the Mozilla
/// roots; we add the anchors manually instead of enabling reqwest's
/// `rustls-tls-webpki-roots` feature, which would propagate to other crates
/// via feature unification.
pub static WEBPKI_ROOT_CERTS: LazyLock<Arc<rustls::RootCertStore>> =
    LazyLock::new(|| {
        let roots = webpki_roots::TLS_SERVER_ROOTS.to_vec();
        Arc::new(rustls::RootCertStore { roots })
    });

/// A [`ClientConfig`] trusting the Mozilla webpki roots, for
/// non-enclave-terminated fetches.
pub fn webpki_client_config() -> ClientConfig {
    let mut config = client_config_builder()
        .with_root_certificates(WEBPKI_ROOT_CERTS.as_ref().clone())
        .with_no_client_auth();
    config.alpn_protocols = COVE_ALPN_PROTOCOLS.clone();
    config
}
