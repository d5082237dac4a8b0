//! Shared fixtures for engine integration tests: a synthetic SEV-SNP
//! enclave (report + VCEK-style chain) and an axum backend standing in for
//! the GitHub proxy, the enclave host, and the hardware registry.

use base64::Engine as _;
use x509_parser::prelude::{FromDer, X509Certificate};

// ATTESTATION_REPORT wire layout (restated here; the engine's parser is the
// unit under test).
pub const REPORT_LEN: usize = 0x4a0;
pub const SIGNED_LEN: usize = 0x2a0;
pub const REPORT_DATA_OFFSET: usize = 0x50;
pub const MEASUREMENT_OFFSET: usize = 0x90;
pub const SIGNATURE_OFFSET: usize = SIGNED_LEN;

/// A synthetic SEV-SNP "enclave": a leaf key, its cert chain, and the pinned
/// root fingerprint a verifier should trust.
pub struct SnpEnclave {
    pub chain_pem: String,
    pub root_spki: cove_sha256::Hash,
    leaf_key: ring::signature::EcdsaKeyPair,
    rng: ring::rand::SystemRandom,
}

impl SnpEnclave {
    pub fn generate() -> Self {
        let rng = ring::rand::SystemRandom::new();

        let (_, root_key) = p384_key_pair(&rng);
        let root_params = ca_params("TEST-ARK");
        let root_cert = root_params.clone().self_signed(&root_key).unwrap();
        let root_issuer = rcgen::Issuer::from_params(&root_params, &root_key);

        let (_, inter_key) = p384_key_pair(&rng);
        let inter_params = ca_params("TEST-ASK");
        let inter_cert = inter_params
            .clone()
            .signed_by(&inter_key, &root_issuer)
            .unwrap();
        let inter_issuer = rcgen::Issuer::from_params(&inter_params, &inter_key);

        let (leaf_ring_key, leaf_key) = p384_key_pair(&rng);
        let mut leaf_params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        leaf_params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "TEST-VCEK");
        let leaf_cert =
            leaf_params.signed_by(&leaf_key, &inter_issuer).unwrap();

        let chain_pem = format!(
            "{}{}{}",
            leaf_cert.pem(),
            inter_cert.pem(),
            root_cert.pem(),
        );

        let (_, parsed_root) =
            X509Certificate::from_der(root_cert.der()).unwrap();
        let root_spki =
            cove_sha256::digest(parsed_root.tbs_certificate.subject_pki.raw);

        Self {
            chain_pem,
            root_spki,
            leaf_key: leaf_ring_key,
            rng,
        }
    }

    /// Produce a signed report endorsing `measurement` + `report_data`,
    /// base64-encoded for the attestation document.
    pub fn report_b64(
        &self,
        measurement: [u8; 48],
        report_data: [u8; 64],
    ) -> String {
        let mut report = vec![0u8; REPORT_LEN];
        report[..4].copy_from_slice(&2u32.to_le_bytes());
        report[REPORT_DATA_OFFSET..REPORT_DATA_OFFSET + 64]
            .copy_from_slice(&report_data);
        report[MEASUREMENT_OFFSET..MEASUREMENT_OFFSET + 48]
            .copy_from_slice(&measurement);

        let signature =
            self.leaf_key.sign(&self.rng, &report[..SIGNED_LEN]).unwrap();
        let signature = signature.as_ref();
        let (r_be, s_be) = signature.split_at(48);
        write_le72(&mut report[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 72], r_be);
        write_le72(
            &mut report[SIGNATURE_OFFSET + 72..SIGNATURE_OFFSET + 144],
            s_be,
        );

        base64::engine::general_purpose::STANDARD.encode(report)
    }
}

fn write_le72(out: &mut [u8], be48: &[u8]) {
    for (idx, byte) in be48.iter().enumerate() {
        out[47 - idx] = *byte;
    }
}

fn p384_key_pair(
    rng: &ring::rand::SystemRandom,
) -> (ring::signature::EcdsaKeyPair, rcgen::KeyPair) {
    let pkcs8 = ring::signature::EcdsaKeyPair::generate_pkcs8(
        &ring::signature::ECDSA_P384_SHA384_FIXED_SIGNING,
        rng,
    )
    .unwrap();
    let ring_key = ring::signature::EcdsaKeyPair::from_pkcs8(
        &ring::signature::ECDSA_P384_SHA384_FIXED_SIGNING,
        pkcs8.as_ref(),
        rng,
    )
    .unwrap();
    let rcgen_key = rcgen::KeyPair::try_from(pkcs8.as_ref()).unwrap();
    (ring_key, rcgen_key)
}

fn ca_params(name: &str) -> rcgen::CertificateParams {
    let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, name);
    params
}

/// The report data an honest enclave commits to for its advertised keys.
pub fn bind_keys(
    tls_fingerprint_hex: Option<&str>,
    hpke_public_key_hex: Option<&str>,
) -> [u8; 64] {
    let mut out = [0u8; 64];
    if let Some(fingerprint) = tls_fingerprint_hex {
        let canonical = fingerprint.to_ascii_lowercase();
        out[..32].copy_from_slice(
            cove_sha256::digest(canonical.as_bytes()).as_ref(),
        );
    }
    if let Some(key) = hpke_public_key_hex {
        let canonical = key.to_ascii_lowercase();
        out[32..].copy_from_slice(
            cove_sha256::digest(canonical.as_bytes()).as_ref(),
        );
    }
    out
}

/// A transparency-log bundle whose statement carries `registers` under the
/// multi-platform predicate for `digest_hex`.
pub fn provenance_bundle(
    digest_hex: &str,
    registers: &[&str],
) -> serde_json::Value {
    let statement = serde_json::json!({
        "_type": "https://in-toto.io/Statement/v1",
        "subject": [{ "digest": { "sha256": digest_hex } }],
        "predicateType": "cove.sh/predicate/snp-tdx-multi/v1",
        "predicate": { "registers": registers },
    });
    let payload_b64 = base64::engine::general_purpose::STANDARD
        .encode(serde_json::to_vec(&statement).unwrap());
    serde_json::json!({
        "attestations": [{
            "bundle": {
                "dsseEnvelope": {
                    "payload": payload_b64,
                    "payloadType": "application/vnd.in-toto+json",
                    "signatures": [{ "sig": "c2lnbmF0dXJl" }],
                },
                "verificationMaterial": {
                    "tlogEntries": [{
                        "logIndex": 4242,
                        "inclusionProof": {
                            "rootHash": "aa",
                            "hashes": ["bb", "cc"],
                        },
                    }],
                },
            },
        }],
    })
}

/// Serve fixed JSON bodies for the engine's four endpoints and return the
/// bound `host:port`.
pub async fn spawn_backend(
    release: serde_json::Value,
    bundle: serde_json::Value,
    attestation_doc: serde_json::Value,
    hardware_registry: serde_json::Value,
) -> String {
    use axum::{Json, Router, routing::get};

    let app = Router::new()
        .route(
            "/repos/cove-test/proxy/releases/latest",
            get(move || {
                let release = release.clone();
                async move { Json(release) }
            }),
        )
        .route(
            "/repos/cove-test/proxy/attestations/{subject}",
            get(move || {
                let bundle = bundle.clone();
                async move { Json(bundle) }
            }),
        )
        .route(
            "/.well-known/enclave-attestation",
            get(move || {
                let doc = attestation_doc.clone();
                async move { Json(doc) }
            }),
        )
        .route(
            "/hardware.json",
            get(move || {
                let registry = hardware_registry.clone();
                async move { Json(registry) }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("127.0.0.1:{}", addr.port())
}
