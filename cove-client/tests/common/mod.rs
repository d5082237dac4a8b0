//! Shared fixtures for client integration tests: a synthetic SEV-SNP
//! enclave with a working HPKE endpoint, fronted by a local axum backend
//! that also plays the GitHub proxy.

#![allow(dead_code)] // not every test file uses every helper

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::{get, post},
};
use base64::Engine as _;
use hpke::{
    Deserializable, Kem as KemTrait, OpModeR, OpModeS, Serializable,
    aead::AesGcm128, kdf::HkdfSha256, kem::X25519HkdfSha256,
};
use rand_core::OsRng;
use x509_parser::prelude::{FromDer, X509Certificate};

type Kem = X25519HkdfSha256;
type Kdf = HkdfSha256;
type Aead = AesGcm128;

pub const REQUEST_INFO: &[u8] = b"ehbp request";
pub const RESPONSE_INFO: &[u8] = b"ehbp response";

// ATTESTATION_REPORT wire layout, restated for fixture building.
const REPORT_LEN: usize = 0x4a0;
const SIGNED_LEN: usize = 0x2a0;
const REPORT_DATA_OFFSET: usize = 0x50;
const MEASUREMENT_OFFSET: usize = 0x90;
const SIGNATURE_OFFSET: usize = SIGNED_LEN;

pub const DIGEST_HEX: &str =
    "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

/// A synthetic SEV-SNP enclave with a live HPKE identity.
pub struct TestEnclave {
    pub chain_pem: String,
    pub root_spki: cove_sha256::Hash,
    pub hpke_public_key_hex: String,
    pub measurement_hex: String,
    hpke_secret_key: <Kem as KemTrait>::PrivateKey,
    hpke_public_key: <Kem as KemTrait>::PublicKey,
    leaf_key: ring::signature::EcdsaKeyPair,
    rng: ring::rand::SystemRandom,
}

impl TestEnclave {
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

        let (hpke_secret_key, hpke_public_key) = Kem::gen_keypair(&mut OsRng);
        let hpke_public_key_hex =
            cove_hex::encode(&hpke_public_key.to_bytes());

        Self {
            chain_pem,
            root_spki,
            hpke_public_key_hex,
            measurement_hex: "5a".repeat(48),
            hpke_secret_key,
            hpke_public_key,
            leaf_key: leaf_ring_key,
            rng,
        }
    }

    pub fn hpke_public_key_bytes(&self) -> Vec<u8> {
        self.hpke_public_key.to_bytes().to_vec()
    }

    /// The attestation document this enclave serves, binding its HPKE key
    /// (and no TLS fingerprint).
    pub fn attestation_doc(&self) -> serde_json::Value {
        self.attestation_doc_with_key_hex(&self.hpke_public_key_hex)
    }

    /// Like [`attestation_doc`](Self::attestation_doc), but attesting to an
    /// arbitrary key hex (for pin-mismatch scenarios).
    pub fn attestation_doc_with_key_hex(
        &self,
        hpke_key_hex: &str,
    ) -> serde_json::Value {
        let mut report_data = [0u8; 64];
        report_data[32..].copy_from_slice(
            cove_sha256::digest(hpke_key_hex.to_ascii_lowercase().as_bytes())
                .as_ref(),
        );

        let mut measurement = [0u8; 48];
        cove_hex::decode_to_slice(&self.measurement_hex, &mut measurement)
            .unwrap();

        serde_json::json!({
            "format": "cove.sh/predicate/sev-snp-guest/v1",
            "snp_report": self.report_b64(measurement, report_data),
            "vcek_chain": self.chain_pem,
            "hpke_public_key": hpke_key_hex,
        })
    }

    /// A document attesting to a TLS fingerprint only (no HPKE key), for
    /// exercising the pinned-TLS selection paths.
    pub fn attestation_doc_tls_only(&self, tls_fp_hex: &str) -> serde_json::Value {
        let mut report_data = [0u8; 64];
        report_data[..32].copy_from_slice(
            cove_sha256::digest(tls_fp_hex.to_ascii_lowercase().as_bytes())
                .as_ref(),
        );

        let mut measurement = [0u8; 48];
        cove_hex::decode_to_slice(&self.measurement_hex, &mut measurement)
            .unwrap();

        serde_json::json!({
            "format": "cove.sh/predicate/sev-snp-guest/v1",
            "snp_report": self.report_b64(measurement, report_data),
            "vcek_chain": self.chain_pem,
            "tls_public_key_fingerprint": tls_fp_hex,
        })
    }

    /// The provenance bundle matching this enclave's measurement.
    pub fn provenance_bundle(&self) -> serde_json::Value {
        let statement = serde_json::json!({
            "_type": "https://in-toto.io/Statement/v1",
            "subject": [{ "digest": { "sha256": DIGEST_HEX } }],
            "predicateType": "cove.sh/predicate/snp-tdx-multi/v1",
            "predicate": {
                "registers": [
                    self.measurement_hex,
                    "11".repeat(48),
                    "22".repeat(48),
                ],
            },
        });
        let payload_b64 = base64::engine::general_purpose::STANDARD
            .encode(serde_json::to_vec(&statement).unwrap());
        serde_json::json!({
            "attestations": [{
                "bundle": {
                    "dsseEnvelope": {
                        "payload": payload_b64,
                        "payloadType": "application/vnd.in-toto+json",
                        "signatures": [{ "sig": "c2ln" }],
                    },
                    "verificationMaterial": {
                        "tlogEntries": [{
                            "logIndex": 7,
                            "inclusionProof": {
                                "rootHash": "aa",
                                "hashes": ["bb"],
                            },
                        }],
                    },
                },
            }],
        })
    }

    fn report_b64(
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
        let (r_be, s_be) = signature.as_ref().split_at(48);
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

/// Shared state for the test backend.
pub struct Backend {
    /// The enclave's HPKE secret key, so the echo endpoint can decrypt.
    hpke_secret_key: <Kem as KemTrait>::PrivateKey,
    /// The key config bytes served at `/.well-known/hpke-keys`.
    key_config: Vec<u8>,
    pub key_fetches: AtomicUsize,
    pub release_fetches: AtomicUsize,
}

/// Encode one RFC 9458 key config for an X25519 public key.
pub fn encode_ohttp_keys(public_key: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(1u8); // key id
    body.extend_from_slice(&0x0020u16.to_be_bytes()); // X25519-HKDF-SHA256
    body.extend_from_slice(public_key);
    body.extend_from_slice(&4u16.to_be_bytes()); // one suite
    body.extend_from_slice(&0x0001u16.to_be_bytes()); // HKDF-SHA256
    body.extend_from_slice(&0x0001u16.to_be_bytes()); // AES-128-GCM

    let mut out = Vec::with_capacity(2 + body.len());
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

/// Stand up the full backend (GitHub proxy + enclave endpoints) for one
/// enclave. `served_key` lets a test serve a different key than the
/// attested one. Returns `(host, backend)`.
pub async fn spawn_backend(
    enclave: &TestEnclave,
    attestation_doc: serde_json::Value,
    served_key: Vec<u8>,
) -> (String, Arc<Backend>) {
    let backend = Arc::new(Backend {
        hpke_secret_key: enclave.hpke_secret_key.clone(),
        key_config: encode_ohttp_keys(&served_key),
        key_fetches: AtomicUsize::new(0),
        release_fetches: AtomicUsize::new(0),
    });

    let release = serde_json::json!({
        "tag_name": "v0.9.1",
        "body": format!("EIF hash: {DIGEST_HEX}"),
    });
    let bundle = enclave.provenance_bundle();

    let app = Router::new()
        .route(
            "/repos/cove-test/proxy/releases/latest",
            get({
                let backend = backend.clone();
                move || {
                    backend.release_fetches.fetch_add(1, Ordering::SeqCst);
                    let release = release.clone();
                    async move { Json(release) }
                }
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
        .route("/hardware.json", get(|| async {
            Json(serde_json::json!({ "platforms": [] }))
        }))
        .route("/.well-known/hpke-keys", get(serve_keys))
        .route("/v1/echo", post(echo_encrypted))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("127.0.0.1:{}", addr.port()), backend)
}

async fn serve_keys(State(backend): State<Arc<Backend>>) -> impl IntoResponse {
    backend.key_fetches.fetch_add(1, Ordering::SeqCst);
    (
        [(CONTENT_TYPE, "application/ohttp-keys")],
        backend.key_config.clone(),
    )
}

/// Decrypt the request body with the enclave key and echo it back,
/// uppercased, sealed to the client's ephemeral key.
async fn echo_encrypted(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let b64 = base64::engine::general_purpose::STANDARD;

    let encapped_b64 = headers
        .get("ehbp-encapsulated-key")
        .unwrap()
        .to_str()
        .unwrap();
    let encapped_key = <Kem as KemTrait>::EncappedKey::from_bytes(
        &b64.decode(encapped_b64).unwrap(),
    )
    .unwrap();
    let mut ctx = hpke::setup_receiver::<Aead, Kdf, Kem>(
        &OpModeR::Base,
        &backend.hpke_secret_key,
        &encapped_key,
        REQUEST_INFO,
    )
    .unwrap();
    let plaintext = ctx.open(&body, b"").unwrap();

    let response_body = plaintext.to_ascii_uppercase();

    let client_pk_b64 = headers
        .get("ehbp-client-public-key")
        .unwrap()
        .to_str()
        .unwrap();
    let client_pk = <Kem as KemTrait>::PublicKey::from_bytes(
        &b64.decode(client_pk_b64).unwrap(),
    )
    .unwrap();
    let (encapped_response, mut ctx) = hpke::setup_sender::<Aead, Kdf, Kem, _>(
        &OpModeS::Base,
        &client_pk,
        RESPONSE_INFO,
        &mut OsRng,
    )
    .unwrap();
    let ciphertext = ctx.seal(&response_body, b"").unwrap();

    (
        StatusCode::OK,
        [(
            "ehbp-encapsulated-key",
            b64.encode(encapped_response.to_bytes()),
        )],
        ciphertext,
    )
}
