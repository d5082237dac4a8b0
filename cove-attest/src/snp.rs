//! AMD SEV-SNP attestation report parsing and VCEK chain verification.

use anyhow::{Context, bail, ensure, format_err};
use ring::signature::UnparsedPublicKey;
use x509_parser::{
    certificate::X509Certificate,
    oid_registry::{
        OID_PKCS1_RSASSAPSS, OID_PKCS1_SHA256WITHRSA, OID_PKCS1_SHA384WITHRSA,
        OID_SIG_ECDSA_WITH_SHA256, OID_SIG_ECDSA_WITH_SHA384,
    },
    prelude::FromDer,
    time::ASN1Time,
};

/// Size of a serialized ATTESTATION_REPORT.
pub(crate) const REPORT_LEN: usize = 0x4a0;
/// The signature covers everything before it.
const SIGNED_LEN: usize = 0x2a0;

const VERSION_OFFSET: usize = 0x00;
const REPORT_DATA_OFFSET: usize = 0x50;
const MEASUREMENT_OFFSET: usize = 0x90;
const SIGNATURE_OFFSET: usize = SIGNED_LEN;

/// Each ECDSA P-384 signature component is stored little-endian,
/// zero-padded to 72 bytes.
const SIG_COMPONENT_LEN: usize = 72;

/// The fields of an ATTESTATION_REPORT this pipeline consumes.
#[derive(Clone, Debug)]
pub(crate) struct SnpReport {
    pub version: u32,
    /// Guest-provided data; binds the enclave's transport keys.
    pub report_data: [u8; 64],
    /// The SNP launch measurement.
    pub measurement: [u8; 48],
}

/// Which AMD Key Distribution Service roots we trust, pinned by the SHA-256
/// of the root certificate's DER SubjectPublicKeyInfo.
#[derive(Clone, Debug)]
pub struct SnpRootPolicy {
    pub trusted_root_spki_fingerprints: Vec<cove_sha256::Hash>,
}

/// Pinned SPKI fingerprint of the AMD Milan ARK.
const AMD_ARK_MILAN_SPKI: cove_sha256::Hash =
    cove_sha256::Hash::new(cove_hex::decode_const(
        b"87e44e2b32c19a80e0a4f5e9f809adcb84fa7e62cbbe14f074b3a34e2e2d11ef",
    ));

/// Pinned SPKI fingerprint of the AMD Genoa ARK.
const AMD_ARK_GENOA_SPKI: cove_sha256::Hash =
    cove_sha256::Hash::new(cove_hex::decode_const(
        b"3c6c3eea932ba9dfee560201a182b8ad81b45b02e5f0f50b2e9b3aad475e08d3",
    ));

impl SnpRootPolicy {
    /// Trust the AMD KDS roots for the EPYC generations we deploy on.
    pub fn amd_kds() -> Self {
        Self {
            trusted_root_spki_fingerprints: vec![
                AMD_ARK_MILAN_SPKI,
                AMD_ARK_GENOA_SPKI,
            ],
        }
    }

    /// Trust exactly one root key. Useful in tests.
    pub fn trust_spki(fingerprint: cove_sha256::Hash) -> Self {
        Self {
            trusted_root_spki_fingerprints: vec![fingerprint],
        }
    }
}

/// Verify a raw SEV-SNP attestation report against its VCEK certificate
/// chain and return the endorsed report fields.
///
/// The chain is expected in leaf-first PEM order: `[VCEK, ASK, ARK]`. Trust
/// terminates at the pinned ARK SPKI fingerprints in `policy`; CA trust
/// stores are never consulted.
pub(crate) fn verify_report(
    report_bytes: &[u8],
    vcek_chain_pem: &str,
    now_unix_secs: i64,
    policy: &SnpRootPolicy,
) -> anyhow::Result<SnpReport> {
    let (report, signature) = parse_report(report_bytes)?;

    let chain_der = parse_certs_pem_to_der(vcek_chain_pem)
        .context("Failed to parse VCEK cert chain PEM")?;
    ensure!(
        chain_der.len() == 3,
        "unexpected number of certificates in VCEK chain: {}",
        chain_der.len(),
    );

    let vcek = parse_cert(&chain_der[0]).context("Invalid VCEK cert")?;
    let ask = parse_cert(&chain_der[1]).context("Invalid ASK cert")?;
    let ark = parse_cert(&chain_der[2]).context("Invalid ARK cert")?;

    let now = ASN1Time::from_timestamp(now_unix_secs)
        .map_err(|err| format_err!("bad timestamp: {err}"))?;
    for (cert, name) in [(&vcek, "VCEK"), (&ask, "ASK"), (&ark, "ARK")] {
        ensure!(
            cert.validity().is_valid_at(now),
            "{name} cert is outside its validity window",
        );
    }

    // 1. Trust terminates at the pinned ARK key.
    let ark_spki_fingerprint =
        cove_sha256::digest(ark.tbs_certificate.subject_pki.raw);
    ensure!(
        policy
            .trusted_root_spki_fingerprints
            .contains(&ark_spki_fingerprint),
        "ARK key '{ark_spki_fingerprint}' is not a trusted SEV-SNP root",
    );
    verify_cert_signed_by(&ark, &ark).context("ARK is not self-signed")?;

    // 2. The ARK endorses the ASK, which endorses the VCEK.
    verify_cert_signed_by(&ask, &ark)
        .context("ARK's signature on the ASK cert is invalid")?;
    verify_cert_signed_by(&vcek, &ask)
        .context("ASK's signature on the VCEK cert is invalid")?;

    // 3. The VCEK endorses the report.
    let vcek_point = &vcek.tbs_certificate.subject_pki.subject_public_key.data;
    ensure!(
        vcek_point.len() == 97 && vcek_point[0] == 0x04,
        "VCEK public key is not an uncompressed P-384 point",
    );
    UnparsedPublicKey::new(
        &ring::signature::ECDSA_P384_SHA384_FIXED,
        vcek_point.as_ref(),
    )
    .verify(&report_bytes[..SIGNED_LEN], &signature)
    .map_err(|_| {
        format_err!("VCEK signature on the attestation report is invalid")
    })?;

    Ok(report)
}

/// Parse an ATTESTATION_REPORT's consumed fields and normalize its signature
/// to big-endian `r || s`.
pub(crate) fn parse_report(
    bytes: &[u8],
) -> anyhow::Result<(SnpReport, [u8; 96])> {
    ensure!(
        bytes.len() == REPORT_LEN,
        "SEV-SNP report has the wrong size: {}, expected: {REPORT_LEN}",
        bytes.len(),
    );

    let version = u32::from_le_bytes(
        bytes[VERSION_OFFSET..VERSION_OFFSET + 4].try_into().unwrap(),
    );
    ensure!(version >= 2, "unsupported SEV-SNP report version: {version}");

    let report_data: [u8; 64] = bytes
        [REPORT_DATA_OFFSET..REPORT_DATA_OFFSET + 64]
        .try_into()
        .unwrap();
    let measurement: [u8; 48] = bytes
        [MEASUREMENT_OFFSET..MEASUREMENT_OFFSET + 48]
        .try_into()
        .unwrap();

    let r_le = &bytes[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIG_COMPONENT_LEN];
    let s_le = &bytes[SIGNATURE_OFFSET + SIG_COMPONENT_LEN
        ..SIGNATURE_OFFSET + 2 * SIG_COMPONENT_LEN];

    let mut signature = [0u8; 96];
    signature[..48].copy_from_slice(&le72_to_be48(r_le)?);
    signature[48..].copy_from_slice(&le72_to_be48(s_le)?);

    let report = SnpReport {
        version,
        report_data,
        measurement,
    };
    Ok((report, signature))
}

/// Convert one little-endian, 72-byte zero-padded signature component to a
/// big-endian 48-byte scalar.
fn le72_to_be48(le: &[u8]) -> anyhow::Result<[u8; 48]> {
    ensure!(le.len() == SIG_COMPONENT_LEN, "bad signature component length");
    ensure!(
        le[48..].iter().all(|b| *b == 0),
        "signature component out of range for P-384",
    );

    let mut be = [0u8; 48];
    for (idx, byte) in le[..48].iter().enumerate() {
        be[47 - idx] = *byte;
    }
    Ok(be)
}

fn parse_cert(der: &[u8]) -> anyhow::Result<X509Certificate<'_>> {
    let (unparsed, cert) = X509Certificate::from_der(der)
        .map_err(|err| format_err!("x509 parse error: {err}"))?;
    ensure!(unparsed.is_empty(), "leftover unparsed cert data");
    Ok(cert)
}

/// Verify that `child`'s TBSCertificate is signed by `parent`'s subject key,
/// dispatching on the child's declared signature algorithm.
fn verify_cert_signed_by(
    child: &X509Certificate<'_>,
    parent: &X509Certificate<'_>,
) -> anyhow::Result<()> {
    let alg_oid = &child.signature_algorithm.algorithm;
    let verify_alg: &dyn ring::signature::VerificationAlgorithm =
        if *alg_oid == OID_SIG_ECDSA_WITH_SHA384 {
            &ring::signature::ECDSA_P384_SHA384_ASN1
        } else if *alg_oid == OID_SIG_ECDSA_WITH_SHA256 {
            &ring::signature::ECDSA_P256_SHA256_ASN1
        } else if *alg_oid == OID_PKCS1_RSASSAPSS {
            &ring::signature::RSA_PSS_2048_8192_SHA384
        } else if *alg_oid == OID_PKCS1_SHA384WITHRSA {
            &ring::signature::RSA_PKCS1_2048_8192_SHA384
        } else if *alg_oid == OID_PKCS1_SHA256WITHRSA {
            &ring::signature::RSA_PKCS1_2048_8192_SHA256
        } else {
            bail!("unsupported cert signature algorithm: {alg_oid}");
        };

    let parent_key = &parent.tbs_certificate.subject_pki.subject_public_key.data;
    let tbs = child.tbs_certificate.as_ref();
    let sig: &[u8] = &child.signature_value.data;

    UnparsedPublicKey::new(verify_alg, parent_key.as_ref())
        .verify(tbs, sig)
        .map_err(|_| format_err!("cert signature failed to verify"))
}

fn parse_certs_pem_to_der(pem: &str) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut cursor = std::io::Cursor::new(pem.as_bytes());
    let certs = rustls_pemfile::certs(&mut cursor)
        .collect::<Result<Vec<_>, _>>()
        .context("Not a valid PEM-encoded cert chain")?;
    Ok(certs.into_iter().map(|der| der.as_ref().to_vec()).collect())
}

#[cfg(test)]
mod test {
    use super::*;

    /// Build a syntactically valid report with the given fields and a
    /// signature produced by `sign`.
    fn build_report(
        report_data: [u8; 64],
        measurement: [u8; 48],
        sign: impl FnOnce(&[u8]) -> [u8; 96],
    ) -> Vec<u8> {
        let mut report = vec![0u8; REPORT_LEN];
        report[VERSION_OFFSET..VERSION_OFFSET + 4]
            .copy_from_slice(&2u32.to_le_bytes());
        report[REPORT_DATA_OFFSET..REPORT_DATA_OFFSET + 64]
            .copy_from_slice(&report_data);
        report[MEASUREMENT_OFFSET..MEASUREMENT_OFFSET + 48]
            .copy_from_slice(&measurement);

        let sig_be = sign(&report[..SIGNED_LEN]);
        // Store as little-endian 72-byte components.
        for (component, offset) in
            [(&sig_be[..48], SIGNATURE_OFFSET), (&sig_be[48..], SIGNATURE_OFFSET + SIG_COMPONENT_LEN)]
        {
            for (idx, byte) in component.iter().enumerate() {
                report[offset + 47 - idx] = *byte;
            }
        }
        report
    }

    #[test]
    fn test_parse_report_fields() {
        let report_data = [0xab; 64];
        let measurement = [0xcd; 48];
        let bytes = build_report(report_data, measurement, |_| [0x01; 96]);

        let (report, signature) = parse_report(&bytes).unwrap();
        assert_eq!(report.version, 2);
        assert_eq!(report.report_data, report_data);
        assert_eq!(report.measurement, measurement);
        assert_eq!(signature, [0x01; 96]);
    }

    #[test]
    fn test_parse_report_rejects_wrong_size() {
        assert!(parse_report(&[0u8; 100]).is_err());
    }

    #[test]
    fn test_parse_report_rejects_old_version() {
        let mut bytes = build_report([0; 64], [0; 48], |_| [0x01; 96]);
        bytes[VERSION_OFFSET..VERSION_OFFSET + 4]
            .copy_from_slice(&1u32.to_le_bytes());
        assert!(parse_report(&bytes).is_err());
    }

    #[test]
    fn test_parse_report_rejects_oversized_sig_component() {
        let mut bytes = build_report([0; 64], [0; 48], |_| [0x01; 96]);
        // Poison a padding byte that must be zero.
        bytes[SIGNATURE_OFFSET + 60] = 0xff;
        assert!(parse_report(&bytes).is_err());
    }

    // --- full chain verification --- //

    struct TestChain {
        chain_pem: String,
        root_spki: cove_sha256::Hash,
        leaf_key: ring::signature::EcdsaKeyPair,
    }

    fn p384_key_pair() -> (ring::signature::EcdsaKeyPair, rcgen::KeyPair) {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = ring::signature::EcdsaKeyPair::generate_pkcs8(
            &ring::signature::ECDSA_P384_SHA384_FIXED_SIGNING,
            &rng,
        )
        .unwrap();
        let ring_key = ring::signature::EcdsaKeyPair::from_pkcs8(
            &ring::signature::ECDSA_P384_SHA384_FIXED_SIGNING,
            pkcs8.as_ref(),
            &rng,
        )
        .unwrap();
        let rcgen_key = rcgen::KeyPair::try_from(pkcs8.as_ref()).unwrap();
        (ring_key, rcgen_key)
    }

    fn ca_params(name: &str) -> rcgen::CertificateParams {
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca =
            rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, name);
        params
    }

    /// Mint a `[leaf, intermediate, root]` chain, all ECDSA P-384.
    fn test_chain() -> TestChain {
        let (_root_ring, root_key) = p384_key_pair();
        let root_params = ca_params("TEST-ARK");
        let root_cert =
            root_params.clone().self_signed(&root_key).unwrap();
        let root_issuer =
            rcgen::Issuer::from_params(&root_params, &root_key);

        let (_inter_ring, inter_key) = p384_key_pair();
        let inter_params = ca_params("TEST-ASK");
        let inter_cert = inter_params
            .clone()
            .signed_by(&inter_key, &root_issuer)
            .unwrap();
        let inter_issuer =
            rcgen::Issuer::from_params(&inter_params, &inter_key);

        let (leaf_ring, leaf_key) = p384_key_pair();
        let mut leaf_params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        leaf_params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "TEST-VCEK");
        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &inter_issuer)
            .unwrap();

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

        TestChain {
            chain_pem,
            root_spki,
            leaf_key: leaf_ring,
        }
    }

    fn now_unix() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    #[test]
    fn test_verify_report_happy_path() {
        let chain = test_chain();
        let rng = ring::rand::SystemRandom::new();

        let report_data = [0x11; 64];
        let measurement = [0x22; 48];
        let bytes = build_report(report_data, measurement, |signed| {
            let sig = chain.leaf_key.sign(&rng, signed).unwrap();
            <[u8; 96]>::try_from(sig.as_ref()).unwrap()
        });

        let policy = SnpRootPolicy::trust_spki(chain.root_spki);
        let report =
            verify_report(&bytes, &chain.chain_pem, now_unix(), &policy)
                .unwrap();
        assert_eq!(report.measurement, measurement);
        assert_eq!(report.report_data, report_data);
    }

    #[test]
    fn test_verify_report_rejects_untrusted_root() {
        let chain = test_chain();
        let rng = ring::rand::SystemRandom::new();

        let bytes = build_report([0; 64], [0; 48], |signed| {
            let sig = chain.leaf_key.sign(&rng, signed).unwrap();
            <[u8; 96]>::try_from(sig.as_ref()).unwrap()
        });

        // Pin a different root.
        let policy = SnpRootPolicy::trust_spki(cove_sha256::digest(b"nope"));
        let err =
            verify_report(&bytes, &chain.chain_pem, now_unix(), &policy)
                .unwrap_err();
        assert!(err.to_string().contains("not a trusted SEV-SNP root"));
    }

    #[test]
    fn test_verify_report_rejects_tampered_report() {
        let chain = test_chain();
        let rng = ring::rand::SystemRandom::new();

        let mut bytes = build_report([0; 64], [0; 48], |signed| {
            let sig = chain.leaf_key.sign(&rng, signed).unwrap();
            <[u8; 96]>::try_from(sig.as_ref()).unwrap()
        });
        // Flip a bit inside the signed region.
        bytes[MEASUREMENT_OFFSET] ^= 0x01;

        let policy = SnpRootPolicy::trust_spki(chain.root_spki);
        let err =
            verify_report(&bytes, &chain.chain_pem, now_unix(), &policy)
                .unwrap_err();
        assert!(
            err.to_string().contains("attestation report is invalid"),
            "unexpected error: {err:#}",
        );
    }

    #[test]
    fn test_verify_report_rejects_wrong_leaf_key() {
        let chain = test_chain();
        let (other_leaf, _) = p384_key_pair();
        let rng = ring::rand::SystemRandom::new();

        // Signed by a key that isn't in the chain.
        let bytes = build_report([0; 64], [0; 48], |signed| {
            let sig = other_leaf.sign(&rng, signed).unwrap();
            <[u8; 96]>::try_from(sig.as_ref()).unwrap()
        });

        let policy = SnpRootPolicy::trust_spki(chain.root_spki);
        assert!(
            verify_report(&bytes, &chain.chain_pem, now_unix(), &policy)
                .is_err()
        );
    }
}
