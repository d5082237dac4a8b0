//! The attestation document a live enclave serves, and its verification into
//! enclave evidence.

use anyhow::{Context, bail, ensure, format_err};
use base64::Engine;
use cove_enclave::{Measurement, Platform};
use serde::Deserialize;

use crate::{snp, snp::SnpRootPolicy, tdx};

/// `GET https://<enclave_host>/.well-known/enclave-attestation`
///
/// Which evidence fields are required depends on `format`; the multi
/// platform format carries both SNP and TDX evidence.
#[derive(Debug, Deserialize)]
pub(crate) struct AttestationDoc {
    pub format: Platform,

    /// base64 of a raw SEV-SNP ATTESTATION_REPORT.
    #[serde(default)]
    pub snp_report: Option<String>,
    /// PEM `[VCEK, ASK, ARK]` chain endorsing `snp_report`.
    #[serde(default)]
    pub vcek_chain: Option<String>,

    /// base64 of a raw TDX quote.
    #[serde(default)]
    pub tdx_quote: Option<String>,
    /// DCAP collateral for `tdx_quote`.
    #[serde(default)]
    pub collateral: Option<serde_json::Value>,

    /// Hex SHA-256 of the enclave's TLS leaf SubjectPublicKeyInfo.
    #[serde(default)]
    pub tls_public_key_fingerprint: Option<String>,
    /// Hex encoding of the enclave's HPKE public key.
    #[serde(default)]
    pub hpke_public_key: Option<String>,
}

/// What `verifyEnclave` hands the rest of the pipeline.
#[derive(Debug)]
pub(crate) struct EnclaveEvidence {
    pub measurement: Measurement,
    /// Claimed TLS fingerprint, bound by the report but not yet parsed;
    /// `validateTLS` owns well-formedness.
    pub tls_fingerprint_hex: Option<String>,
    pub hpke_public_key: Option<Vec<u8>>,
    /// `(mrtd, rtmr0)` for the hardware step, when the evidence contains a
    /// TDX quote.
    pub tdx_hw_registers: Option<(String, String)>,
}

/// Verify the document's platform evidence and key bindings.
pub(crate) fn verify_document(
    doc: AttestationDoc,
    now_unix_secs: i64,
    snp_policy: &SnpRootPolicy,
) -> anyhow::Result<EnclaveEvidence> {
    let expected_report_data = expected_report_data(
        doc.tls_public_key_fingerprint.as_deref(),
        doc.hpke_public_key.as_deref(),
    );

    let (measurement, tdx_hw_registers) = match &doc.format {
        Platform::SevSnpGuestV1 => {
            let report = verify_snp_part(
                &doc,
                now_unix_secs,
                snp_policy,
                &expected_report_data,
            )?;
            let measurement = Measurement::from_register_bytes(
                Platform::SevSnpGuestV1,
                [report.measurement.as_slice()],
            );
            (measurement, None)
        }

        platform @ (Platform::TdxGuestV1 | Platform::TdxGuestV2) => {
            let evidence = verify_tdx_part(
                &doc,
                now_unix_secs,
                &expected_report_data,
            )?;
            let measurement = Measurement::from_register_bytes(
                platform.clone(),
                [
                    evidence.mrtd.as_slice(),
                    evidence.rtmr0.as_slice(),
                    evidence.rtmr1.as_slice(),
                    evidence.rtmr2.as_slice(),
                ],
            );
            let hw = (
                cove_hex::encode(&evidence.mrtd),
                cove_hex::encode(&evidence.rtmr0),
            );
            (measurement, Some(hw))
        }

        Platform::SnpTdxMultiV1 => {
            let report = verify_snp_part(
                &doc,
                now_unix_secs,
                snp_policy,
                &expected_report_data,
            )?;
            let evidence = verify_tdx_part(
                &doc,
                now_unix_secs,
                &expected_report_data,
            )?;
            let measurement = Measurement::from_register_bytes(
                Platform::SnpTdxMultiV1,
                [
                    report.measurement.as_slice(),
                    evidence.rtmr1.as_slice(),
                    evidence.rtmr2.as_slice(),
                ],
            );
            let hw = (
                cove_hex::encode(&evidence.mrtd),
                cove_hex::encode(&evidence.rtmr0),
            );
            (measurement, Some(hw))
        }

        Platform::Unsupported(tag) =>
            bail!("unsupported attestation format: {tag}"),
    };

    let hpke_public_key = doc
        .hpke_public_key
        .as_deref()
        .map(cove_hex::decode)
        .transpose()
        .context("attested HPKE public key is not valid hex")?;

    Ok(EnclaveEvidence {
        measurement,
        tls_fingerprint_hex: doc.tls_public_key_fingerprint,
        hpke_public_key,
        tdx_hw_registers,
    })
}

fn verify_snp_part(
    doc: &AttestationDoc,
    now_unix_secs: i64,
    snp_policy: &SnpRootPolicy,
    expected_report_data: &[u8; 64],
) -> anyhow::Result<snp::SnpReport> {
    let report_b64 = doc
        .snp_report
        .as_deref()
        .ok_or_else(|| format_err!("document is missing snp_report"))?;
    let chain_pem = doc
        .vcek_chain
        .as_deref()
        .ok_or_else(|| format_err!("document is missing vcek_chain"))?;

    let report_bytes = decode_b64(report_b64)
        .context("snp_report is not valid base64")?;
    let report = snp::verify_report(
        &report_bytes,
        chain_pem,
        now_unix_secs,
        snp_policy,
    )?;

    ensure!(
        &report.report_data == expected_report_data,
        "SEV-SNP report does not bind the advertised transport keys",
    );
    Ok(report)
}

fn verify_tdx_part(
    doc: &AttestationDoc,
    now_unix_secs: i64,
    expected_report_data: &[u8; 64],
) -> anyhow::Result<tdx::TdxEvidence> {
    let quote_b64 = doc
        .tdx_quote
        .as_deref()
        .ok_or_else(|| format_err!("document is missing tdx_quote"))?;
    let collateral = doc
        .collateral
        .as_ref()
        .ok_or_else(|| format_err!("document is missing collateral"))?;

    let quote = decode_b64(quote_b64).context("tdx_quote is not valid base64")?;
    let evidence =
        tdx::verify_quote(&quote, collateral, now_unix_secs as u64)?;

    ensure!(
        &evidence.report_data == expected_report_data,
        "TDX report does not bind the advertised transport keys",
    );
    Ok(evidence)
}

/// The report data an honest enclave commits to: the SHA-256 of the
/// canonical (lowercase hex) TLS fingerprint string in the first half, the
/// SHA-256 of the canonical HPKE key string in the second; all-zeros halves
/// for absent keys.
pub(crate) fn expected_report_data(
    tls_fingerprint_hex: Option<&str>,
    hpke_public_key_hex: Option<&str>,
) -> [u8; 64] {
    let mut out = [0u8; 64];
    if let Some(fingerprint) = tls_fingerprint_hex {
        let canonical = fingerprint.to_ascii_lowercase();
        out[..32]
            .copy_from_slice(cove_sha256::digest(canonical.as_bytes()).as_ref());
    }
    if let Some(key) = hpke_public_key_hex {
        let canonical = key.to_ascii_lowercase();
        out[32..]
            .copy_from_slice(cove_sha256::digest(canonical.as_bytes()).as_ref());
    }
    out
}

fn decode_b64(s: &str) -> anyhow::Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(anyhow::Error::from)
}
