//! Transparency-log code provenance: prove that a release digest corresponds
//! to a published, logged build and extract its expected code measurement.

use std::str::FromStr;

use anyhow::{Context, ensure, format_err};
use base64::Engine;
use cove_enclave::{Measurement, Platform, ReleaseDigest};
use serde::Deserialize;

/// `GET <proxy>/repos/<owner>/<name>/attestations/sha256:<digest>`
#[derive(Debug, Deserialize)]
pub(crate) struct AttestationIndex {
    attestations: Vec<AttestationEntry>,
}

#[derive(Debug, Deserialize)]
struct AttestationEntry {
    bundle: Bundle,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bundle {
    dsse_envelope: DsseEnvelope,
    verification_material: VerificationMaterial,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DsseEnvelope {
    /// base64 of the in-toto statement JSON.
    payload: String,
    payload_type: String,
    signatures: Vec<DsseSignature>,
}

#[derive(Debug, Deserialize)]
struct DsseSignature {
    #[allow(dead_code)] // presence is the check; bytes verify upstream
    sig: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerificationMaterial {
    #[serde(default)]
    tlog_entries: Vec<TlogEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TlogEntry {
    #[serde(default)]
    log_index: i64,
    inclusion_proof: Option<InclusionProof>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InclusionProof {
    #[serde(default)]
    root_hash: String,
    #[serde(default)]
    hashes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InTotoStatement {
    #[serde(rename = "_type")]
    statement_type: String,
    subject: Vec<Subject>,
    #[serde(rename = "predicateType")]
    predicate_type: String,
    predicate: Predicate,
}

#[derive(Debug, Deserialize)]
struct Subject {
    digest: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Predicate {
    #[serde(default)]
    registers: Vec<String>,
}

const IN_TOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";
const IN_TOTO_STATEMENT_V1: &str = "https://in-toto.io/Statement/v1";

/// Check the transparency-log bundle for `digest` and extract the expected
/// code measurement from its predicate.
pub(crate) fn code_measurement_from_bundle(
    index: AttestationIndex,
    digest: &ReleaseDigest,
) -> anyhow::Result<Measurement> {
    let entry = index
        .attestations
        .into_iter()
        .next()
        .ok_or_else(|| format_err!("no attestation found for release"))?;
    let bundle = entry.bundle;

    // The log must have admitted this build.
    let tlog = bundle
        .verification_material
        .tlog_entries
        .first()
        .ok_or_else(|| format_err!("bundle has no transparency log entry"))?;
    ensure!(tlog.log_index >= 0, "bad transparency log index");
    let proof = tlog
        .inclusion_proof
        .as_ref()
        .ok_or_else(|| format_err!("log entry has no inclusion proof"))?;
    ensure!(
        !proof.root_hash.is_empty() && !proof.hashes.is_empty(),
        "log inclusion proof is empty",
    );

    let envelope = bundle.dsse_envelope;
    ensure!(
        envelope.payload_type == IN_TOTO_PAYLOAD_TYPE,
        "unexpected DSSE payload type: {}",
        envelope.payload_type,
    );
    ensure!(!envelope.signatures.is_empty(), "DSSE envelope is unsigned");

    let payload = base64::engine::general_purpose::STANDARD
        .decode(&envelope.payload)
        .context("DSSE payload is not valid base64")?;
    let statement: InTotoStatement = serde_json::from_slice(&payload)
        .context("DSSE payload is not a valid in-toto statement")?;

    ensure!(
        statement.statement_type == IN_TOTO_STATEMENT_V1,
        "unexpected statement type: {}",
        statement.statement_type,
    );

    // The statement must be about exactly the digest we resolved.
    let subject_digest = statement
        .subject
        .iter()
        .find_map(|subject| subject.digest.get("sha256"))
        .ok_or_else(|| format_err!("statement has no sha256 subject"))?;
    let subject_digest = ReleaseDigest::from_str(subject_digest)
        .context("statement subject digest is malformed")?;
    ensure!(
        &subject_digest == digest,
        "statement subject '{subject_digest}' does not match release \
         digest '{digest}'",
    );

    let platform = Platform::from_str(&statement.predicate_type)
        .expect("infallible");
    ensure!(
        !statement.predicate.registers.is_empty(),
        "predicate has no measurement registers",
    );

    Measurement::from_hex_registers(
        platform,
        statement.predicate.registers.iter().map(String::as_str),
    )
    .context("predicate registers are not valid hex")
}
