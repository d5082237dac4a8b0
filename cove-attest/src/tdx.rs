//! Intel TDX quote verification via DCAP quote + collateral.

use anyhow::{Context, ensure, format_err};

/// TCB statuses we accept from a verified quote. Anything else (e.g.
/// `OutOfDate`, `Revoked`) fails verification.
const ACCEPTED_TCB_STATUSES: &[&str] = &[
    "UpToDate",
    "SWHardeningNeeded",
    "ConfigurationNeeded",
    "ConfigurationAndSWHardeningNeeded",
];

/// The TD 1.0 report fields this pipeline consumes.
#[derive(Clone, Debug)]
pub(crate) struct TdxEvidence {
    pub mrtd: [u8; 48],
    pub rtmr0: [u8; 48],
    pub rtmr1: [u8; 48],
    pub rtmr2: [u8; 48],
    /// Guest-provided data; binds the enclave's transport keys.
    pub report_data: [u8; 64],
}

/// Verify a raw TDX quote against its DCAP collateral and return the
/// endorsed TD report fields. The Intel SGX/TDX root of trust is embedded in
/// the verifier library.
pub(crate) fn verify_quote(
    quote: &[u8],
    collateral: &serde_json::Value,
    now_unix_secs: u64,
) -> anyhow::Result<TdxEvidence> {
    let collateral: dcap_qvl::QuoteCollateralV3 =
        serde_json::from_value(collateral.clone())
            .context("TDX collateral failed to parse")?;

    let verified = dcap_qvl::verify::verify(quote, &collateral, now_unix_secs)
        .map_err(|err| format_err!("TDX quote failed to verify: {err:?}"))?;

    ensure!(
        ACCEPTED_TCB_STATUSES.contains(&verified.status.as_str()),
        "TDX platform TCB status '{}' is not acceptable",
        verified.status,
    );

    let td10 = verified
        .report
        .as_td10()
        .ok_or_else(|| format_err!("quote does not contain a TD 1.0 report"))?;

    Ok(TdxEvidence {
        mrtd: td10.mr_td,
        rtmr0: td10.rt_mr0,
        rtmr1: td10.rt_mr1,
        rtmr2: td10.rt_mr2,
        report_data: td10.report_data,
    })
}
