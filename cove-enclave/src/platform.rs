//! TEE platform tags.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize, de, ser};

/// The attestation format a measurement was produced under.
///
/// Serialized as the predicate URI carried in attestation documents and
/// transparency-log predicates. Unknown URIs round-trip through
/// [`Platform::Unsupported`] so a newer enclave doesn't fail to parse, only
/// to verify.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Platform {
    /// A multi-platform code measurement: `[SNP, RTMR1, RTMR2]`.
    SnpTdxMultiV1,
    /// An Intel TDX guest, v1 registers: `[MRTD, RTMR0, RTMR1, RTMR2]`.
    TdxGuestV1,
    /// An Intel TDX guest, v2 registers. Positions 2, 3 are `[RTMR1, RTMR2]`.
    TdxGuestV2,
    /// An AMD SEV-SNP guest. Position 0 is the SNP launch measurement.
    SevSnpGuestV1,
    /// Any other (unrecognized) format, carrying the raw tag.
    Unsupported(String),
}

const SNP_TDX_MULTI_V1: &str = "cove.sh/predicate/snp-tdx-multi/v1";
const TDX_GUEST_V1: &str = "cove.sh/predicate/tdx-guest/v1";
const TDX_GUEST_V2: &str = "cove.sh/predicate/tdx-guest/v2";
const SEV_SNP_GUEST_V1: &str = "cove.sh/predicate/sev-snp-guest/v1";

impl Platform {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SnpTdxMultiV1 => SNP_TDX_MULTI_V1,
            Self::TdxGuestV1 => TDX_GUEST_V1,
            Self::TdxGuestV2 => TDX_GUEST_V2,
            Self::SevSnpGuestV1 => SEV_SNP_GUEST_V1,
            Self::Unsupported(tag) => tag.as_str(),
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, Self::SnpTdxMultiV1)
    }

    pub fn is_tdx(&self) -> bool {
        matches!(self, Self::TdxGuestV1 | Self::TdxGuestV2)
    }

    pub fn is_sev_snp(&self) -> bool {
        matches!(self, Self::SevSnpGuestV1)
    }
}

impl FromStr for Platform {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            SNP_TDX_MULTI_V1 => Self::SnpTdxMultiV1,
            TDX_GUEST_V1 => Self::TdxGuestV1,
            TDX_GUEST_V2 => Self::TdxGuestV2,
            SEV_SNP_GUEST_V1 => Self::SevSnpGuestV1,
            other => Self::Unsupported(other.to_owned()),
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Platform {
    fn serialize<S: ser::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: de::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_str(&s).expect("infallible"))
    }
}
