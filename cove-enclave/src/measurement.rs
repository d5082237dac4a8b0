//! Enclave measurements and the platform-aware equality relation.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize, de, ser};
use thiserror::Error;

use crate::platform::Platform;

/// Why two measurements failed to match.
///
/// The `Display` strings are load-bearing: diagnostic UIs route on them, so
/// they must stay stable.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum MeasurementError {
    #[error("multi-platform measurement mismatch")]
    MultiPlatformMismatch,

    #[error("fewer registers than expected")]
    FewerRegistersThanExpected,

    #[error("RTMR1 mismatch")]
    Rtmr1Mismatch,

    #[error("RTMR2 mismatch")]
    Rtmr2Mismatch,

    #[error("multi-platform SEV-SNP measurement mismatch")]
    MultiPlatformSevSnpMismatch,

    #[error(
        "unsupported enclave platform for multi-platform code \
         measurements: {0}"
    )]
    UnsupportedMultiPlatform(String),

    #[error("measurement mismatch")]
    Mismatch,

    #[error("attestation format mismatch")]
    FormatMismatch,
}

/// A single measurement register, canonicalized to lowercase hex at
/// construction so register comparison is always byte-exact.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RegisterHex(String);

impl RegisterHex {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RegisterHex {
    type Err = cove_hex::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Validate, then store canonical lowercase.
        cove_hex::decode(s)?;
        Ok(Self(s.to_ascii_lowercase()))
    }
}

impl fmt::Display for RegisterHex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RegisterHex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

impl Serialize for RegisterHex {
    fn serialize<S: ser::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RegisterHex {
    fn deserialize<D: de::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

/// A platform-tagged enclave measurement: an ordered sequence of hex
/// registers whose semantics depend on the [`Platform`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    platform: Platform,
    registers: Vec<RegisterHex>,
}

impl Measurement {
    pub fn new(platform: Platform, registers: Vec<RegisterHex>) -> Self {
        Self {
            platform,
            registers,
        }
    }

    /// Build a measurement from raw hex register strings, canonicalizing
    /// each one.
    pub fn from_hex_registers<'a>(
        platform: Platform,
        registers: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, cove_hex::DecodeError> {
        let registers = registers
            .into_iter()
            .map(RegisterHex::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(platform, registers))
    }

    /// Build a measurement from raw register bytes.
    pub fn from_register_bytes<'a>(
        platform: Platform,
        registers: impl IntoIterator<Item = &'a [u8]>,
    ) -> Self {
        let registers = registers
            .into_iter()
            .map(|bytes| RegisterHex(cove_hex::encode(bytes)))
            .collect();
        Self::new(platform, registers)
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn registers(&self) -> &[RegisterHex] {
        &self.registers
    }

    /// A stable SHA-256 fingerprint over the measurement's canonical
    /// serialization (`platform|reg0|reg1|…`).
    pub fn fingerprint(&self) -> cove_sha256::Hash {
        let mut ctx = cove_sha256::Context::new();
        ctx.update(self.platform.as_str().as_bytes());
        for register in &self.registers {
            ctx.update(b"|");
            ctx.update(register.as_str().as_bytes());
        }
        ctx.finish()
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.fingerprint())
    }
}

/// Platform-aware measurement equality.
///
/// `code` is the measurement expected from the release's provenance;
/// `runtime` is what the live enclave attested to. A multi-platform
/// measurement is always treated as the reference side: when it shows up on
/// the runtime side the operands are flipped before comparing.
pub fn equal(
    code: &Measurement,
    runtime: &Measurement,
) -> Result<(), MeasurementError> {
    use Platform::*;

    match (&code.platform, &runtime.platform) {
        (SnpTdxMultiV1, SnpTdxMultiV1) =>
            if code.registers == runtime.registers {
                Ok(())
            } else {
                Err(MeasurementError::MultiPlatformMismatch)
            },

        // Flip rule: multi-platform is always the reference side.
        (_, SnpTdxMultiV1) => equal(runtime, code),

        // Multi-platform code vs. a concrete TDX runtime: compare RTMR1 and
        // RTMR2 only. The remaining registers (MRTD, RTMR0) are hardware
        // measurements checked separately.
        (SnpTdxMultiV1, TdxGuestV1 | TdxGuestV2) => {
            if code.registers.len() < 3 || runtime.registers.len() < 4 {
                return Err(MeasurementError::FewerRegistersThanExpected);
            }
            if code.registers[1] != runtime.registers[2] {
                return Err(MeasurementError::Rtmr1Mismatch);
            }
            if code.registers[2] != runtime.registers[3] {
                return Err(MeasurementError::Rtmr2Mismatch);
            }
            Ok(())
        }

        // Multi-platform code vs. a concrete SEV-SNP runtime: compare the
        // launch measurement only.
        (SnpTdxMultiV1, SevSnpGuestV1) => {
            if code.registers.is_empty() || runtime.registers.is_empty() {
                return Err(MeasurementError::FewerRegistersThanExpected);
            }
            if code.registers[0] != runtime.registers[0] {
                return Err(MeasurementError::MultiPlatformSevSnpMismatch);
            }
            Ok(())
        }

        (SnpTdxMultiV1, other) => Err(
            MeasurementError::UnsupportedMultiPlatform(
                other.as_str().to_owned(),
            ),
        ),

        (code_platform, runtime_platform)
            if code_platform == runtime_platform =>
            if code.registers == runtime.registers {
                Ok(())
            } else {
                Err(MeasurementError::Mismatch)
            },

        _ => Err(MeasurementError::FormatMismatch),
    }
}
