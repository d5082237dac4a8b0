//! TDX platform hardware measurements.
//!
//! MRTD and RTMR0 measure the virtual firmware and boot configuration, which
//! belong to the hardware platform rather than the released application
//! code. They are checked against a published registry of known platforms.

use serde::{Deserialize, Serialize};

/// One known-good TDX hardware platform.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HardwareMeasurement {
    /// Registry identifier, e.g. `"tdx-c5-metal-2024q4"`.
    pub id: String,
    /// Hex MRTD of the platform's virtual firmware.
    pub mrtd: String,
    /// Hex RTMR0 of the platform's boot configuration.
    pub rtmr0: String,
}

/// The published registry of known TDX platforms.
#[derive(Debug, Deserialize)]
pub(crate) struct HardwareRegistry {
    pub platforms: Vec<HardwareMeasurement>,
}

impl HardwareRegistry {
    /// Find the platform entry matching the attested MRTD + RTMR0, comparing
    /// case-insensitively on hex.
    pub(crate) fn find(
        &self,
        mrtd: &str,
        rtmr0: &str,
    ) -> Option<HardwareMeasurement> {
        self.platforms
            .iter()
            .find(|platform| {
                platform.mrtd.eq_ignore_ascii_case(mrtd)
                    && platform.rtmr0.eq_ignore_ascii_case(rtmr0)
            })
            .cloned()
    }
}
