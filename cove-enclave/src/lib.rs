//! Typed TEE platform measurements and the cross-platform equality rules used
//! to match a release's code measurement against a live enclave's runtime
//! measurement.

mod digest;
mod measurement;
mod platform;

pub use digest::{ParseDigestError, ReleaseDigest};
pub use measurement::{Measurement, MeasurementError, RegisterHex, equal};
pub use platform::Platform;
