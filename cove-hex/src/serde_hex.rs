//! [`serde`] serialize and deserialize helpers for byte types that should be
//! hex-encoded in human-readable formats and raw bytes in binary codecs.
//!
//! ## Example:
//!
//! ```rust
//! use cove_hex::serde_hex;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Foo(#[serde(with = "serde_hex")] Vec<u8>);
//! ```

use std::{fmt, marker::PhantomData};

use serde::{Deserializer, Serializer, de, ser};

use crate::FromHex;

pub fn serialize<S, T>(data: T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: ser::Serialize + AsRef<[u8]>,
{
    if serializer.is_human_readable() {
        let s = crate::encode(data.as_ref());
        serializer.serialize_str(&s)
    } else {
        data.serialize(serializer)
    }
}

pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: de::Deserialize<'de> + FromHex,
{
    struct HexVisitor<T>(PhantomData<T>);

    impl<T: FromHex> de::Visitor<'_> for HexVisitor<T> {
        type Value = T;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("expecting hex string")
        }

        fn visit_str<E: de::Error>(self, s: &str) -> Result<Self::Value, E> {
            T::from_hex(s).map_err(de::Error::custom)
        }
    }

    if deserializer.is_human_readable() {
        deserializer.deserialize_str(HexVisitor(PhantomData))
    } else {
        T::deserialize(deserializer)
    }
}

/// Helpers for `Option<T>` fields, e.g.
/// `#[serde(with = "serde_hex::option")] Option<Vec<u8>>`.
pub mod option {
    use serde::{Deserialize, Deserializer, Serializer, de, ser};

    use crate::FromHex;

    pub fn serialize<S, T>(
        data: &Option<T>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: ser::Serialize + AsRef<[u8]>,
    {
        match data {
            Some(data) if serializer.is_human_readable() =>
                serializer.serialize_some(&crate::encode(data.as_ref())),
            Some(data) => serializer.serialize_some(data),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(
        deserializer: D,
    ) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: de::Deserialize<'de> + FromHex,
    {
        if deserializer.is_human_readable() {
            let maybe_s = Option::<String>::deserialize(deserializer)?;
            maybe_s
                .map(|s| T::from_hex(&s).map_err(de::Error::custom))
                .transpose()
        } else {
            Option::<T>::deserialize(deserializer)
        }
    }
}
