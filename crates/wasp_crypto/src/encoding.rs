//! Lowercase-hex serde adapters for fixed-size key material.
//!
//! All persisted key bytes are JSON strings of lowercase hex; decoding
//! rejects wrong lengths so a truncated key can never round-trip.

use crate::error::CryptoError;

pub fn decode_hex32(s: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(s)?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::Parse("expected 32 hex-encoded bytes".into()))
}

pub fn decode_hex64(s: &str) -> Result<[u8; 64], CryptoError> {
    let bytes = hex::decode(s)?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::Parse("expected 64 hex-encoded bytes".into()))
}

macro_rules! hex_array_mod {
    ($name:ident, $len:expr) => {
        pub mod $name {
            use serde::{Deserialize, Deserializer, Serializer};

            pub fn serialize<S>(bytes: &[u8; $len], serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&hex::encode(bytes))
            }

            pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; $len], D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom(format!("expected {} hex-encoded bytes", $len)))
            }
        }
    };
}

hex_array_mod!(hex32, 32);
hex_array_mod!(hex64, 64);

/// `Option<[u8; 32]>` as an optional hex string.
pub mod opt_hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<[u8; 32]>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => serializer.serialize_some(&hex::encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            None => Ok(None),
            Some(s) => {
                let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("expected 32 hex-encoded bytes"))?;
                Ok(Some(arr))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex32_round_trip() {
        let arr = [0xabu8; 32];
        let s = hex::encode(arr);
        assert_eq!(decode_hex32(&s).unwrap(), arr);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(decode_hex32("abcd").is_err());
        assert!(decode_hex64(&hex::encode([0u8; 32])).is_err());
    }

    #[test]
    fn rejects_non_hex() {
        assert!(decode_hex32("zz").is_err());
    }
}
