use crate::LoRaWANError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// Declares a fixed-size identifier rendered as big-endian hex (the way
/// identifiers are printed and stored) and transmitted little-endian on air.
macro_rules! hex_newtype {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            /// Builds the value from its stored (big-endian) representation.
            pub fn from_slice(b: &[u8]) -> Result<Self, LoRaWANError> {
                if b.len() != $len {
                    return Err(LoRaWANError::InvalidLength {
                        expected: $len,
                        got: b.len(),
                    });
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(b);
                Ok(Self(out))
            }

            /// Builds the value from its over-the-air (little-endian) representation.
            pub fn from_le_slice(b: &[u8]) -> Result<Self, LoRaWANError> {
                let mut v = Self::from_slice(b)?;
                v.0.reverse();
                Ok(v)
            }

            /// Over-the-air (little-endian) encoding.
            pub fn to_le_bytes(&self) -> [u8; $len] {
                let mut out = self.0;
                out.reverse();
                out
            }

            #[inline]
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            #[inline]
            pub fn to_vec(&self) -> Vec<u8> {
                self.0.to_vec()
            }

            #[inline]
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = LoRaWANError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes =
                    hex::decode(s.trim()).map_err(|e| LoRaWANError::InvalidHex(e.to_string()))?;
                Self::from_slice(&bytes)
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(b: [u8; $len]) -> Self {
                Self(b)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = LoRaWANError;

            fn try_from(b: &[u8]) -> Result<Self, Self::Error> {
                Self::from_slice(b)
            }
        }

        impl TryFrom<Vec<u8>> for $name {
            type Error = LoRaWANError;

            fn try_from(b: Vec<u8>) -> Result<Self, Self::Error> {
                Self::from_slice(&b)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

hex_newtype!(
    /// 64-bit extended unique identifier (DevEUI, JoinEUI, gateway id).
    EUI64,
    8
);
hex_newtype!(
    /// 32-bit device (or multicast) address.
    DevAddr,
    4
);
hex_newtype!(
    /// 24-bit network identifier.
    NetID,
    3
);
hex_newtype!(
    /// AES-128 key.
    AES128Key,
    16
);

impl DevAddr {
    #[inline]
    pub fn to_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eui_le_encoding_reverses_bytes() {
        let eui: EUI64 = "0102030405060708".parse().unwrap();
        assert_eq!(eui.to_le_bytes(), [8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(EUI64::from_le_slice(&eui.to_le_bytes()).unwrap(), eui);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            "010203".parse::<DevAddr>(),
            Err(LoRaWANError::InvalidLength {
                expected: 4,
                got: 3
            })
        );
    }

    #[test]
    fn serde_uses_hex_strings() {
        let key = AES128Key([0xab; 16]);
        let s = serde_json::to_string(&key).unwrap();
        assert_eq!(s, format!("\"{}\"", "ab".repeat(16)));
        let back: AES128Key = serde_json::from_str(&s).unwrap();
        assert_eq!(back, key);
    }
}
