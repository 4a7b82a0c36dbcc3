use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

pub use uuid::Uuid;

/// Milliseconds since the Unix epoch. All persisted timestamps use this unit.
pub type EpochMillis = u64;

/// Number of bytes in a [`ContentHash`].
pub const HASH_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
#[error("expected {HASH_SIZE}-byte hash, got {0} bytes")]
pub struct InvalidHashLength(pub usize);

/// SHA-256 digest identifying file or tree-node content.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; HASH_SIZE]);

impl ContentHash {
    pub const fn zero() -> Self {
        Self([0_u8; HASH_SIZE])
    }

    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, InvalidHashLength> {
        let bytes: [u8; HASH_SIZE] = slice
            .try_into()
            .map_err(|_| InvalidHashLength(slice.len()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Full digests make debug output unreadable; 8 hex chars suffice to
        // tell hashes apart in logs.
        write!(formatter, "ContentHash({}..)", hex::encode(&self.0[..4]))
    }
}

impl FromStr for ContentHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0_u8; HASH_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

macro_rules! uuid_type {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn to_fixed_bytes(self) -> [u8; 16] {
                *self.0.as_bytes()
            }

            pub fn from_fixed_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self(Uuid::nil())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, formatter)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_type! {
    /// Identity of a single imported asset; generated before the asset enters
    /// the import pipeline and stable across its lifetime.
    AssetId
}

uuid_type! {
    /// Identity of a Merkle tree, generated at `create` time and preserved by
    /// every mutation including hard-delete rebuilds.
    TreeId
}

/// Identity of the device whose assets a database tracks. Scopes the tree file
/// location inside the asset store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Infallible> {
        Ok(Self(s.to_owned()))
    }
}
