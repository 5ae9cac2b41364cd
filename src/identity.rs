use crate::message::RelayError;
use minicbor::data::Type;
use minicbor::encode::Write;
use minicbor::{Decode, Decoder, Encode, Encoder};
use serde::Deserialize;
use sha3::{Digest, Sha3_256};
use std::convert::TryFrom;
use std::fmt::{Debug, Formatter};
use std::str::FromStr;

pub mod key;

pub use key::{KeyError, LocalKey, SponsorKey};

pub const ADDRESS_LENGTH: usize = 32;

/// Signature schemes a ledger account can be controlled by. The discriminant
/// is the flag byte prefixed to public keys and serialized signatures.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum SignatureScheme {
    Ed25519 = 0x00,
    Secp256r1 = 0x02,
}

impl SignatureScheme {
    pub const fn flag(&self) -> u8 {
        *self as u8
    }

    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0x00 => Some(SignatureScheme::Ed25519),
            0x02 => Some(SignatureScheme::Secp256r1),
            _ => None,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            SignatureScheme::Ed25519 => "ed25519",
            SignatureScheme::Secp256r1 => "secp256r1",
        }
    }
}

/// An account on the ledger. Owners, recipients and sponsors are all
/// addresses; an address controlled by a key is the SHA3-256 hash of the
/// scheme flag followed by the public key bytes.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Address([u8; ADDRESS_LENGTH]);

static_assertions::assert_eq_size!([u8; ADDRESS_LENGTH], Address);

impl Address {
    pub const ZERO: Address = Address([0; ADDRESS_LENGTH]);

    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RelayError> {
        let array: [u8; ADDRESS_LENGTH] = bytes
            .try_into()
            .map_err(|_| RelayError::invalid_address(hex::encode(bytes)))?;
        Ok(Self(array))
    }

    pub fn from_public_key(scheme: SignatureScheme, public_key: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update([scheme.flag()]);
        hasher.update(public_key);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Address").field(&self.to_string()).finish()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = RelayError;

    /// Parses `0x`-prefixed (or bare) hexadecimal. Short forms such as `0x2`
    /// are left-padded with zeroes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.is_empty() || digits.len() > ADDRESS_LENGTH * 2 {
            return Err(RelayError::invalid_address(s));
        }

        let padded = format!("{:0>width$}", digits, width = ADDRESS_LENGTH * 2);
        let bytes = hex::decode(padded).map_err(|_| RelayError::invalid_address(s))?;
        Self::from_bytes(&bytes)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = RelayError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes)
    }
}

impl TryFrom<String> for Address {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value)
    }
}

impl PartialEq<&str> for Address {
    fn eq(&self, other: &&str) -> bool {
        Address::from_str(other).map_or(false, |a| a == *self)
    }
}

impl Encode for Address {
    fn encode<W: Write>(
        &self,
        e: &mut Encoder<W>,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?;
        Ok(())
    }
}

impl<'b> Decode<'b> for Address {
    fn decode(d: &mut Decoder<'b>) -> Result<Self, minicbor::decode::Error> {
        match d.datatype()? {
            Type::String => Self::from_str(d.str()?),
            _ => Self::from_bytes(d.bytes()?),
        }
        .map_err(|_e| minicbor::decode::Error::Message("Could not decode address"))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        struct Visitor;
        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = Address;

            fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
                formatter.write_str("address string or bytes")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Address::from_str(v).map_err(E::custom)
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Address::from_bytes(v).map_err(E::custom)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(Visitor)
        } else {
            deserializer.deserialize_bytes(Visitor)
        }
    }
}
