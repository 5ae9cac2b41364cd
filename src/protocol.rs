use crate::message::RelayError;
use minicbor::data::{Tag, Type};
use minicbor::encode::{Error, Write};
use minicbor::{Decode, Decoder, Encode, Encoder};
use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

pub mod intent;

pub const DIGEST_LENGTH: usize = 32;

macro_rules! hash_type {
    ( $( $(#[$doc: meta])* $name: ident; )* ) => {
        $(
            $(#[$doc])*
            #[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
            pub struct $name([u8; DIGEST_LENGTH]);

            impl $name {
                pub const fn new(bytes: [u8; DIGEST_LENGTH]) -> Self {
                    Self(bytes)
                }

                pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
                    bytes.try_into().ok().map(Self)
                }

                pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
                    &self.0
                }
            }

            impl Display for $name {
                fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                    write!(f, "0x{}", hex::encode(self.0))
                }
            }

            impl Debug for $name {
                fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                    f.debug_tuple(stringify!($name)).field(&self.to_string()).finish()
                }
            }

            impl Encode for $name {
                fn encode<W: Write>(&self, e: &mut Encoder<W>) -> Result<(), Error<W::Error>> {
                    e.bytes(&self.0)?;
                    Ok(())
                }
            }

            impl<'b> Decode<'b> for $name {
                fn decode(d: &mut Decoder<'b>) -> Result<Self, minicbor::decode::Error> {
                    Self::from_bytes(d.bytes()?).ok_or(minicbor::decode::Error::Message(
                        concat!("Invalid length for ", stringify!($name)),
                    ))
                }
            }
        )*
    };
}

hash_type! {
    /// Identifies a ledger object across all its versions.
    ObjectId;
    /// Content digest of one version of an object.
    ObjectDigest;
    /// Digest of an executed transaction, returned by the node on success.
    TransactionDigest;
}

/// Encode a balance compactly: as an unsigned integer when it fits 64 bits,
/// as a positive bignum otherwise.
pub(crate) fn encode_u128<W: Write>(
    e: &mut Encoder<W>,
    value: u128,
) -> Result<(), Error<W::Error>> {
    if let Ok(small) = u64::try_from(value) {
        e.u64(small)?;
    } else {
        let bytes = value.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        e.tag(Tag::PosBignum)?.bytes(&bytes[first..])?;
    }
    Ok(())
}

pub(crate) fn decode_u128(d: &mut Decoder<'_>) -> Result<u128, minicbor::decode::Error> {
    match d.datatype()? {
        Type::Tag => {
            if d.tag()? != Tag::PosBignum {
                return Err(minicbor::decode::Error::Message("Invalid tag."));
            }
            let bytes = d.bytes()?;
            if bytes.len() > 16 {
                return Err(minicbor::decode::Error::Message("Amount overflows 128 bits."));
            }
            let mut be = [0u8; 16];
            be[16 - bytes.len()..].copy_from_slice(bytes);
            Ok(u128::from_be_bytes(be))
        }
        _ => Ok(d.u64()? as u128),
    }
}

/// A reference to one spendable object at a specific version. Consumed in
/// full when used as a transaction input; a consumed reference is stale.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ObjectRef {
    pub object_id: ObjectId,
    pub version: u64,
    pub digest: ObjectDigest,
    pub balance: u128,
}

impl Encode for ObjectRef {
    fn encode<W: Write>(&self, e: &mut Encoder<W>) -> Result<(), Error<W::Error>> {
        e.array(4)?
            .encode(self.object_id)?
            .u64(self.version)?
            .encode(self.digest)?;
        encode_u128(e, self.balance)
    }
}

impl<'b> Decode<'b> for ObjectRef {
    fn decode(d: &mut Decoder<'b>) -> Result<Self, minicbor::decode::Error> {
        if d.array()? != Some(4) {
            return Err(minicbor::decode::Error::Message(
                "An object reference is an array of 4 items.",
            ));
        }
        Ok(Self {
            object_id: d.decode()?,
            version: d.u64()?,
            digest: d.decode()?,
            balance: decode_u128(d)?,
        })
    }
}

/// The ledger's opaque identifier of a fungible type, e.g. `0x2::gas::GAS`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AssetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Encode for AssetId {
    fn encode<W: Write>(&self, e: &mut Encoder<W>) -> Result<(), Error<W::Error>> {
        e.str(&self.0)?;
        Ok(())
    }
}

impl<'b> Decode<'b> for AssetId {
    fn decode(d: &mut Decoder<'b>) -> Result<Self, minicbor::decode::Error> {
        Ok(Self(d.str()?.to_string()))
    }
}

/// A fungible asset known to the relay.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AssetDescriptor {
    pub asset_id: AssetId,
    pub decimals: u8,
    pub symbol: String,
}

impl AssetDescriptor {
    pub fn new(asset_id: impl Into<String>, decimals: u8, symbol: impl Into<String>) -> Self {
        Self {
            asset_id: AssetId::new(asset_id),
            decimals,
            symbol: symbol.into(),
        }
    }

    /// Convert a decimal string (`"12.5"`) into minor units.
    ///
    /// ```
    /// use sponsor_relay::protocol::AssetDescriptor;
    /// let usdc = AssetDescriptor::new("0x5::usdc::USDC", 6, "USDC");
    /// assert_eq!(usdc.parse_amount("12.5").unwrap(), 12_500_000);
    /// assert!(usdc.parse_amount("0.0000001").is_err());
    /// ```
    pub fn parse_amount(&self, amount: &str) -> Result<u128, RelayError> {
        let invalid = |reason: &str| RelayError::invalid_amount(amount, reason);

        let trimmed = amount.trim();
        let (whole, fraction) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid("empty amount"));
        }
        if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid("only digits and one decimal point are allowed"));
        }

        let fraction = fraction.trim_end_matches('0');
        if fraction.len() > self.decimals as usize {
            return Err(invalid(&format!(
                "{} supports at most {} decimal places",
                self.symbol, self.decimals
            )));
        }

        let scale = 10u128
            .checked_pow(self.decimals as u32)
            .ok_or_else(|| invalid("too many decimals"))?;
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid("amount is too large"))?
        };
        let fraction_units: u128 = if fraction.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", fraction, width = self.decimals as usize);
            padded.parse().map_err(|_| invalid("amount is too large"))?
        };

        let units = whole
            .checked_mul(scale)
            .and_then(|w| w.checked_add(fraction_units))
            .ok_or_else(|| invalid("amount is too large"))?;
        if units == 0 {
            return Err(invalid("amount must be positive"));
        }
        Ok(units)
    }

    /// Render minor units as a decimal string, without trailing zeroes.
    pub fn format_amount(&self, units: u128) -> String {
        let Some(scale) = 10u128.checked_pow(self.decimals as u32) else {
            return units.to_string();
        };
        let whole = units / scale;
        let fraction = units % scale;
        if fraction == 0 {
            return whole.to_string();
        }
        let fraction = format!("{:0>width$}", fraction, width = self.decimals as usize);
        format!("{}.{}", whole, fraction.trim_end_matches('0'))
    }
}

impl Encode for AssetDescriptor {
    fn encode<W: Write>(&self, e: &mut Encoder<W>) -> Result<(), Error<W::Error>> {
        e.array(3)?
            .encode(&self.asset_id)?
            .u8(self.decimals)?
            .str(&self.symbol)?;
        Ok(())
    }
}

impl<'b> Decode<'b> for AssetDescriptor {
    fn decode(d: &mut Decoder<'b>) -> Result<Self, minicbor::decode::Error> {
        if d.array()? != Some(3) {
            return Err(minicbor::decode::Error::Message(
                "An asset descriptor is an array of 3 items.",
            ));
        }
        Ok(Self {
            asset_id: d.decode()?,
            decimals: d.u8()?,
            symbol: d.str()?.to_string(),
        })
    }
}

/// The static set of assets the relay moves, plus the ledger's fee currency.
#[derive(Clone, Debug)]
pub struct AssetRegistry {
    fee_currency: AssetDescriptor,
    by_symbol: BTreeMap<String, AssetDescriptor>,
}

impl AssetRegistry {
    pub fn new(fee_currency: AssetDescriptor) -> Self {
        let mut by_symbol = BTreeMap::new();
        by_symbol.insert(fee_currency.symbol.to_uppercase(), fee_currency.clone());
        Self {
            fee_currency,
            by_symbol,
        }
    }

    pub fn builtin() -> Self {
        Self::new(AssetDescriptor::new("0x2::gas::GAS", 9, "GAS"))
            .with_asset(AssetDescriptor::new("0x5::usdc::USDC", 6, "USDC"))
            .with_asset(AssetDescriptor::new("0x5::usdt::USDT", 6, "USDT"))
            .with_asset(AssetDescriptor::new("0x7::weth::WETH", 8, "WETH"))
    }

    /// Add an asset. Asset ids must stay unique; a symbol already present is
    /// replaced.
    pub fn with_asset(mut self, asset: AssetDescriptor) -> Self {
        debug_assert!(
            self.by_symbol
                .values()
                .all(|a| a.asset_id != asset.asset_id || a.symbol == asset.symbol),
            "asset id {} registered twice",
            asset.asset_id
        );
        self.by_symbol.insert(asset.symbol.to_uppercase(), asset);
        self
    }

    pub fn fee_currency(&self) -> &AssetDescriptor {
        &self.fee_currency
    }

    pub fn lookup(&self, symbol: &str) -> Result<&AssetDescriptor, RelayError> {
        self.by_symbol
            .get(&symbol.trim().to_uppercase())
            .ok_or_else(|| RelayError::unknown_asset(symbol))
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetDescriptor> {
        self.by_symbol.values()
    }
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FromStr for ObjectId {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let padded = format!("{:0>width$}", digits, width = DIGEST_LENGTH * 2);
        hex::decode(padded)
            .ok()
            .and_then(|b| Self::from_bytes(&b))
            .ok_or_else(|| RelayError::deserialization_error(format!("invalid object id {s}")))
    }
}
