//! Unsigned transaction intents and their canonical byte form.
//!
//! An intent is encoded as a tagged CBOR map with a fixed key order and
//! definite lengths, so equal intents always produce equal bytes. Both
//! parties sign exactly these bytes.
use crate::identity::Address;
use crate::message::RelayError;
use crate::protocol::{decode_u128, encode_u128, AssetDescriptor, ObjectId, ObjectRef};
use crate::selector::{CoinSelection, SelectionMode};
use minicbor::data::Tag;
use minicbor::encode::{Error, Write};
use minicbor::{Decode, Decoder, Encode, Encoder};
use num_derive::{FromPrimitive, ToPrimitive};
use sha3::{Digest, Sha3_256};
use std::fmt::{Debug, Formatter};

pub const INTENT_TAG: u64 = 10003;
pub const INTENT_VERSION: u8 = 1;

#[derive(FromPrimitive, ToPrimitive)]
enum IntentCborKey {
    Version = 0,
    Sender,
    Recipient,
    Asset,
    Amount,
    Inputs,
    Operations,
    Gas,
}

/// Argument to an operation: an input object, or the output of an earlier
/// operation in the same intent.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ObjectArg {
    Input(ObjectId),
    Result(u16),
}

impl Encode for ObjectArg {
    fn encode<W: Write>(&self, e: &mut Encoder<W>) -> Result<(), Error<W::Error>> {
        match self {
            ObjectArg::Input(id) => e.array(2)?.u8(0)?.encode(id)?,
            ObjectArg::Result(index) => e.array(2)?.u8(1)?.u16(*index)?,
        };
        Ok(())
    }
}

impl<'b> Decode<'b> for ObjectArg {
    fn decode(d: &mut Decoder<'b>) -> Result<Self, minicbor::decode::Error> {
        if d.array()? != Some(2) {
            return Err(minicbor::decode::Error::Message("Invalid object argument."));
        }
        match d.u8()? {
            0 => Ok(ObjectArg::Input(d.decode()?)),
            1 => Ok(ObjectArg::Result(d.u16()?)),
            _ => Err(minicbor::decode::Error::Message("Unknown object argument kind.")),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Operation {
    /// Move the listed objects to `recipient`.
    TransferObjects {
        objects: Vec<ObjectArg>,
        recipient: Address,
    },
    /// Carve `amount` out of `coin`; the new object is this operation's
    /// result.
    SplitCoin { coin: ObjectId, amount: u128 },
    /// Fold every source into `primary`.
    MergeCoins {
        primary: ObjectId,
        sources: Vec<ObjectId>,
    },
}

impl Encode for Operation {
    fn encode<W: Write>(&self, e: &mut Encoder<W>) -> Result<(), Error<W::Error>> {
        match self {
            Operation::TransferObjects { objects, recipient } => {
                e.array(3)?.u8(0)?.encode(objects)?.encode(recipient)?;
            }
            Operation::SplitCoin { coin, amount } => {
                e.array(3)?.u8(1)?.encode(coin)?;
                encode_u128(e, *amount)?;
            }
            Operation::MergeCoins { primary, sources } => {
                e.array(3)?.u8(2)?.encode(primary)?.encode(sources)?;
            }
        }
        Ok(())
    }
}

impl<'b> Decode<'b> for Operation {
    fn decode(d: &mut Decoder<'b>) -> Result<Self, minicbor::decode::Error> {
        if d.array()? != Some(3) {
            return Err(minicbor::decode::Error::Message("Invalid operation."));
        }
        match d.u8()? {
            0 => Ok(Operation::TransferObjects {
                objects: d.decode()?,
                recipient: d.decode()?,
            }),
            1 => Ok(Operation::SplitCoin {
                coin: d.decode()?,
                amount: decode_u128(d)?,
            }),
            2 => Ok(Operation::MergeCoins {
                primary: d.decode()?,
                sources: d.decode()?,
            }),
            _ => Err(minicbor::decode::Error::Message("Unknown operation.")),
        }
    }
}

/// Who pays for execution, with which object, and at what limits.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GasData {
    pub owner: Address,
    pub payment: ObjectRef,
    pub budget: u64,
    pub price: u64,
}

impl Encode for GasData {
    fn encode<W: Write>(&self, e: &mut Encoder<W>) -> Result<(), Error<W::Error>> {
        e.array(4)?
            .encode(self.owner)?
            .encode(self.payment)?
            .u64(self.budget)?
            .u64(self.price)?;
        Ok(())
    }
}

impl<'b> Decode<'b> for GasData {
    fn decode(d: &mut Decoder<'b>) -> Result<Self, minicbor::decode::Error> {
        if d.array()? != Some(4) {
            return Err(minicbor::decode::Error::Message("Invalid gas data."));
        }
        Ok(Self {
            owner: d.decode()?,
            payment: d.decode()?,
            budget: d.u64()?,
            price: d.u64()?,
        })
    }
}

/// A transfer ready to be signed. Immutable once built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnsignedIntent {
    pub sender: Address,
    pub recipient: Address,
    pub asset: AssetDescriptor,
    pub amount: u128,
    pub inputs: Vec<ObjectRef>,
    pub operations: Vec<Operation>,
    pub gas: GasData,
}

impl UnsignedIntent {
    pub fn is_sponsored(&self) -> bool {
        self.gas.owner != self.sender
    }

    pub fn to_bytes(&self) -> Result<IntentBytes, RelayError> {
        minicbor::to_vec(self).map(IntentBytes).map_err(|e| {
            tracing::error!(error = %e, "intent serialization failed");
            RelayError::serialization_failure(e)
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RelayError> {
        minicbor::decode(bytes).map_err(RelayError::deserialization_error)
    }
}

impl Encode for UnsignedIntent {
    fn encode<W: Write>(&self, e: &mut Encoder<W>) -> Result<(), Error<W::Error>> {
        e.tag(Tag::Unassigned(INTENT_TAG))?
            .map(8)?
            .u8(IntentCborKey::Version as u8)?
            .u8(INTENT_VERSION)?
            .u8(IntentCborKey::Sender as u8)?
            .encode(self.sender)?
            .u8(IntentCborKey::Recipient as u8)?
            .encode(self.recipient)?
            .u8(IntentCborKey::Asset as u8)?
            .encode(&self.asset)?
            .u8(IntentCborKey::Amount as u8)?;
        encode_u128(e, self.amount)?;
        e.u8(IntentCborKey::Inputs as u8)?
            .encode(&self.inputs)?
            .u8(IntentCborKey::Operations as u8)?
            .encode(&self.operations)?
            .u8(IntentCborKey::Gas as u8)?
            .encode(self.gas)?;
        Ok(())
    }
}

impl<'b> Decode<'b> for UnsignedIntent {
    fn decode(d: &mut Decoder<'b>) -> Result<Self, minicbor::decode::Error> {
        if d.tag()? != Tag::Unassigned(INTENT_TAG) {
            return Err(minicbor::decode::Error::Message(
                "Invalid tag, expected an intent.",
            ));
        }
        let len = d
            .map()?
            .ok_or(minicbor::decode::Error::Message("Intents use definite maps."))?;

        let mut sender = None;
        let mut recipient = None;
        let mut asset = None;
        let mut amount = None;
        let mut inputs = None;
        let mut operations = None;
        let mut gas = None;

        for _ in 0..len {
            match num_traits::FromPrimitive::from_u8(d.u8()?) {
                Some(IntentCborKey::Version) => {
                    if d.u8()? != INTENT_VERSION {
                        return Err(minicbor::decode::Error::Message(
                            "Unsupported intent version.",
                        ));
                    }
                }
                Some(IntentCborKey::Sender) => sender = Some(d.decode()?),
                Some(IntentCborKey::Recipient) => recipient = Some(d.decode()?),
                Some(IntentCborKey::Asset) => asset = Some(d.decode()?),
                Some(IntentCborKey::Amount) => amount = Some(decode_u128(d)?),
                Some(IntentCborKey::Inputs) => inputs = Some(d.decode()?),
                Some(IntentCborKey::Operations) => operations = Some(d.decode()?),
                Some(IntentCborKey::Gas) => gas = Some(d.decode()?),
                None => d.skip()?,
            }
        }

        let missing = minicbor::decode::Error::Message;
        Ok(Self {
            sender: sender.ok_or(missing("Intent has no sender."))?,
            recipient: recipient.ok_or(missing("Intent has no recipient."))?,
            asset: asset.ok_or(missing("Intent has no asset."))?,
            amount: amount.ok_or(missing("Intent has no amount."))?,
            inputs: inputs.ok_or(missing("Intent has no inputs."))?,
            operations: operations.ok_or(missing("Intent has no operations."))?,
            gas: gas.ok_or(missing("Intent has no gas data."))?,
        })
    }
}

/// The canonical serialized form of an [`UnsignedIntent`].
#[derive(Clone, Eq, PartialEq)]
pub struct IntentBytes(Vec<u8>);

impl IntentBytes {
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn digest(&self) -> [u8; 32] {
        Sha3_256::digest(&self.0).into()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn to_base64(&self) -> String {
        base64::encode(&self.0)
    }
}

impl AsRef<[u8]> for IntentBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for IntentBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentBytes")
            .field("len", &self.0.len())
            .field("digest", &hex::encode(self.digest()))
            .finish()
    }
}

/// Turns a coin selection into an unsigned intent.
#[derive(Copy, Clone, Debug)]
pub struct IntentBuilder {
    pub gas_budget: u64,
    pub gas_price: u64,
}

impl IntentBuilder {
    pub fn new(gas_budget: u64, gas_price: u64) -> Self {
        Self {
            gas_budget,
            gas_price,
        }
    }

    /// Pick the object that pays for gas: the first fee object, in ledger
    /// order, that covers the budget and is not already a transfer input.
    pub fn gas_payment(
        &self,
        fee_objects: &[ObjectRef],
        exclude: &[ObjectRef],
    ) -> Option<ObjectRef> {
        fee_objects
            .iter()
            .filter(|o| !exclude.iter().any(|x| x.object_id == o.object_id))
            .find(|o| o.balance >= self.gas_budget as u128)
            .copied()
    }

    /// Intent whose gas is paid by `sponsor` out of `sponsor_fee_objects`.
    pub fn build_sponsored(
        &self,
        selection: &CoinSelection,
        recipient: Address,
        sponsor: Address,
        sponsor_fee_objects: &[ObjectRef],
    ) -> Result<UnsignedIntent, RelayError> {
        let payment = self
            .gas_payment(sponsor_fee_objects, &selection.inputs)
            .ok_or_else(|| RelayError::sponsor_gas_unavailable(sponsor, self.gas_budget))?;
        Ok(self.assemble(selection, recipient, sponsor, payment))
    }

    /// Intent whose gas is paid by the owner themselves.
    pub fn build_direct(
        &self,
        selection: &CoinSelection,
        recipient: Address,
        owner_fee_objects: &[ObjectRef],
    ) -> Result<UnsignedIntent, RelayError> {
        let payment = self
            .gas_payment(owner_fee_objects, &selection.inputs)
            .ok_or_else(|| {
                RelayError::owner_gas_unavailable(selection.owner, self.gas_budget)
            })?;
        Ok(self.assemble(selection, recipient, selection.owner, payment))
    }

    fn assemble(
        &self,
        selection: &CoinSelection,
        recipient: Address,
        gas_owner: Address,
        payment: ObjectRef,
    ) -> UnsignedIntent {
        let operations = operations_for(selection, recipient);
        tracing::debug!(
            inputs = selection.inputs.len(),
            operations = operations.len(),
            sponsored = gas_owner != selection.owner,
            "intent built"
        );
        UnsignedIntent {
            sender: selection.owner,
            recipient,
            asset: selection.asset.clone(),
            amount: selection.amount,
            inputs: selection.inputs.clone(),
            operations,
            gas: GasData {
                owner: gas_owner,
                payment,
                budget: self.gas_budget,
                price: self.gas_price,
            },
        }
    }
}

/// Whole transfers move the inputs directly. Splits merge every input into
/// the first one, split the amount off it and transfer the split result.
fn operations_for(selection: &CoinSelection, recipient: Address) -> Vec<Operation> {
    let ids: Vec<ObjectId> = selection.inputs.iter().map(|o| o.object_id).collect();
    match selection.mode {
        SelectionMode::TransferWhole => vec![Operation::TransferObjects {
            objects: ids.into_iter().map(ObjectArg::Input).collect(),
            recipient,
        }],
        SelectionMode::SplitRequired { .. } => {
            let mut operations = Vec::with_capacity(3);
            let primary = ids[0];
            if ids.len() > 1 {
                operations.push(Operation::MergeCoins {
                    primary,
                    sources: ids[1..].to_vec(),
                });
            }
            let split_index = operations.len() as u16;
            operations.push(Operation::SplitCoin {
                coin: primary,
                amount: selection.amount,
            });
            operations.push(Operation::TransferObjects {
                objects: vec![ObjectArg::Result(split_index)],
                recipient,
            });
            operations
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RelayErrorCode;
    use crate::protocol::ObjectDigest;
    use crate::selector::select_coins;
    use proptest::prelude::*;

    fn object(seed: u8, balance: u128) -> ObjectRef {
        ObjectRef {
            object_id: ObjectId::new([seed; 32]),
            version: seed as u64,
            digest: ObjectDigest::new([seed ^ 0xFF; 32]),
            balance,
        }
    }

    fn usdc() -> AssetDescriptor {
        AssetDescriptor::new("0x5::usdc::USDC", 6, "USDC")
    }

    const OWNER: Address = Address::new([1; 32]);
    const RECIPIENT: Address = Address::new([2; 32]);
    const SPONSOR: Address = Address::new([3; 32]);

    fn builder() -> IntentBuilder {
        IntentBuilder::new(1_000, 1)
    }

    #[test]
    fn whole_transfer_is_one_operation() {
        let selection = select_coins(OWNER, &usdc(), vec![object(10, 100)], 100).unwrap();
        let gas = [object(20, 5_000)];
        let intent = builder()
            .build_sponsored(&selection, RECIPIENT, SPONSOR, &gas)
            .unwrap();

        assert_eq!(
            intent.operations,
            vec![Operation::TransferObjects {
                objects: vec![ObjectArg::Input(ObjectId::new([10; 32]))],
                recipient: RECIPIENT,
            }]
        );
        assert_eq!(intent.gas.owner, SPONSOR);
        assert_eq!(intent.gas.payment, gas[0]);
        assert!(intent.is_sponsored());
    }

    #[test]
    fn split_transfers_the_split_result() {
        let objects = vec![object(10, 30), object(11, 80)];
        let selection = select_coins(OWNER, &usdc(), objects, 50).unwrap();
        let intent = builder()
            .build_sponsored(&selection, RECIPIENT, SPONSOR, &[object(20, 5_000)])
            .unwrap();

        assert_eq!(intent.inputs, vec![object(11, 80)]);
        assert_eq!(
            intent.operations,
            vec![
                Operation::SplitCoin {
                    coin: ObjectId::new([11; 32]),
                    amount: 50,
                },
                Operation::TransferObjects {
                    objects: vec![ObjectArg::Result(0)],
                    recipient: RECIPIENT,
                },
            ]
        );
    }

    #[test]
    fn several_inputs_are_merged_first() {
        let objects = vec![object(10, 30), object(11, 30), object(12, 30)];
        let selection = select_coins(OWNER, &usdc(), objects, 70).unwrap();
        let intent = builder()
            .build_sponsored(&selection, RECIPIENT, SPONSOR, &[object(20, 5_000)])
            .unwrap();

        assert_eq!(
            intent.operations[0],
            Operation::MergeCoins {
                primary: ObjectId::new([10; 32]),
                sources: vec![ObjectId::new([11; 32]), ObjectId::new([12; 32])],
            }
        );
        assert_eq!(
            intent.operations[2],
            Operation::TransferObjects {
                objects: vec![ObjectArg::Result(1)],
                recipient: RECIPIENT,
            }
        );
    }

    #[test]
    fn gas_payment_skips_small_and_input_objects() {
        let selection = select_coins(OWNER, &usdc(), vec![object(10, 5_000)], 5_000).unwrap();
        let fee_objects = [object(10, 5_000), object(21, 10), object(22, 2_000)];
        let intent = builder()
            .build_direct(&selection, RECIPIENT, &fee_objects)
            .unwrap();
        assert_eq!(intent.gas.payment, object(22, 2_000));
        assert_eq!(intent.gas.owner, OWNER);
        assert!(!intent.is_sponsored());
    }

    #[test]
    fn missing_gas_is_reported_per_payer() {
        let selection = select_coins(OWNER, &usdc(), vec![object(10, 100)], 100).unwrap();
        let poor = [object(21, 10)];

        let err = builder()
            .build_sponsored(&selection, RECIPIENT, SPONSOR, &poor)
            .unwrap_err();
        assert_eq!(err.code, RelayErrorCode::SponsorGasUnavailable);

        let err = builder()
            .build_direct(&selection, RECIPIENT, &poor)
            .unwrap_err();
        assert_eq!(err.code, RelayErrorCode::OwnerGasUnavailable);
    }

    #[test]
    fn bytes_are_deterministic_and_decodable() {
        let objects = vec![object(10, 30), object(11, 80)];
        let selection = select_coins(OWNER, &usdc(), objects, 50).unwrap();
        let intent = builder()
            .build_sponsored(&selection, RECIPIENT, SPONSOR, &[object(20, 5_000)])
            .unwrap();

        let first = intent.to_bytes().unwrap();
        let second = intent.clone().to_bytes().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.digest(), second.digest());
        assert_eq!(UnsignedIntent::from_bytes(first.as_slice()).unwrap(), intent);
    }

    #[test]
    fn different_intents_differ() {
        let a = select_coins(OWNER, &usdc(), vec![object(10, 100)], 100).unwrap();
        let b = select_coins(OWNER, &usdc(), vec![object(10, 100)], 60).unwrap();
        let gas = [object(20, 5_000)];
        let a = builder().build_sponsored(&a, RECIPIENT, SPONSOR, &gas).unwrap();
        let b = builder().build_sponsored(&b, RECIPIENT, SPONSOR, &gas).unwrap();
        assert_ne!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }

    fn build(balances: &[u128], amount: u128) -> UnsignedIntent {
        let objects = balances
            .iter()
            .enumerate()
            .map(|(i, b)| object(i as u8, *b))
            .collect();
        let selection = select_coins(OWNER, &usdc(), objects, amount).unwrap();
        builder()
            .build_sponsored(&selection, RECIPIENT, SPONSOR, &[object(200, 5_000)])
            .unwrap()
    }

    proptest! {
        #[test]
        fn rebuilt_intents_serialize_identically(
            input in prop::collection::vec(1u128..1_000, 1..6),
            fraction in 1u128..=100,
        ) {
            let total: u128 = input.iter().sum();
            let amount = (total * fraction / 100).max(1);

            let first = build(&input, amount);
            let second = build(&input, amount);
            let bytes = first.to_bytes().unwrap();
            prop_assert_eq!(&bytes, &second.to_bytes().unwrap());
            prop_assert_eq!(UnsignedIntent::from_bytes(bytes.as_slice()).unwrap(), first);
        }
    }

    #[test]
    fn garbage_is_a_deserialization_error() {
        let err = UnsignedIntent::from_bytes(&[0xFF, 0x00]).unwrap_err();
        assert_eq!(err.code, RelayErrorCode::DeserializationError);
    }
}
