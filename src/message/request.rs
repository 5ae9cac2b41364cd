use derive_builder::Builder;
use minicbor::data::{Tag, Type};
use minicbor::encode::{Error, Write};
use minicbor::{Decode, Decoder, Encode, Encoder};
use num_derive::{FromPrimitive, ToPrimitive};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const REQUEST_TAG: u64 = 10001;

#[derive(FromPrimitive, ToPrimitive)]
#[repr(i8)]
pub enum RequestMessageCborKey {
    ProtocolVersion = 0,
    Endpoint = 3,
    Argument,
    Timestamp,
    Id,
    Nonce,
}

/// A call to the ledger node. The argument is the CBOR encoding of the
/// method's argument type.
#[derive(Clone, Default, Builder, PartialEq)]
#[builder(setter(strip_option), default)]
pub struct RequestMessage {
    pub version: Option<u8>,
    pub method: String,
    pub data: Vec<u8>,
    pub timestamp: Option<SystemTime>,
    pub id: Option<u64>,
    pub nonce: Option<Vec<u8>>,
}

impl std::fmt::Debug for RequestMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("RequestMessage");
        s.field("version", &self.version)
            .field("method", &self.method)
            .field("data", &hex::encode(&self.data));

        if let Some(timestamp) = &self.timestamp {
            s.field("timestamp", timestamp);
        }
        if let Some(id) = &self.id {
            s.field("id", id);
        }

        s.finish()
    }
}

impl RequestMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, String> {
        minicbor::to_vec(self).map_err(|e| format!("{}", e))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        minicbor::decode(bytes).map_err(|e| format!("{}", e))
    }
}

impl Encode for RequestMessage {
    fn encode<W: Write>(&self, e: &mut Encoder<W>) -> Result<(), Error<W::Error>> {
        e.tag(Tag::Unassigned(REQUEST_TAG))?;
        let l = 2
            + if self.version.is_none() { 0 } else { 1 }
            + if self.data.is_empty() { 0 } else { 1 }
            + if self.id.is_none() { 0 } else { 1 }
            + if self.nonce.is_none() { 0 } else { 1 };
        e.map(l)?;

        if let Some(v) = self.version {
            e.i8(RequestMessageCborKey::ProtocolVersion as i8)?.u8(v)?;
        }

        e.i8(RequestMessageCborKey::Endpoint as i8)?
            .str(&self.method)?;

        if !self.data.is_empty() {
            e.i8(RequestMessageCborKey::Argument as i8)?
                .bytes(&self.data)?;
        }

        e.i8(RequestMessageCborKey::Timestamp as i8)?;
        let timestamp = self.timestamp.unwrap_or_else(SystemTime::now);
        e.tag(Tag::Timestamp)?.u64(
            timestamp
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs()),
        )?;

        if let Some(ref id) = self.id {
            e.i8(RequestMessageCborKey::Id as i8)?.u64(*id)?;
        }

        if let Some(ref nonce) = self.nonce {
            e.i8(RequestMessageCborKey::Nonce as i8)?.bytes(nonce)?;
        }

        Ok(())
    }
}

impl<'b> Decode<'b> for RequestMessage {
    fn decode(d: &mut Decoder<'b>) -> Result<Self, minicbor::decode::Error> {
        if d.tag()? != Tag::Unassigned(REQUEST_TAG) {
            return Err(minicbor::decode::Error::Message(
                "Invalid tag, expected 10001 for a request.",
            ));
        };

        let mut builder = RequestMessageBuilder::default();

        let mut i = 0;
        let x = d.map()?;
        // Since we don't know if this is a indef map or a regular map, we just loop
        // through items and break when we know the map is done.
        loop {
            if d.datatype()? == Type::Break {
                d.skip()?;
                break;
            }

            match num_traits::FromPrimitive::from_i8(d.i8()?) {
                None => {
                    d.skip()?;
                    &mut builder
                }
                Some(RequestMessageCborKey::ProtocolVersion) => builder.version(d.u8()?),
                Some(RequestMessageCborKey::Endpoint) => builder.method(d.str()?.to_string()),
                Some(RequestMessageCborKey::Argument) => builder.data(d.bytes()?.to_vec()),
                Some(RequestMessageCborKey::Timestamp) => {
                    if d.tag()? != Tag::Timestamp {
                        return Err(minicbor::decode::Error::Message("Invalid tag."));
                    }
                    let secs = d.u64()?;
                    let timestamp = UNIX_EPOCH.checked_add(Duration::from_secs(secs)).ok_or(
                        minicbor::decode::Error::Message(
                            "duration value can not represent system time",
                        ),
                    )?;
                    builder.timestamp(timestamp)
                }
                Some(RequestMessageCborKey::Id) => builder.id(d.u64()?),
                Some(RequestMessageCborKey::Nonce) => builder.nonce(d.bytes()?.to_vec()),
            };

            i += 1;
            if x.map_or(false, |x| i >= x) {
                break;
            }
        }

        builder
            .build()
            .map_err(|_e| minicbor::decode::Error::Message("could not build"))
    }
}
