use crate::message::{RelayError, RequestMessage};
use derive_builder::Builder;
use minicbor::data::{Tag, Type};
use minicbor::encode::{Error, Write};
use minicbor::{Decode, Decoder, Encode, Encoder};
use num_derive::{FromPrimitive, ToPrimitive};

pub const RESPONSE_TAG: u64 = 10002;

#[derive(FromPrimitive, ToPrimitive)]
#[repr(i8)]
pub enum ResponseMessageCborKey {
    ProtocolVersion = 0,
    Result = 4,
    _Timestamp, // Unused in Response.
    Id,
}

/// A ledger node response. `data` holds the CBOR encoding of the method's
/// return type, or the error the node raised.
#[derive(Clone, Debug, Builder, PartialEq)]
#[builder(setter(strip_option), default)]
pub struct ResponseMessage {
    pub version: Option<u8>,
    pub data: Result<Vec<u8>, RelayError>,
    pub id: Option<u64>,
}

impl Default for ResponseMessage {
    fn default() -> Self {
        Self {
            version: None,
            data: Ok(vec![]),
            id: None,
        }
    }
}

impl ResponseMessage {
    pub fn from_request(request: &RequestMessage, data: Result<Vec<u8>, RelayError>) -> Self {
        Self {
            version: Some(1),
            data,
            id: request.id,
        }
    }

    pub fn error(data: RelayError) -> Self {
        Self {
            version: Some(1),
            data: Err(data),
            id: None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, String> {
        minicbor::to_vec(self).map_err(|e| format!("{}", e))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        minicbor::decode(bytes).map_err(|e| format!("{}", e))
    }
}

impl Encode for ResponseMessage {
    fn encode<W: Write>(&self, e: &mut Encoder<W>) -> Result<(), Error<W::Error>> {
        e.tag(Tag::Unassigned(RESPONSE_TAG))?;
        let l = 1
            + if self.version.is_none() { 0 } else { 1 }
            + if self.id.is_none() { 0 } else { 1 };
        e.map(l)?;

        if let Some(v) = self.version {
            e.i8(ResponseMessageCborKey::ProtocolVersion as i8)?.u8(v)?;
        }

        match &self.data {
            Ok(result) => e.i8(ResponseMessageCborKey::Result as i8)?.bytes(result)?,
            Err(error) => e.i8(ResponseMessageCborKey::Result as i8)?.encode(error)?,
        };

        if let Some(ref id) = self.id {
            e.i8(ResponseMessageCborKey::Id as i8)?.u64(*id)?;
        }

        Ok(())
    }
}

impl<'b> Decode<'b> for ResponseMessage {
    fn decode(d: &mut Decoder<'b>) -> Result<Self, minicbor::decode::Error> {
        if d.tag()? != Tag::Unassigned(RESPONSE_TAG) {
            return Err(minicbor::decode::Error::Message(
                "Invalid tag, expected 10002 for a response.",
            ));
        };

        let mut builder = ResponseMessageBuilder::default();

        let mut i = 0;
        let x = d.map()?;
        loop {
            if d.datatype()? == Type::Break {
                d.skip()?;
                break;
            }

            match num_traits::FromPrimitive::from_i64(d.i64()?) {
                Some(ResponseMessageCborKey::ProtocolVersion) => builder.version(d.u8()?),
                Some(ResponseMessageCborKey::Result) => match d.datatype()? {
                    Type::Bytes => builder.data(Ok(d.bytes()?.to_vec())),
                    Type::Map => builder.data(Err(d.decode()?)),
                    _ => {
                        d.skip()?;
                        &mut builder
                    }
                },
                Some(ResponseMessageCborKey::Id) => builder.id(d.u64()?),
                _ => {
                    d.skip()?;
                    &mut builder
                }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_results_keep_their_code() {
        let response = ResponseMessage::error(RelayError::decode_or_bounds_error("bad length"));
        let decoded = ResponseMessage::from_bytes(&response.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, response);
        assert!(decoded.data.unwrap_err().is_decode_or_bounds());
    }

    #[test]
    fn ok_results_are_bytes() {
        let response = ResponseMessageBuilder::default()
            .data(Ok(vec![0xA0]))
            .id(7)
            .build()
            .unwrap();
        let decoded = ResponseMessage::from_bytes(&response.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.data, Ok(vec![0xA0]));
        assert_eq!(decoded.id, Some(7));
    }
}
