use minicbor::data::Type;
use minicbor::encode::{Error, Write};
use minicbor::{Decode, Decoder, Encode, Encoder};
use num_derive::{FromPrimitive, ToPrimitive};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::iter::FromIterator;

#[derive(FromPrimitive, ToPrimitive)]
#[repr(i8)]
enum RelayErrorCborKey {
    Code = 0,
    Message = 1,
    Arguments = 2,
}

macro_rules! relay_error {
    {
        $(
            $v: literal: $name: ident $(as $snake_name: ident ( $($arg: ident),* ))? => $description: literal,
        )*
    } => {
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
        pub enum RelayErrorCode {
            $( $name, )*
            ApplicationSpecific(u32),
        }

        impl RelayErrorCode {
            #[inline]
            pub fn message(&self) -> Option<&'static str> {
                match self {
                    $( RelayErrorCode::$name => Some($description), )*
                    _ => None,
                }
            }
        }

        impl From<i64> for RelayErrorCode {
            fn from(v: i64) -> Self {
                match v {
                    $(
                        $v => Self::$name,
                    )*
                    x if x >= 0 => Self::ApplicationSpecific(x as u32),
                    _ => Self::Unknown,
                }
            }
        }

        impl From<RelayErrorCode> for i64 {
            fn from(code: RelayErrorCode) -> i64 {
                match code {
                    $(
                        RelayErrorCode::$name => $v,
                    )*
                    RelayErrorCode::ApplicationSpecific(x) => x as i64,
                }
            }
        }

        #[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
        pub struct RelayError {
            pub code: RelayErrorCode,
            pub message: Option<String>,
            pub arguments: BTreeMap<String, String>,
        }

        impl RelayError {
            $($(
                #[doc = $description]
                pub fn $snake_name( $($arg: impl ToString,)* ) -> Self {
                    #[cfg(feature = "trace_error_creation")]
                    tracing::trace!(
                        "Error: {:?} Backtrace: {:?}",
                        RelayErrorCode::$name,
                        backtrace::Backtrace::new()
                    );
                    Self {
                        code: RelayErrorCode::$name,
                        message: None,
                        arguments: BTreeMap::from_iter(vec![
                            $( (stringify!($arg).to_string(), $arg.to_string()) ),*
                        ]),
                    }
                }
            )?)*
        }
    }
}

relay_error! {
    // Range -0-999 is for unexpected, transport or encoding errors.
       -1: Unknown as unknown(message)
            => "Unknown error: {message}",
       -3: DeserializationError as deserialization_error(details)
            => "Deserialization error:\n{details}",
       -4: SerializationFailure as serialization_failure(details)
            => "Could not serialize a value that must always serialize:\n{details}",
       -6: UnexpectedEmptyResponse as unexpected_empty_response()
            => "Response of a message was unexpectedly empty.",
       -7: UnexpectedTransportError as unexpected_transport_error(inner)
            => "The transport returned an error unexpectedly:\n{inner}",

     -100: InvalidAddress as invalid_address(actual)
            => "Address is invalid: '{actual}'.",

    // 1000-1099 is for selection and construction errors.
     1000: CatalogUnavailable as catalog_unavailable(details)
            => "Could not read spendable objects from the ledger:\n{details}",
     1001: NoSpendableObjects as no_spendable_objects(owner, asset)
            => "Address {owner} owns no spendable objects of {asset}.",
     1002: InsufficientBalance as insufficient_balance(available, required)
            => "Insufficient balance: {available} available, {required} required.",
     1003: SponsorGasUnavailable as sponsor_gas_unavailable(sponsor, budget)
            => "Sponsor {sponsor} has no fee object covering a budget of {budget}.",
     1004: OwnerGasUnavailable as owner_gas_unavailable(owner, budget)
            => "Address {owner} has no fee object covering a budget of {budget}.",
     1005: InvalidAmount as invalid_amount(amount, reason)
            => r#"Invalid amount "{amount}": {reason}."#,
     1006: UnknownAsset as unknown_asset(symbol)
            => r#"Unknown asset symbol "{symbol}"."#,

    // 1100-1199 is for signature errors.
     1100: UnrecognizedSignatureShape as unrecognized_signature_shape()
            => "Signature value has no string, signature, data or bytes field.",
     1101: OwnerSignatureDenied as owner_signature_denied(reason)
            => "The owner did not sign the transfer: {reason}",
     1102: InvalidSignatureEncoding as invalid_signature_encoding(encoding, details)
            => "Signature is not valid {encoding}: {details}",

    // 2000-2999 is for errors returned by the ledger node.
     2000: DecodeOrBoundsError as decode_or_bounds_error(details)
            => "The node could not decode the transaction:\n{details}",
     2001: StaleObjectVersion as stale_object_version(object)
            => "Object {object} is not available at the referenced version.",
     2002: InsufficientGas as insufficient_gas(details)
            => "Insufficient gas:\n{details}",
     2003: NodeRejected as node_rejected(details)
            => "The node rejected the transaction:\n{details}",

    // Positive error codes above 10000 are reserved for node specific errors.
}

lazy_static::lazy_static! {
    static ref TEMPLATE_RE: Regex = Regex::new(r"\{\{|\}\}|\{[^\}\s]*\}").unwrap();
    static ref DECODE_CLASS_RE: Regex =
        Regex::new(r"(?i)(deserializ|decod|out of bounds|bounds check|unexpected end of input)")
            .unwrap();
}

impl RelayErrorCode {
    #[inline]
    pub fn is_application_specific(&self) -> bool {
        matches!(self, RelayErrorCode::ApplicationSpecific(_))
    }

    #[inline]
    pub fn message_of(code: i64) -> Option<&'static str> {
        RelayErrorCode::from(code).message()
    }
}

impl RelayError {
    #[inline]
    pub fn code(&self) -> RelayErrorCode {
        self.code
    }

    #[inline]
    pub fn is_application_specific(&self) -> bool {
        self.code.is_application_specific()
    }

    #[inline]
    pub fn application_specific(
        code: u32,
        message: String,
        arguments: BTreeMap<String, String>,
    ) -> Self {
        RelayError {
            code: RelayErrorCode::ApplicationSpecific(code),
            message: Some(message),
            arguments,
        }
    }

    /// Whether the node failed to decode or bounds-check the submitted
    /// transaction. This is the only class the submission engine retries.
    pub fn is_decode_or_bounds(&self) -> bool {
        match self.code {
            RelayErrorCode::DecodeOrBoundsError => true,
            RelayErrorCode::NodeRejected | RelayErrorCode::Unknown => {
                DECODE_CLASS_RE.is_match(&self.to_string())
            }
            _ => false,
        }
    }

    #[inline]
    pub fn to_bytes(&self) -> Result<Vec<u8>, String> {
        let mut bytes = Vec::new();
        minicbor::encode(self, &mut bytes).map_err(|e| format!("{}", e))?;
        Ok(bytes)
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        minicbor::decode(bytes).map_err(|e| format!("{}", e))
    }
}

impl Default for RelayErrorCode {
    #[inline]
    fn default() -> Self {
        RelayErrorCode::Unknown
    }
}

impl Default for RelayError {
    #[inline]
    fn default() -> Self {
        RelayError::unknown("?")
    }
}

impl Display for RelayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let message = self
            .message
            .as_deref()
            .unwrap_or_else(|| self.code.message().unwrap_or("Invalid error code."));

        let mut current = 0;

        for mat in TEMPLATE_RE.find_iter(message) {
            let std::ops::Range { start, end } = mat.range();
            f.write_str(&message[current..start])?;
            current = end;

            let s = mat.as_str();
            if s == "{{" {
                f.write_str("{")?;
            } else if s == "}}" {
                f.write_str("}")?;
            } else {
                let field = &message[start + 1..end - 1];
                f.write_str(self.arguments.get(field).map_or("", String::as_str))?;
            }
        }
        f.write_str(&message[current..])
    }
}

impl std::error::Error for RelayError {}

impl Encode for RelayError {
    #[inline]
    fn encode<W: Write>(&self, e: &mut Encoder<W>) -> Result<(), Error<W::Error>> {
        e.map(
            1 + if self.message.is_none() { 0 } else { 1 }
                + if self.arguments.is_empty() { 0 } else { 1 },
        )?
        .u32(RelayErrorCborKey::Code as u32)?
        .i64(self.code.into())?;

        if let Some(msg) = &self.message {
            e.u32(RelayErrorCborKey::Message as u32)?.str(msg.as_str())?;
        }
        if !self.arguments.is_empty() {
            e.u32(RelayErrorCborKey::Arguments as u32)?
                .encode(&self.arguments)?;
        }
        Ok(())
    }
}

impl<'b> Decode<'b> for RelayError {
    fn decode(d: &mut Decoder<'b>) -> Result<Self, minicbor::decode::Error> {
        let len = d.map()?;

        let mut code = None;
        let mut message = None;
        let mut arguments: BTreeMap<String, String> = BTreeMap::new();

        let mut i = 0;
        loop {
            if d.datatype()? == Type::Break {
                d.skip()?;
                break;
            }

            match num_traits::FromPrimitive::from_i64(d.i64()?) {
                Some(RelayErrorCborKey::Code) => code = Some(d.i64()?),
                Some(RelayErrorCborKey::Message) => message = Some(d.str()?),
                Some(RelayErrorCborKey::Arguments) => arguments = d.decode()?,
                None => d.skip()?,
            }

            i += 1;
            if len.map_or(false, |x| i >= x) {
                break;
            }
        }

        Ok(Self {
            code: code.unwrap_or(-1).into(),
            message: message.map(|s| s.to_string()),
            arguments,
        })
    }
}
