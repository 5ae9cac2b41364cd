//! Signature normalization.
//!
//! Signer agents hand back signatures in different shapes. Every shape is a
//! [`SignatureValue`] variant, and [`Normalizer::normalize`] turns any of
//! them into a [`SignatureEnvelope`] exactly once. Normalization tags the
//! value with its encoding but never changes its bytes; re-encoding is only
//! done by [`SignatureEnvelope::reencoded`].
use crate::message::RelayError;
use serde_derive::Deserialize;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Encoding {
    Base64,
    Hex,
    Raw,
}

impl Encoding {
    pub const fn name(&self) -> &'static str {
        match self {
            Encoding::Base64 => "base64",
            Encoding::Hex => "hex",
            Encoding::Raw => "raw",
        }
    }

    /// The encoding a signature is rewritten into when the node could not
    /// decode it.
    pub const fn alternate(&self) -> Encoding {
        match self {
            Encoding::Base64 => Encoding::Hex,
            Encoding::Hex => Encoding::Base64,
            Encoding::Raw => Encoding::Hex,
        }
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Base64
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base64" => Ok(Encoding::Base64),
            "hex" => Ok(Encoding::Hex),
            "raw" => Ok(Encoding::Raw),
            other => Err(format!("unknown signature encoding '{other}'")),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Role {
    Owner,
    Sponsor,
}

/// A structured signature as returned by wallets and agents. Only one of
/// the fields is expected to be set.
#[derive(Clone, Default, Deserialize, Eq, PartialEq)]
pub struct SignatureFields {
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub bytes: Option<String>,
}

impl SignatureFields {
    /// The first non-empty field, in `signature`, `data`, `bytes` order.
    pub fn first_present(&self) -> Option<&str> {
        [&self.signature, &self.data, &self.bytes]
            .into_iter()
            .filter_map(|f| f.as_deref())
            .find(|f| !f.is_empty())
    }
}

impl Debug for SignatureFields {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let len = |v: &Option<String>| v.as_ref().map(String::len);
        f.debug_struct("SignatureFields")
            .field("signature", &len(&self.signature))
            .field("data", &len(&self.data))
            .field("bytes", &len(&self.bytes))
            .finish()
    }
}

/// Every shape a signature can arrive in.
#[derive(Clone, Eq, PartialEq)]
pub enum SignatureValue {
    Encoded(String),
    Fields(SignatureFields),
    Raw(Vec<u8>),
    Envelope(SignatureEnvelope),
}

impl SignatureValue {
    /// Parse a JSON signature: either a bare string or an object with a
    /// `signature`, `data` or `bytes` field.
    pub fn from_json(json: &str) -> Result<Self, RelayError> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|_| RelayError::unrecognized_signature_shape())?;
        match value {
            serde_json::Value::String(s) => Ok(SignatureValue::Encoded(s)),
            object @ serde_json::Value::Object(_) => serde_json::from_value(object)
                .map(SignatureValue::Fields)
                .map_err(|_| RelayError::unrecognized_signature_shape()),
            _ => Err(RelayError::unrecognized_signature_shape()),
        }
    }
}

impl Debug for SignatureValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureValue::Encoded(s) => write!(f, "Encoded(len={})", s.len()),
            SignatureValue::Fields(fields) => fields.fmt(f),
            SignatureValue::Raw(b) => write!(f, "Raw(len={})", b.len()),
            SignatureValue::Envelope(e) => e.fmt(f),
        }
    }
}

impl From<String> for SignatureValue {
    fn from(s: String) -> Self {
        SignatureValue::Encoded(s)
    }
}

impl From<&str> for SignatureValue {
    fn from(s: &str) -> Self {
        SignatureValue::Encoded(s.to_string())
    }
}

impl From<Vec<u8>> for SignatureValue {
    fn from(bytes: Vec<u8>) -> Self {
        SignatureValue::Raw(bytes)
    }
}

impl From<SignatureFields> for SignatureValue {
    fn from(fields: SignatureFields) -> Self {
        SignatureValue::Fields(fields)
    }
}

impl From<SignatureEnvelope> for SignatureValue {
    fn from(envelope: SignatureEnvelope) -> Self {
        SignatureValue::Envelope(envelope)
    }
}

/// A signature tagged with its role and encoding.
///
/// `bytes` holds the signature exactly as it travels: the encoded text for
/// [`Encoding::Base64`] and [`Encoding::Hex`], the signature itself for
/// [`Encoding::Raw`].
#[derive(Clone, Eq, PartialEq)]
pub struct SignatureEnvelope {
    role: Role,
    encoding: Encoding,
    bytes: Vec<u8>,
}

impl SignatureEnvelope {
    /// Encode a raw signature into `encoding`.
    pub fn encode(role: Role, encoding: Encoding, signature: &[u8]) -> Self {
        let bytes = match encoding {
            Encoding::Base64 => base64::encode(signature).into_bytes(),
            Encoding::Hex => hex::encode(signature).into_bytes(),
            Encoding::Raw => signature.to_vec(),
        };
        Self {
            role,
            encoding,
            bytes,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The text sent to the node. Raw signatures go out as base64.
    pub fn to_wire(&self) -> String {
        match self.encoding {
            Encoding::Raw => base64::encode(&self.bytes),
            Encoding::Base64 | Encoding::Hex => String::from_utf8_lossy(&self.bytes).into_owned(),
        }
    }

    /// The signature bytes, decoded from the envelope's encoding.
    pub fn decode(&self) -> Result<Vec<u8>, RelayError> {
        let invalid = |e: &dyn Display| RelayError::invalid_signature_encoding(self.encoding, e);
        match self.encoding {
            Encoding::Raw => Ok(self.bytes.clone()),
            Encoding::Hex => {
                let text = std::str::from_utf8(&self.bytes).map_err(|e| invalid(&e))?;
                let digits = text.strip_prefix("0x").unwrap_or(text);
                hex::decode(digits).map_err(|e| invalid(&e))
            }
            Encoding::Base64 => {
                let text = std::str::from_utf8(&self.bytes).map_err(|e| invalid(&e))?;
                base64::decode(text)
                    .or_else(|_| {
                        base64::decode_config(text.trim_end_matches('='), base64::STANDARD_NO_PAD)
                    })
                    .map_err(|e| invalid(&e))
            }
        }
    }

    /// The same signature, decoded and written out in the alternate
    /// encoding.
    pub fn reencoded(&self) -> Result<SignatureEnvelope, RelayError> {
        let signature = self.decode()?;
        Ok(Self::encode(self.role, self.encoding.alternate(), &signature))
    }
}

impl Debug for SignatureEnvelope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureEnvelope")
            .field("role", &self.role)
            .field("encoding", &self.encoding)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Normalizer {
    default_encoding: Encoding,
}

impl Normalizer {
    pub fn new(default_encoding: Encoding) -> Self {
        Self { default_encoding }
    }

    pub fn default_encoding(&self) -> Encoding {
        self.default_encoding
    }

    pub fn normalize(
        &self,
        role: Role,
        value: impl Into<SignatureValue>,
    ) -> Result<SignatureEnvelope, RelayError> {
        match value.into() {
            SignatureValue::Envelope(envelope) => Ok(SignatureEnvelope { role, ..envelope }),
            SignatureValue::Raw(bytes) if !bytes.is_empty() => Ok(SignatureEnvelope {
                role,
                encoding: Encoding::Raw,
                bytes,
            }),
            SignatureValue::Raw(_) => Err(RelayError::unrecognized_signature_shape()),
            SignatureValue::Encoded(text) => self.tag(role, text),
            SignatureValue::Fields(fields) => match fields.first_present() {
                Some(text) => self.tag(role, text.to_string()),
                None => Err(RelayError::unrecognized_signature_shape()),
            },
        }
    }

    fn tag(&self, role: Role, text: String) -> Result<SignatureEnvelope, RelayError> {
        if text.is_empty() {
            return Err(RelayError::unrecognized_signature_shape());
        }
        let encoding = self.detect(&text);
        tracing::debug!(?role, %encoding, len = text.len(), "signature normalized");
        Ok(SignatureEnvelope {
            role,
            encoding,
            bytes: text.into_bytes(),
        })
    }

    /// Padding marks base64 and a `0x` prefix marks hex. Anything else is
    /// taken to be in the default encoding; text is never raw, so a raw
    /// default falls back to base64.
    fn detect(&self, text: &str) -> Encoding {
        if text.ends_with('=') {
            Encoding::Base64
        } else if text.starts_with("0x") {
            Encoding::Hex
        } else {
            match self.default_encoding {
                Encoding::Raw => Encoding::Base64,
                other => other,
            }
        }
    }
}
