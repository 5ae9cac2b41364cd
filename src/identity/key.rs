//! Keys held by this process.
//!
//! A [`LocalKey`] signs intent bytes with either Ed25519 or ECDSA P-256 and
//! produces the ledger's serialized signature format:
//! `flag || signature || public key`.
//!
//! The sponsor's key is loaded once at startup into a [`SponsorKey`], a
//! cheaply clonable shared handle that is never mutated afterwards.
use crate::identity::{Address, SignatureScheme};
use p256::pkcs8::FromPrivateKey;
use pkcs8::der::Document;
use signature::Signer;
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;

pub const SECRET_KEY_LENGTH: usize = 32;

const ED25519_OID: &str = "1.3.101.112";
const EC_PUBLIC_KEY_OID: &str = "1.2.840.10045.2.1";

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("the secret is empty")]
    Empty,

    #[error("could not decode the secret as hex or base64")]
    Encoding,

    #[error("expected a {expected}-byte secret, got {actual} bytes")]
    Length { expected: usize, actual: usize },

    #[error("unknown signature scheme flag {0:#04x}")]
    UnknownScheme(u8),

    #[error("invalid PEM document: {0}")]
    Pem(String),

    #[error("unsupported key algorithm {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid {scheme} secret key: {details}")]
    InvalidKey {
        scheme: &'static str,
        details: String,
    },
}

enum KeyPair {
    Ed25519(ed25519_dalek::Keypair),
    Secp256r1(p256::ecdsa::SigningKey),
}

/// A signing key with its derived public key and address.
pub struct LocalKey {
    key_pair: KeyPair,
    public_key: Vec<u8>,
    address: Address,
}

impl Debug for LocalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKey")
            .field("scheme", &self.scheme())
            .field("address", &self.address)
            .finish()
    }
}

impl LocalKey {
    pub fn ed25519_from_seed(seed: &[u8]) -> Result<Self, KeyError> {
        let secret = ed25519_dalek::SecretKey::from_bytes(seed).map_err(|e| {
            KeyError::InvalidKey {
                scheme: SignatureScheme::Ed25519.name(),
                details: e.to_string(),
            }
        })?;
        let public: ed25519_dalek::PublicKey = (&secret).into();
        let public_key = public.to_bytes().to_vec();

        Ok(Self {
            address: Address::from_public_key(SignatureScheme::Ed25519, &public_key),
            key_pair: KeyPair::Ed25519(ed25519_dalek::Keypair { secret, public }),
            public_key,
        })
    }

    pub fn secp256r1_from_seed(seed: &[u8]) -> Result<Self, KeyError> {
        let signing_key =
            p256::ecdsa::SigningKey::from_bytes(seed).map_err(|e| KeyError::InvalidKey {
                scheme: SignatureScheme::Secp256r1.name(),
                details: e.to_string(),
            })?;
        let public_key = signing_key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec();

        Ok(Self {
            address: Address::from_public_key(SignatureScheme::Secp256r1, &public_key),
            key_pair: KeyPair::Secp256r1(signing_key),
            public_key,
        })
    }

    pub fn from_seed(scheme: SignatureScheme, seed: &[u8]) -> Result<Self, KeyError> {
        if seed.len() != SECRET_KEY_LENGTH {
            return Err(KeyError::Length {
                expected: SECRET_KEY_LENGTH,
                actual: seed.len(),
            });
        }

        match scheme {
            SignatureScheme::Ed25519 => Self::ed25519_from_seed(seed),
            SignatureScheme::Secp256r1 => Self::secp256r1_from_seed(seed),
        }
    }

    /// Load a key from a PKCS#8 PEM document holding an Ed25519 or P-256
    /// private key.
    pub fn from_pem<P: AsRef<str>>(pem: P) -> Result<Self, KeyError> {
        let doc = pkcs8::PrivateKeyDocument::from_pem(pem.as_ref())
            .map_err(|e| KeyError::Pem(e.to_string()))?;
        let decoded = doc.decode();

        if decoded.algorithm.oid == pkcs8::ObjectIdentifier::new(ED25519_OID) {
            // The private key is an OCTET STRING wrapping the 32-byte seed.
            let seed = decoded
                .private_key
                .get(2..)
                .ok_or_else(|| KeyError::Pem("truncated Ed25519 key".to_string()))?;
            Self::from_seed(SignatureScheme::Ed25519, seed)
        } else if decoded.algorithm.oid == pkcs8::ObjectIdentifier::new(EC_PUBLIC_KEY_OID) {
            let sk = p256::SecretKey::from_pkcs8_pem(pem.as_ref())
                .map_err(|e| KeyError::Pem(e.to_string()))?;
            Self::secp256r1_from_seed(&sk.to_bytes())
        } else {
            Err(KeyError::UnsupportedAlgorithm(
                decoded.algorithm.oid.to_string(),
            ))
        }
    }

    /// Load a key from a configured secret. Accepted forms, after trimming:
    ///
    /// * a PKCS#8 PEM document;
    /// * `ed25519:<seed>` or `secp256r1:<seed>` with a hex or base64 seed;
    /// * a base64 `flag || seed` keystore entry (33 bytes);
    /// * a bare hex or base64 32-byte seed, taken as Ed25519.
    pub fn from_secret(secret: &str) -> Result<Self, KeyError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(KeyError::Empty);
        }

        if secret.starts_with("-----BEGIN") {
            return Self::from_pem(secret);
        }

        for scheme in [SignatureScheme::Ed25519, SignatureScheme::Secp256r1] {
            if let Some(rest) = secret.strip_prefix(scheme.name()).and_then(|r| r.strip_prefix(':'))
            {
                return Self::from_seed(scheme, &decode_secret(rest)?);
            }
        }

        let bytes = decode_secret(secret)?;
        if bytes.len() == SECRET_KEY_LENGTH + 1 {
            let scheme =
                SignatureScheme::from_flag(bytes[0]).ok_or(KeyError::UnknownScheme(bytes[0]))?;
            return Self::from_seed(scheme, &bytes[1..]);
        }
        Self::from_seed(SignatureScheme::Ed25519, &bytes)
    }

    pub fn scheme(&self) -> SignatureScheme {
        match self.key_pair {
            KeyPair::Ed25519(_) => SignatureScheme::Ed25519,
            KeyPair::Secp256r1(_) => SignatureScheme::Secp256r1,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Sign `message` and return the serialized signature
    /// (`flag || signature || public key`).
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature = match &self.key_pair {
            KeyPair::Ed25519(key_pair) => {
                let signature: ed25519::Signature = key_pair.sign(message);
                signature.as_ref().to_vec()
            }
            KeyPair::Secp256r1(signing_key) => {
                let signature: p256::ecdsa::Signature = signing_key.sign(message);
                signature.as_ref().to_vec()
            }
        };

        let mut serialized = Vec::with_capacity(1 + signature.len() + self.public_key.len());
        serialized.push(self.scheme().flag());
        serialized.extend_from_slice(&signature);
        serialized.extend_from_slice(&self.public_key);
        serialized
    }
}

/// Hex (optionally `0x`-prefixed) first, standard base64 second.
fn decode_secret(text: &str) -> Result<Vec<u8>, KeyError> {
    let hex_digits = text.strip_prefix("0x").unwrap_or(text);
    if let Ok(bytes) = hex::decode(hex_digits) {
        return Ok(bytes);
    }
    base64::decode(text).map_err(|_| KeyError::Encoding)
}

/// The sponsor's key, loaded once and shared read-only by every request.
#[derive(Clone, Debug)]
pub struct SponsorKey(Arc<LocalKey>);

impl SponsorKey {
    pub fn new(key: LocalKey) -> Self {
        Self(Arc::new(key))
    }

    pub fn from_secret(secret: &str) -> Result<Self, KeyError> {
        LocalKey::from_secret(secret).map(Self::new)
    }
}

impl Deref for SponsorKey {
    type Target = LocalKey;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signature::Signature as _;
    use signature::Verifier;

    const SEED: [u8; 32] = [
        0x77, 0x28, 0x4d, 0x8d, 0x91, 0x61, 0xae, 0x3c, 0x3b, 0xc3, 0x8d, 0x02, 0x07, 0xf1,
        0x13, 0x0f, 0xb5, 0xe4, 0xc2, 0x32, 0xa9, 0x26, 0xad, 0xd3, 0xf4, 0x29, 0xc0, 0x0d,
        0x58, 0xc6, 0x23, 0xc3,
    ];

    #[test]
    fn from_pem() {
        let pem = concat!(
            "-----",
            "BEGIN ",
            "PRIVATE ",
            "KEY",
            "-----\n",
            "MC4CAQAwBQYDK2VwBCIEIHcoTY2RYa48O8ONAgfxEw+15MIyqSat0/QpwA1YxiPD\n",
            "-----",
            "END ",
            "PRIVATE ",
            "KEY-----"
        );

        let from_pem = LocalKey::from_pem(pem).unwrap();
        let from_seed = LocalKey::ed25519_from_seed(&SEED).unwrap();
        assert_eq!(from_pem.scheme(), SignatureScheme::Ed25519);
        assert_eq!(from_pem.address(), from_seed.address());
    }

    #[test]
    fn from_pem_secp256r1() {
        let pem = concat!(
            "-----",
            "BEGIN ",
            "PRIVATE ",
            "KEY",
            "-----\n",
            "MIGHAgEAMBMGByqGSM49AgEGCCqGSM49AwEHBG0wawIBAQQgP98jHOXahHxbf0mP\n",
            "3GRZMapIa+d7LdF3gUbVvDWcTqChRANCAAQCms9DmOtKoZGgIoTu44Iczrb7Hc48\n",
            "OS/yHGKNEKAhwY5Q7HDXsIDWz4xj/uoGC6ihKKqYeJsnbbaOW15k4QJe\n",
            "-----",
            "END ",
            "PRIVATE ",
            "KEY-----"
        );
        let scalar =
            hex::decode("3fdf231ce5da847c5b7f498fdc645931aa486be77b2dd1778146d5bc359c4ea0")
                .unwrap();

        let from_pem = LocalKey::from_pem(pem).unwrap();
        let from_seed = LocalKey::secp256r1_from_seed(&scalar).unwrap();
        assert_eq!(from_pem.scheme(), SignatureScheme::Secp256r1);
        assert_eq!(from_pem.address(), from_seed.address());
        assert_eq!(from_pem.public_key(), from_seed.public_key());
    }

    #[test]
    fn secret_forms_agree() {
        let hex_form = LocalKey::from_secret(&hex::encode(SEED)).unwrap();
        let prefixed = LocalKey::from_secret(&format!("0x{}", hex::encode(SEED))).unwrap();
        let b64_form = LocalKey::from_secret(&base64::encode(SEED)).unwrap();
        let tagged = LocalKey::from_secret(&format!("ed25519:{}", hex::encode(SEED))).unwrap();

        let mut keystore = vec![SignatureScheme::Ed25519.flag()];
        keystore.extend_from_slice(&SEED);
        let keystore = LocalKey::from_secret(&base64::encode(keystore)).unwrap();

        for key in [&prefixed, &b64_form, &tagged, &keystore] {
            assert_eq!(key.address(), hex_form.address());
        }
    }

    #[test]
    fn secp256r1_secret() {
        let key = LocalKey::from_secret(&format!("secp256r1:{}", hex::encode(SEED))).unwrap();
        assert_eq!(key.scheme(), SignatureScheme::Secp256r1);
        assert_eq!(key.public_key().len(), 33);
        assert_ne!(
            key.address(),
            LocalKey::ed25519_from_seed(&SEED).unwrap().address()
        );
    }

    #[test]
    fn rejects_bad_secrets() {
        assert!(matches!(LocalKey::from_secret("  "), Err(KeyError::Empty)));
        assert!(matches!(
            LocalKey::from_secret("not a key!"),
            Err(KeyError::Encoding)
        ));
        assert!(matches!(
            LocalKey::from_secret("0102"),
            Err(KeyError::Length { actual: 2, .. })
        ));

        let mut unknown = vec![0x09];
        unknown.extend_from_slice(&SEED);
        assert!(matches!(
            LocalKey::from_secret(&hex::encode(unknown)),
            Err(KeyError::UnknownScheme(0x09))
        ));
    }

    #[test]
    fn ed25519_signature_layout_verifies() {
        let key = LocalKey::ed25519_from_seed(&SEED).unwrap();
        let serialized = key.sign(b"intent");

        assert_eq!(serialized.len(), 1 + 64 + 32);
        assert_eq!(serialized[0], SignatureScheme::Ed25519.flag());
        assert_eq!(&serialized[65..], key.public_key());

        let public = ed25519_dalek::PublicKey::from_bytes(key.public_key()).unwrap();
        let signature = ed25519::Signature::from_bytes(&serialized[1..65]).unwrap();
        assert!(public.verify(b"intent", &signature).is_ok());
        assert!(public.verify(b"other", &signature).is_err());
    }

    #[test]
    fn secp256r1_signature_layout_verifies() {
        let key = LocalKey::secp256r1_from_seed(&SEED).unwrap();
        let serialized = key.sign(b"intent");

        assert_eq!(serialized.len(), 1 + 64 + 33);
        assert_eq!(serialized[0], SignatureScheme::Secp256r1.flag());

        let verifying = p256::ecdsa::VerifyingKey::from_sec1_bytes(key.public_key()).unwrap();
        let signature = p256::ecdsa::Signature::try_from(&serialized[1..65]).unwrap();
        assert!(verifying.verify(b"intent", &signature).is_ok());
    }

    #[test]
    fn sponsor_key_is_shared() {
        let sponsor = SponsorKey::new(LocalKey::ed25519_from_seed(&SEED).unwrap());
        let clone = sponsor.clone();
        assert_eq!(sponsor.address(), clone.address());
        assert!(Arc::ptr_eq(&sponsor.0, &clone.0));
    }
}
