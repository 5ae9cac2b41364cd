use crate::identity::{Address, LocalKey, SponsorKey};
use crate::message::RelayError;
use crate::protocol::intent::IntentBytes;
use crate::signature::{Encoding, Normalizer, Role, SignatureEnvelope, SignatureValue};
use async_trait::async_trait;
use std::fmt::{Debug, Formatter};

#[derive(Debug, thiserror::Error)]
pub enum OwnerSigningError {
    #[error("the owner declined to sign: {0}")]
    Declined(String),

    #[error("the owner's signer is unavailable: {0}")]
    Unavailable(String),
}

/// The owner's signing capability: a wallet, an agent, or a local key.
/// It receives the exact intent bytes and returns a signature in whatever
/// shape it produces.
#[async_trait]
pub trait OwnerSigner: Send + Sync {
    async fn sign(&self, intent: &IntentBytes) -> Result<SignatureValue, OwnerSigningError>;
}

#[async_trait]
impl<F> OwnerSigner for F
where
    F: Fn(&IntentBytes) -> Result<SignatureValue, OwnerSigningError> + Send + Sync,
{
    async fn sign(&self, intent: &IntentBytes) -> Result<SignatureValue, OwnerSigningError> {
        self(intent)
    }
}

/// An owner signer backed by a key held in this process. Signatures are
/// returned base64 encoded, the way wallets return them.
pub struct LocalOwnerSigner {
    key: LocalKey,
}

impl LocalOwnerSigner {
    pub fn new(key: LocalKey) -> Self {
        Self { key }
    }

    pub fn address(&self) -> Address {
        self.key.address()
    }
}

impl Debug for LocalOwnerSigner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalOwnerSigner")
            .field("address", &self.key.address())
            .finish()
    }
}

#[async_trait]
impl OwnerSigner for LocalOwnerSigner {
    async fn sign(&self, intent: &IntentBytes) -> Result<SignatureValue, OwnerSigningError> {
        Ok(SignatureValue::Encoded(base64::encode(
            self.key.sign(intent.as_slice()),
        )))
    }
}

/// Normalized signatures over one intent, owner first.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignaturePair {
    pub owner: SignatureEnvelope,
    pub sponsor: Option<SignatureEnvelope>,
}

impl SignaturePair {
    pub fn wire(&self) -> Vec<String> {
        std::iter::once(&self.owner)
            .chain(self.sponsor.as_ref())
            .map(SignatureEnvelope::to_wire)
            .collect()
    }

    pub fn with_owner(self, owner: SignatureEnvelope) -> Self {
        Self { owner, ..self }
    }
}

/// Collects the owner's signature through an [`OwnerSigner`] and adds the
/// sponsor's from the process-wide sponsor key.
#[derive(Clone, Debug)]
pub struct DualSigner {
    sponsor: SponsorKey,
    normalizer: Normalizer,
}

impl DualSigner {
    pub fn new(sponsor: SponsorKey, default_encoding: Encoding) -> Self {
        Self {
            sponsor,
            normalizer: Normalizer::new(default_encoding),
        }
    }

    pub fn sponsor_address(&self) -> Address {
        self.sponsor.address()
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Owner and sponsor signatures over `intent`. The owner is asked first;
    /// if they decline, the sponsor key is never used.
    pub async fn sign_sponsored(
        &self,
        intent: &IntentBytes,
        owner: &dyn OwnerSigner,
    ) -> Result<SignaturePair, RelayError> {
        let owner = self.owner_envelope(intent, owner).await?;
        let signature = self.sponsor.sign(intent.as_slice());
        let encoding = self.normalizer.default_encoding();
        let sponsor = self.normalizer.normalize(
            Role::Sponsor,
            SignatureEnvelope::encode(Role::Sponsor, encoding, &signature),
        )?;
        Ok(SignaturePair {
            owner,
            sponsor: Some(sponsor),
        })
    }

    /// Only the owner's signature, for transfers where the owner pays gas.
    pub async fn sign_owner_only(
        &self,
        intent: &IntentBytes,
        owner: &dyn OwnerSigner,
    ) -> Result<SignaturePair, RelayError> {
        Ok(SignaturePair {
            owner: self.owner_envelope(intent, owner).await?,
            sponsor: None,
        })
    }

    async fn owner_envelope(
        &self,
        intent: &IntentBytes,
        owner: &dyn OwnerSigner,
    ) -> Result<SignatureEnvelope, RelayError> {
        let value = owner.sign(intent).await.map_err(|e| {
            tracing::debug!(error = %e, "owner signature unavailable");
            RelayError::owner_signature_denied(e)
        })?;
        self.normalizer.normalize(Role::Owner, value)
    }
}
