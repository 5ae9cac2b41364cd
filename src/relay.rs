use crate::config::RelayConfig;
use crate::identity::{Address, SponsorKey};
use crate::message::RelayError;
use crate::protocol::intent::{IntentBuilder, IntentBytes, UnsignedIntent};
use crate::protocol::{AssetRegistry, TransactionDigest};
use crate::selector::{fetch_and_select, CoinSelection};
use crate::signer::{DualSigner, OwnerSigner, SignaturePair};
use crate::submit::Submission;
use crate::transport::{LedgerNode, ObjectCatalog};

pub type SubmissionResult = Result<TransactionDigest, RelayError>;

/// A transfer as callers describe it: a decimal amount of an asset symbol.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferRequest {
    pub amount: String,
    pub asset: String,
    pub recipient: Address,
    pub sender: Address,
}

impl TransferRequest {
    pub fn new(
        amount: impl Into<String>,
        asset: impl Into<String>,
        recipient: Address,
        sender: Address,
    ) -> Self {
        Self {
            amount: amount.into(),
            asset: asset.into(),
            recipient,
            sender,
        }
    }
}

/// Builds, signs and submits transfers against one ledger. Every request
/// reads fresh objects; nothing is cached between requests apart from the
/// sponsor key.
#[derive(Debug)]
pub struct SponsoredRelay<L> {
    ledger: L,
    registry: AssetRegistry,
    builder: IntentBuilder,
    signer: DualSigner,
}

impl<L: ObjectCatalog + LedgerNode> SponsoredRelay<L> {
    pub fn new(ledger: L, sponsor: SponsorKey, config: &RelayConfig) -> Self {
        Self {
            ledger,
            registry: AssetRegistry::builtin(),
            builder: IntentBuilder::new(config.gas_budget, config.gas_price),
            signer: DualSigner::new(sponsor, config.default_encoding),
        }
    }

    pub fn with_registry(mut self, registry: AssetRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn sponsor_address(&self) -> Address {
        self.signer.sponsor_address()
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// The unsigned intent `send_sponsored` would submit.
    pub async fn prepare_sponsored(
        &self,
        request: &TransferRequest,
    ) -> Result<UnsignedIntent, RelayError> {
        let selection = self.select(request).await?;
        let sponsor = self.sponsor_address();
        let fee_objects = self
            .ledger
            .objects(&sponsor, &self.registry.fee_currency().asset_id)
            .await?;
        self.builder
            .build_sponsored(&selection, request.recipient, sponsor, &fee_objects)
    }

    /// The unsigned intent `send_direct` would submit.
    pub async fn prepare_direct(
        &self,
        request: &TransferRequest,
    ) -> Result<UnsignedIntent, RelayError> {
        let selection = self.select(request).await?;
        let fee_objects = self
            .ledger
            .objects(&request.sender, &self.registry.fee_currency().asset_id)
            .await?;
        self.builder
            .build_direct(&selection, request.recipient, &fee_objects)
    }

    /// Transfer with the sponsor paying gas. The owner signs first; if they
    /// decline nothing is sent to the node.
    pub async fn send_sponsored(
        &self,
        request: &TransferRequest,
        owner: &dyn OwnerSigner,
    ) -> SubmissionResult {
        let intent = self.prepare_sponsored(request).await?;
        let bytes = intent.to_bytes()?;
        let signatures = self.signer.sign_sponsored(&bytes, owner).await?;
        self.submit(bytes, signatures).await
    }

    /// Transfer with the owner paying their own gas and signing alone.
    pub async fn send_direct(
        &self,
        request: &TransferRequest,
        owner: &dyn OwnerSigner,
    ) -> SubmissionResult {
        let intent = self.prepare_direct(request).await?;
        let bytes = intent.to_bytes()?;
        let signatures = self.signer.sign_owner_only(&bytes, owner).await?;
        self.submit(bytes, signatures).await
    }

    async fn select(&self, request: &TransferRequest) -> Result<CoinSelection, RelayError> {
        let asset = self.registry.lookup(&request.asset)?;
        let amount = asset.parse_amount(&request.amount)?;
        fetch_and_select(&self.ledger, request.sender, asset, amount).await
    }

    async fn submit(&self, bytes: IntentBytes, signatures: SignaturePair) -> SubmissionResult {
        let result = Submission::new(&self.ledger, bytes, signatures)
            .run()
            .await
            .into_result();
        match &result {
            Ok(digest) => tracing::info!(%digest, "transfer confirmed"),
            Err(e) => tracing::info!(code = ?e.code, "transfer failed"),
        }
        result
    }
}
