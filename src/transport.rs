use crate::identity::Address;
use crate::message::RelayError;
use crate::protocol::intent::IntentBytes;
use crate::protocol::{AssetId, ObjectRef, TransactionDigest};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Reads spendable objects from the ledger.
#[async_trait]
pub trait ObjectCatalog: Send + Sync + Debug {
    /// Every spendable object of `asset` owned by `owner`, in the ledger's
    /// natural order. Read failures are reported as `CatalogUnavailable`.
    async fn objects(&self, owner: &Address, asset: &AssetId)
        -> Result<Vec<ObjectRef>, RelayError>;
}

/// Executes signed transactions.
#[async_trait]
pub trait LedgerNode: Send + Sync + Debug {
    /// Submit the intent bytes with their wire-encoded signatures, owner
    /// first. One call is one network round trip; implementations never retry.
    async fn execute(
        &self,
        intent: &IntentBytes,
        signatures: &[String],
    ) -> Result<TransactionDigest, RelayError>;
}

#[async_trait]
impl<T: ObjectCatalog + ?Sized> ObjectCatalog for Arc<T> {
    async fn objects(
        &self,
        owner: &Address,
        asset: &AssetId,
    ) -> Result<Vec<ObjectRef>, RelayError> {
        self.as_ref().objects(owner, asset).await
    }
}

#[async_trait]
impl<T: LedgerNode + ?Sized> LedgerNode for Arc<T> {
    async fn execute(
        &self,
        intent: &IntentBytes,
        signatures: &[String],
    ) -> Result<TransactionDigest, RelayError> {
        self.as_ref().execute(intent, signatures).await
    }
}
