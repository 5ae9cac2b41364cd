//! An in-memory ledger for tests, implementing both transport seams.
use crate::identity::Address;
use crate::message::RelayError;
use crate::protocol::intent::{IntentBytes, UnsignedIntent};
use crate::protocol::{AssetId, ObjectDigest, ObjectId, ObjectRef, TransactionDigest};
use crate::transport::{LedgerNode, ObjectCatalog};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

pub fn address(seed: u32) -> Address {
    let mut bytes = [0u8; 32];
    bytes[28..].copy_from_slice(&seed.to_be_bytes());
    Address::new(bytes)
}

/// An object whose id, version and digest are all derived from `seed`.
pub fn object(seed: u32, balance: u128) -> ObjectRef {
    let mut id = [0xC0u8; 32];
    id[28..].copy_from_slice(&seed.to_be_bytes());
    let mut digest = [0xD1u8; 32];
    digest[..4].copy_from_slice(&seed.to_le_bytes());
    ObjectRef {
        object_id: ObjectId::new(id),
        version: seed as u64,
        digest: ObjectDigest::new(digest),
        balance,
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Objects are returned in insertion order. Execution results are taken
/// from the script first; once it is empty every execution succeeds with
/// a digest of the intent bytes.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    objects: Mutex<BTreeMap<(Address, AssetId), Vec<ObjectRef>>>,
    catalog_error: Mutex<Option<RelayError>>,
    script: Mutex<VecDeque<Result<TransactionDigest, RelayError>>>,
    submissions: Mutex<Vec<(IntentBytes, Vec<String>)>>,
    catalog_calls: AtomicUsize,
    execute_calls: AtomicUsize,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_objects(
        self,
        owner: Address,
        asset: &AssetId,
        objects: impl IntoIterator<Item = ObjectRef>,
    ) -> Self {
        lock(&self.objects)
            .entry((owner, asset.clone()))
            .or_default()
            .extend(objects);
        self
    }

    pub fn fail_catalog(&self, error: RelayError) {
        *lock(&self.catalog_error) = Some(error);
    }

    pub fn script_execute(
        &self,
        results: impl IntoIterator<Item = Result<TransactionDigest, RelayError>>,
    ) {
        lock(&self.script).extend(results);
    }

    pub fn catalog_calls(&self) -> usize {
        self.catalog_calls.load(Ordering::SeqCst)
    }

    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    /// Wire signatures of every execution, in call order.
    pub fn submitted_signatures(&self) -> Vec<Vec<String>> {
        lock(&self.submissions)
            .iter()
            .map(|(_, signatures)| signatures.clone())
            .collect()
    }

    /// Decoded intents of every execution, in call order.
    pub fn submitted_intents(&self) -> Vec<UnsignedIntent> {
        lock(&self.submissions)
            .iter()
            .filter_map(|(bytes, _)| UnsignedIntent::from_bytes(bytes.as_slice()).ok())
            .collect()
    }

    pub fn submitted_bytes(&self) -> Vec<IntentBytes> {
        lock(&self.submissions)
            .iter()
            .map(|(bytes, _)| bytes.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectCatalog for MemoryLedger {
    async fn objects(
        &self,
        owner: &Address,
        asset: &AssetId,
    ) -> Result<Vec<ObjectRef>, RelayError> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.catalog_error).clone() {
            return Err(error);
        }
        Ok(lock(&self.objects)
            .get(&(*owner, asset.clone()))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl LedgerNode for MemoryLedger {
    async fn execute(
        &self,
        intent: &IntentBytes,
        signatures: &[String],
    ) -> Result<TransactionDigest, RelayError> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.submissions).push((intent.clone(), signatures.to_vec()));
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| Ok(TransactionDigest::new(intent.digest())))
    }
}
