//! Coin selection.
//!
//! Objects are considered in a fixed selection order derived from the
//! ledger's natural order: objects whose balance equals the target first,
//! then objects that cover the target alone, then everything else. Each
//! group keeps ledger order. The selection is the shortest prefix of that
//! order whose cumulative balance reaches the target.
use crate::identity::Address;
use crate::message::RelayError;
use crate::protocol::{AssetDescriptor, ObjectRef};
use crate::transport::ObjectCatalog;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SelectionMode {
    /// The selected objects sum to the amount and move as they are.
    TransferWhole,
    /// The selected objects exceed the amount; `remainder` stays with the
    /// owner after the split.
    SplitRequired { remainder: u128 },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoinSelection {
    pub owner: Address,
    pub asset: AssetDescriptor,
    pub amount: u128,
    pub inputs: Vec<ObjectRef>,
    pub mode: SelectionMode,
}

impl CoinSelection {
    pub fn selected_balance(&self) -> u128 {
        self.inputs.iter().map(|o| o.balance).sum()
    }

    pub fn requires_split(&self) -> bool {
        matches!(self.mode, SelectionMode::SplitRequired { .. })
    }
}

/// Select objects covering `amount` out of `objects` (in ledger order).
pub fn select_coins(
    owner: Address,
    asset: &AssetDescriptor,
    objects: Vec<ObjectRef>,
    amount: u128,
) -> Result<CoinSelection, RelayError> {
    if objects.is_empty() {
        return Err(RelayError::no_spendable_objects(owner, &asset.symbol));
    }

    // `None` when the balances overflow u128, which exceeds any amount.
    let total = objects
        .iter()
        .try_fold(0u128, |acc, o| acc.checked_add(o.balance));
    if let Some(total) = total.filter(|t| *t < amount) {
        return Err(RelayError::insufficient_balance(
            asset.format_amount(total),
            asset.format_amount(amount),
        ));
    }

    let selection = |inputs: Vec<ObjectRef>, mode| CoinSelection {
        owner,
        asset: asset.clone(),
        amount,
        inputs,
        mode,
    };

    if total == Some(amount) {
        return Ok(selection(objects, SelectionMode::TransferWhole));
    }

    let mut inputs = Vec::new();
    let mut remaining = amount;
    let mut mode = None;
    for object in selection_order(objects, amount) {
        let balance = object.balance;
        inputs.push(object);
        if balance >= remaining {
            mode = Some(if balance == remaining {
                SelectionMode::TransferWhole
            } else {
                SelectionMode::SplitRequired {
                    remainder: balance - remaining,
                }
            });
            break;
        }
        remaining -= balance;
    }

    let mode = mode.ok_or_else(|| {
        RelayError::insufficient_balance(
            asset.format_amount(amount - remaining),
            asset.format_amount(amount),
        )
    })?;
    tracing::debug!(
        inputs = inputs.len(),
        ?mode,
        asset = %asset.asset_id,
        "coins selected"
    );
    Ok(selection(inputs, mode))
}

/// Stable reordering of `objects`: exact matches, then covering objects,
/// then the rest.
pub fn selection_order(objects: Vec<ObjectRef>, amount: u128) -> Vec<ObjectRef> {
    let mut ordered = objects;
    ordered.sort_by_key(|o| match o.balance {
        b if b == amount => 0u8,
        b if b > amount => 1,
        _ => 2,
    });
    ordered
}

/// Read `owner`'s objects of `asset` from the catalog and select among them.
pub async fn fetch_and_select<C: ObjectCatalog + ?Sized>(
    catalog: &C,
    owner: Address,
    asset: &AssetDescriptor,
    amount: u128,
) -> Result<CoinSelection, RelayError> {
    let objects = catalog.objects(&owner, &asset.asset_id).await?;
    select_coins(owner, asset, objects, amount)
}
