//! Batch edit protocol
//!
//! An ordered list of [`BatchEdit`]s produces an index-aligned list of
//! [`BatchEditResult`]s. Items fail individually; there is no atomicity
//! across the batch. A batch longer than the store's `batch_size` fails as a
//! whole before any backend request is issued.
//!
//! Wrapper layers use [`prefail_and_delegate`] to reject items locally and
//! hand only the survivors to the next layer, merging results back into
//! input order.

use crate::error::{StoreError, StoreResult};
use crate::item::Item;
use crate::meta::StoreMeta;
use uuid::Uuid;

/// The operation carried by a batch edit
#[derive(Debug, Clone, PartialEq)]
pub enum EditOp {
    /// Create a new item
    Create(Item),
    /// Update the item identified by the key fields in the payload
    Update(Item),
    /// Delete the item with this key
    Delete(String),
}

impl EditOp {
    /// Operation name
    pub fn name(&self) -> &'static str {
        match self {
            EditOp::Create(_) => "create",
            EditOp::Update(_) => "update",
            EditOp::Delete(_) => "delete",
        }
    }
}

/// One edit within a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEdit {
    /// Correlation id echoed in the result
    pub id: Uuid,
    /// The edit
    pub op: EditOp,
}

impl BatchEdit {
    /// Create edit with a fresh correlation id
    pub fn create(item: Item) -> Self {
        BatchEdit {
            id: Uuid::new_v4(),
            op: EditOp::Create(item),
        }
    }

    /// Update edit with a fresh correlation id
    pub fn update(updates: Item) -> Self {
        BatchEdit {
            id: Uuid::new_v4(),
            op: EditOp::Update(updates),
        }
    }

    /// Delete edit with a fresh correlation id
    pub fn delete(key: impl Into<String>) -> Self {
        BatchEdit {
            id: Uuid::new_v4(),
            op: EditOp::Delete(key.into()),
        }
    }
}

/// Outcome of one batch edit
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEditResult {
    /// The edit this result answers
    pub edit: BatchEdit,
    /// True if the edit was applied
    pub success: bool,
    /// Stored item after a successful create or update
    pub item: Option<Item>,
    /// Error code (see [`StoreError::code`]) on failure
    pub code: Option<String>,
    /// Human-readable failure details
    pub details: Option<String>,
}

impl BatchEditResult {
    /// A successful result
    pub fn ok(edit: BatchEdit, item: Option<Item>) -> Self {
        BatchEditResult {
            edit,
            success: true,
            item,
            code: None,
            details: None,
        }
    }

    /// A failed result
    pub fn failed(edit: BatchEdit, error: &StoreError) -> Self {
        BatchEditResult {
            edit,
            success: false,
            item: None,
            code: Some(error.code().to_string()),
            details: Some(error.to_string()),
        }
    }
}

/// Fail with `BatchTooLarge` if `len` exceeds the store's batch size
pub fn check_batch_size(meta: &StoreMeta, len: usize) -> StoreResult<()> {
    if len > meta.batch_size {
        return Err(StoreError::BatchTooLarge {
            size: len,
            max: meta.batch_size,
        });
    }
    Ok(())
}

/// Reject edits locally and delegate the survivors
///
/// `check` runs once per edit in input order; edits it rejects become failed
/// results. The rest go to `delegate` in one call, whose results must be
/// aligned with its input. The merged list is aligned with `edits`.
pub fn prefail_and_delegate<C, D>(
    edits: Vec<BatchEdit>,
    mut check: C,
    delegate: D,
) -> StoreResult<Vec<BatchEditResult>>
where
    C: FnMut(&BatchEdit) -> StoreResult<()>,
    D: FnOnce(Vec<BatchEdit>) -> StoreResult<Vec<BatchEditResult>>,
{
    let mut slots: Vec<Option<BatchEditResult>> = Vec::with_capacity(edits.len());
    let mut survivors = Vec::new();
    let mut positions = Vec::new();
    for (index, edit) in edits.into_iter().enumerate() {
        match check(&edit) {
            Ok(()) => {
                slots.push(None);
                positions.push(index);
                survivors.push(edit);
            }
            Err(e) => slots.push(Some(BatchEditResult::failed(edit, &e))),
        }
    }
    if !survivors.is_empty() {
        let delegated = delegate(survivors)?;
        if delegated.len() != positions.len() {
            return Err(StoreError::backend(format!(
                "batch returned {} results for {} edits",
                delegated.len(),
                positions.len()
            )));
        }
        for (index, result) in positions.into_iter().zip(delegated) {
            slots[index] = Some(result);
        }
    }
    slots
        .into_iter()
        .map(|slot| slot.ok_or_else(|| StoreError::backend("batch result missing")))
        .collect()
}
