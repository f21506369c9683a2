//! Per-item results of a reconciliation pass.

use std::time::Duration;

use serde::Serialize;

use relm_core::StoredId;

/// Which phase an item belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemOp {
    Write,
    Delete,
}

/// Outcome of writing or deleting one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub id: StoredId,
    pub op: ItemOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemOutcome {
    pub fn ok(id: StoredId, op: ItemOp) -> Self {
        Self { id, op, error: None }
    }

    pub fn failed(id: StoredId, op: ItemOp, error: impl ToString) -> Self {
        Self {
            id,
            op,
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything a completed pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Live releases in scope.
    pub live: usize,
    /// Stored identifiers at the start of the pass.
    pub stored: usize,
    pub items: Vec<ItemOutcome>,
    pub duration: Duration,
}

impl PassReport {
    fn count(&self, op: ItemOp, ok: bool) -> usize {
        self.items
            .iter()
            .filter(|item| item.op == op && item.is_ok() == ok)
            .count()
    }

    pub fn to_write(&self) -> usize {
        self.items.iter().filter(|i| i.op == ItemOp::Write).count()
    }

    pub fn to_delete(&self) -> usize {
        self.items.iter().filter(|i| i.op == ItemOp::Delete).count()
    }

    pub fn written(&self) -> usize {
        self.count(ItemOp::Write, true)
    }

    pub fn deleted(&self) -> usize {
        self.count(ItemOp::Delete, true)
    }

    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| !i.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(|i| !i.is_ok())
    }

    /// Whether the store now matches the live set observed by the pass.
    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }
}
