use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;
use crate::invoice::{Invoice, StoredInvoice, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreHealth {
    pub ok: bool,
    pub detail: String,
}

impl StoreHealth {
    pub fn healthy(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn failing(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Downstream invoice storage. The pipeline decides the clear-then-append policy;
/// implementations only provide the primitives.
pub trait InvoiceStore: Send + Sync {
    fn append(&self, invoice: &Invoice) -> Result<StoredInvoice, StoreError>;
    /// Invoices of one user, oldest invoice date first, insertion order within a date.
    fn list_by_user(&self, user_id: UserId) -> Result<Vec<StoredInvoice>, StoreError>;
    /// Removes every invoice of `user_id`; returns how many were removed (0 when none).
    fn clear_user(&self, user_id: UserId) -> Result<usize, StoreError>;
    fn health(&self) -> StoreHealth;
}

pub(crate) fn validate_invoice(invoice: &Invoice) -> Result<(), StoreError> {
    if invoice.amount_cents <= 0 {
        return Err(StoreError::InvalidRecord(format!(
            "amount must be positive, got {} cents",
            invoice.amount_cents
        )));
    }
    Ok(())
}

pub(crate) fn new_stored_invoice(invoice: &Invoice) -> StoredInvoice {
    StoredInvoice {
        id: Uuid::new_v4().to_string(),
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        invoice: invoice.clone(),
    }
}

/// Process-local store keyed by user.
#[derive(Debug, Default)]
pub struct MemoryInvoiceStore {
    by_user: DashMap<UserId, Vec<StoredInvoice>>,
}

impl MemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InvoiceStore for MemoryInvoiceStore {
    fn append(&self, invoice: &Invoice) -> Result<StoredInvoice, StoreError> {
        validate_invoice(invoice)?;
        let stored = new_stored_invoice(invoice);
        self.by_user
            .entry(invoice.user_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    fn list_by_user(&self, user_id: UserId) -> Result<Vec<StoredInvoice>, StoreError> {
        let mut rows = self
            .by_user
            .get(&user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        rows.sort_by_key(|r| r.invoice.date);
        Ok(rows)
    }

    fn clear_user(&self, user_id: UserId) -> Result<usize, StoreError> {
        Ok(self
            .by_user
            .remove(&user_id)
            .map(|(_, rows)| rows.len())
            .unwrap_or(0))
    }

    fn health(&self) -> StoreHealth {
        StoreHealth::healthy(format!("memory store, {} users", self.by_user.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use chrono::NaiveDate;

    fn invoice(user_id: UserId, day: u32, cents: i64) -> Invoice {
        Invoice {
            user_id,
            platform: Platform::Swiggy,
            amount_cents: cents,
            date: NaiveDate::from_ymd_opt(2026, 10, day).expect("valid date"),
            source_ref: format!("ref-{day}"),
        }
    }

    #[test]
    fn list_is_per_user_and_date_ordered() {
        let store = MemoryInvoiceStore::new();
        store.append(&invoice(1, 12, 5_000)).expect("append");
        store.append(&invoice(1, 3, 7_000)).expect("append");
        store.append(&invoice(2, 5, 9_000)).expect("append");

        let rows = store.list_by_user(1).expect("list");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].invoice.amount_cents, 7_000);
        assert_eq!(rows[1].invoice.amount_cents, 5_000);
        assert_ne!(rows[0].id, rows[1].id);
        assert_eq!(store.list_by_user(3).expect("list").len(), 0);
    }

    #[test]
    fn clear_is_idempotent_and_scoped_to_user() {
        let store = MemoryInvoiceStore::new();
        store.append(&invoice(1, 1, 5_000)).expect("append");
        store.append(&invoice(1, 2, 5_000)).expect("append");
        store.append(&invoice(2, 2, 5_000)).expect("append");

        assert_eq!(store.clear_user(1).expect("clear"), 2);
        assert_eq!(store.clear_user(1).expect("clear again"), 0);
        assert_eq!(store.clear_user(42).expect("clear unknown"), 0);
        assert_eq!(store.list_by_user(2).expect("list").len(), 1);
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let store = MemoryInvoiceStore::new();
        let err = store.append(&invoice(1, 1, 0)).expect_err("zero amount");
        assert!(matches!(err, StoreError::InvalidRecord(_)));
        assert!(store.health().ok);
    }
}
