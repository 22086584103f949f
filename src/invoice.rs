use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};

use crate::platform::Platform;

/// Opaque account identifier supplied by the caller.
pub type UserId = i64;

/// One extracted invoice. Only built when both platform and amount are known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invoice {
    pub user_id: UserId,
    pub platform: Platform,
    pub amount_cents: i64,
    pub date: NaiveDate,
    /// SHA-1 of the attachment bytes the invoice was read from.
    pub source_ref: String,
}

/// An invoice as held by a store, with the store-assigned identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredInvoice {
    pub id: String,
    pub created_at: String,
    #[serde(flatten)]
    pub invoice: Invoice,
}

impl Invoice {
    pub fn to_json(&self) -> Value {
        json!({
            "user_id": self.user_id,
            "platform": self.platform.as_str(),
            "amount": format_amount_cents(self.amount_cents),
            "amount_cents": self.amount_cents,
            "date_fetched": self.date.format("%Y-%m-%d").to_string(),
            "source_ref": self.source_ref,
        })
    }
}

impl StoredInvoice {
    pub fn to_json(&self) -> Value {
        let mut value = self.invoice.to_json();
        if let Some(obj) = value.as_object_mut() {
            obj.insert("id".to_string(), Value::String(self.id.clone()));
            obj.insert(
                "created_at".to_string(),
                Value::String(self.created_at.clone()),
            );
        }
        value
    }
}

pub fn format_amount_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
