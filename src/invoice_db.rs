use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StoreError;
use crate::invoice::{Invoice, StoredInvoice, UserId};
use crate::invoice_store::{new_stored_invoice, validate_invoice, InvoiceStore, StoreHealth};
use crate::platform::Platform;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_invoices.sql",
    include_str!("../db/migrations/0001_invoices.sql"),
)];

fn applied_versions(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let versions = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(versions)
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, String> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|v| v != 0)
    .map_err(|e| format!("check table {table} failed: {e}"))
}

/// Creates the database if needed and applies pending migrations, each in its own
/// transaction. Returns the versions applied by this call.
pub fn apply_embedded_migrations(db_path: &Path) -> Result<Vec<String>, String> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("create database directory failed: {e}"))?;
    }
    let mut conn = Connection::open(db_path).map_err(|e| format!("open database failed: {e}"))?;
    let already =
        applied_versions(&conn).map_err(|e| format!("read applied migrations failed: {e}"))?;

    let mut applied_now = Vec::new();
    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| !already.contains(*v)) {
        let tx = conn
            .transaction()
            .map_err(|e| format!("begin migration {version} failed: {e}"))?;
        tx.execute_batch(sql)
            .and_then(|_| tx.execute("INSERT INTO schema_migrations(version) VALUES (?1)", [version]))
            .map_err(|e| format!("apply migration {version} failed: {e}"))?;
        tx.commit()
            .map_err(|e| format!("commit migration {version} failed: {e}"))?;
        applied_now.push((*version).to_string());
    }
    Ok(applied_now)
}

/// SQLite-backed store. Every operation opens its own connection to `db_path`.
#[derive(Debug, Clone)]
pub struct SqliteInvoiceStore {
    db_path: PathBuf,
}

impl SqliteInvoiceStore {
    /// Opens the database at `db_path`, creating it and applying pending migrations.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = db_path.into();
        apply_embedded_migrations(&db_path).map_err(StoreError::Unavailable)?;
        Ok(Self { db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.db_path).map_err(|e| {
            StoreError::Unavailable(format!(
                "open {} failed: {e}",
                self.db_path.to_string_lossy()
            ))
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

fn row_to_stored_invoice(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredInvoice> {
    let platform_text: String = row.get(2)?;
    let date_text: String = row.get(4)?;
    let platform = platform_text.parse::<Platform>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    let date = NaiveDate::parse_from_str(&date_text, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(StoredInvoice {
        id: row.get(0)?,
        created_at: row.get(6)?,
        invoice: Invoice {
            user_id: row.get(1)?,
            platform,
            amount_cents: row.get(3)?,
            date,
            source_ref: row.get(5)?,
        },
    })
}

impl InvoiceStore for SqliteInvoiceStore {
    fn append(&self, invoice: &Invoice) -> Result<StoredInvoice, StoreError> {
        validate_invoice(invoice)?;
        let stored = new_stored_invoice(invoice);
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO invoices(id, user_id, platform, amount_cents, invoice_date, source_ref, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                stored.id,
                invoice.user_id,
                invoice.platform.as_str(),
                invoice.amount_cents,
                invoice.date.format("%Y-%m-%d").to_string(),
                invoice.source_ref,
                stored.created_at,
            ],
        )?;
        Ok(stored)
    }

    fn list_by_user(&self, user_id: UserId) -> Result<Vec<StoredInvoice>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, platform, amount_cents, invoice_date, source_ref, created_at
            FROM invoices
            WHERE user_id = ?1
            ORDER BY invoice_date ASC, rowid ASC
            "#,
        )?;
        let rows = stmt.query_map([user_id], row_to_stored_invoice)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn clear_user(&self, user_id: UserId) -> Result<usize, StoreError> {
        let conn = self.connect()?;
        let removed = conn.execute("DELETE FROM invoices WHERE user_id = ?1", [user_id])?;
        Ok(removed)
    }

    fn health(&self) -> StoreHealth {
        let conn = match self.connect() {
            Ok(conn) => conn,
            Err(e) => return StoreHealth::failing(e.to_string()),
        };
        match table_exists(&conn, "invoices") {
            Ok(true) => {}
            Ok(false) => return StoreHealth::failing("missing table invoices; run migrations"),
            Err(e) => return StoreHealth::failing(e),
        }
        match conn.query_row("SELECT COUNT(*) FROM invoices", [], |row| row.get::<_, i64>(0)) {
            Ok(rows) => StoreHealth::healthy(format!(
                "{}: {rows} invoices",
                self.db_path.to_string_lossy()
            )),
            Err(e) => StoreHealth::failing(format!("count invoices failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_db_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("invoice_ingest_test_{}_{}.db", name, Uuid::new_v4()));
        p
    }

    fn sample_invoice(user_id: UserId, date: &str, cents: i64, platform: Platform) -> Invoice {
        Invoice {
            user_id,
            platform,
            amount_cents: cents,
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("valid date"),
            source_ref: "da39a3ee5e6b4b0d3255bfef95601890afd80709".to_string(),
        }
    }

    #[test]
    fn migrations_are_applied_once() {
        let db_path = temp_db_path("migrate");
        let first = apply_embedded_migrations(&db_path).expect("first migrate");
        assert_eq!(first, vec!["0001_invoices.sql".to_string()]);
        let second = apply_embedded_migrations(&db_path).expect("second migrate");
        assert!(second.is_empty());

        let conn = Connection::open(&db_path).expect("open db");
        assert_eq!(table_exists(&conn, "invoices"), Ok(true));
        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn append_list_and_clear_round_trip() {
        let db_path = temp_db_path("crud");
        let store = SqliteInvoiceStore::open(&db_path).expect("open store");

        store
            .append(&sample_invoice(7, "2026-10-12", 42_050, Platform::Zomato))
            .expect("append");
        store
            .append(&sample_invoice(7, "2026-09-30", 15_000, Platform::Amazon))
            .expect("append");
        store
            .append(&sample_invoice(8, "2026-10-01", 9_900, Platform::Zepto))
            .expect("append");

        let rows = store.list_by_user(7).expect("list");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].invoice.platform, Platform::Amazon);
        assert_eq!(rows[1].invoice.amount_cents, 42_050);
        assert_eq!(rows[1].invoice.date.to_string(), "2026-10-12");

        assert_eq!(store.clear_user(7).expect("clear"), 2);
        assert_eq!(store.clear_user(7).expect("clear again"), 0);
        assert!(store.list_by_user(7).expect("list").is_empty());
        assert_eq!(store.list_by_user(8).expect("list").len(), 1);
        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn health_reports_missing_schema() {
        let db_path = temp_db_path("health");
        let store = SqliteInvoiceStore::open(&db_path).expect("open store");
        assert!(store.health().ok);

        let conn = Connection::open(&db_path).expect("open db");
        conn.execute_batch("DROP TABLE invoices;").expect("drop table");
        let health = store.health();
        assert!(!health.ok);
        assert!(health.detail.contains("invoices"));

        let err = store
            .append(&sample_invoice(1, "2026-10-01", 5_000, Platform::Swiggy))
            .expect_err("append without table");
        assert!(matches!(err, StoreError::Query(_)));
        let _ = std::fs::remove_file(&db_path);
    }
}
