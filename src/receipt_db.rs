use crate::error::{StoreError, StoreResult};
use crate::receipt::{ReceiptItem, ReceiptRecord, format_date, parse_date};
use crate::stats::Spend;
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use serde::Serialize;
use std::path::Path;
use tracing::info;

pub struct ReceiptStore {
    conn: Connection,
}

/// A receipt as it sits in the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReceipt {
    pub id: i64,
    pub source_file: Option<String>,
    pub created_at: String,
    #[serde(flatten)]
    pub record: ReceiptRecord,
}

impl Spend for StoredReceipt {
    fn vendor(&self) -> &str {
        &self.record.vendor
    }

    fn amount(&self) -> Option<f64> {
        Some(self.record.amount)
    }
}

/// Column projection read by `row_to_receipt`.
const RECEIPT_COLUMNS: &str = "id, vendor, date, amount, category, bill_number, order_id,
    payment_method, payment_status, tax, discount, service_charge, tip, currency,
    customer_name, customer_email, customer_phone, remarks, location,
    billing_address, shipping_address, source_file, created_at";

impl ReceiptStore {
    /// Open (or create) the receipt database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> StoreResult<Self> {
        Self::init(Connection::open(db_path)?)
    }

    #[cfg(test)]
    pub fn in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS receipts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                vendor TEXT NOT NULL,
                date TEXT NOT NULL,
                amount REAL NOT NULL,
                category TEXT NOT NULL DEFAULT 'Unknown',
                bill_number TEXT,
                order_id TEXT,
                payment_method TEXT,
                payment_status TEXT NOT NULL DEFAULT 'Paid',
                tax REAL,
                discount REAL,
                service_charge REAL,
                tip REAL,
                currency TEXT NOT NULL DEFAULT 'INR',
                customer_name TEXT,
                customer_email TEXT,
                customer_phone TEXT,
                remarks TEXT,
                location TEXT,
                billing_address TEXT,
                shipping_address TEXT,
                source_file TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS receipt_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                receipt_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                quantity REAL NOT NULL DEFAULT 1,
                unit TEXT,
                price REAL NOT NULL DEFAULT 0,
                total REAL,
                FOREIGN KEY (receipt_id) REFERENCES receipts(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_receipts_date ON receipts(date)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_receipt_items_receipt_id ON receipt_items(receipt_id)",
            [],
        )?;

        info!("Database initialized successfully");
        Ok(Self { conn })
    }

    /// Store a receipt and its items in one transaction, returning the new id.
    pub fn insert_receipt(
        &mut self,
        record: &ReceiptRecord,
        source_file: Option<&str>,
    ) -> StoreResult<i64> {
        if record.is_parse_error() {
            return Err(StoreError::PlaceholderRecord);
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO receipts
                (vendor, date, amount, category, bill_number, order_id,
                 payment_method, payment_status, tax, discount, service_charge, tip,
                 currency, customer_name, customer_email, customer_phone, remarks,
                 location, billing_address, shipping_address, source_file)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                     ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
            params![
                record.vendor,
                format_date(record.date),
                record.amount,
                record.category,
                record.bill_number,
                record.order_id,
                record.payment_method,
                record.payment_status,
                record.tax,
                record.discount,
                record.service_charge,
                record.tip,
                record.currency,
                record.customer_name,
                record.customer_email,
                record.customer_phone,
                record.remarks,
                record.location,
                record.billing_address,
                record.shipping_address,
                source_file,
            ],
        )?;
        let id = tx.last_insert_rowid();

        for item in record.items() {
            tx.execute(
                "INSERT INTO receipt_items (receipt_id, name, quantity, unit, price, total)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, item.name, item.quantity, item.unit, item.price, item.total],
            )?;
        }
        tx.commit()?;

        info!(
            receipt_id = id,
            vendor = %record.vendor,
            items = record.items().len(),
            "Receipt stored"
        );
        Ok(id)
    }

    /// Get one receipt, with its items, by primary key.
    pub fn get_receipt(&self, id: i64) -> StoreResult<Option<StoredReceipt>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {RECEIPT_COLUMNS} FROM receipts WHERE id = ?1"))?;
        let mut rows = stmt.query(params![id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let mut receipt = Self::row_to_receipt(row)?;

        let items = self.items_for(id)?;
        if !items.is_empty() {
            receipt.record.items = Some(items);
        }
        Ok(Some(receipt))
    }

    /// All receipts, newest receipt date first. Items are not loaded.
    pub fn list_receipts(&self) -> StoreResult<Vec<StoredReceipt>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts ORDER BY date DESC, id DESC"
        ))?;
        let receipts = stmt.query_map([], |row| Self::row_to_receipt(row))?;
        Ok(receipts.collect::<rusqlite::Result<_>>()?)
    }

    /// Line items of a receipt in the order they were stored.
    pub fn items_for(&self, receipt_id: i64) -> StoreResult<Vec<ReceiptItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, quantity, unit, price, total
             FROM receipt_items
             WHERE receipt_id = ?1
             ORDER BY id",
        )?;
        let items = stmt.query_map(params![receipt_id], |row| {
            Ok(ReceiptItem {
                name: row.get(0)?,
                quantity: row.get(1)?,
                unit: row.get(2)?,
                price: row.get(3)?,
                total: row.get(4)?,
            })
        })?;
        Ok(items.collect::<rusqlite::Result<_>>()?)
    }

    pub fn count(&self) -> StoreResult<usize> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM receipts", [], |row| row.get(0))?)
    }

    /// Helper: map a row with the `RECEIPT_COLUMNS` projection to `StoredReceipt`.
    fn row_to_receipt(row: &Row<'_>) -> rusqlite::Result<StoredReceipt> {
        let raw_date: String = row.get(2)?;
        let date = parse_date(&raw_date)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

        Ok(StoredReceipt {
            id: row.get(0)?,
            record: ReceiptRecord {
                vendor: row.get(1)?,
                date,
                amount: row.get(3)?,
                category: row.get(4)?,
                bill_number: row.get(5)?,
                order_id: row.get(6)?,
                payment_method: row.get(7)?,
                payment_status: row.get(8)?,
                tax: row.get(9)?,
                discount: row.get(10)?,
                service_charge: row.get(11)?,
                tip: row.get(12)?,
                currency: row.get(13)?,
                customer_name: row.get(14)?,
                customer_email: row.get(15)?,
                customer_phone: row.get(16)?,
                remarks: row.get(17)?,
                location: row.get(18)?,
                billing_address: row.get(19)?,
                shipping_address: row.get(20)?,
                items: None,
                error: None,
            },
            source_file: row.get(21)?,
            created_at: row.get(22)?,
        })
    }
}
