// src/receipt.rs

use serde::{Deserialize, Deserializer, Serialize};
use time::Date;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

/// Vendor name carried by the placeholder record produced when extraction fails.
pub const PARSE_ERROR_VENDOR: &str = "ParseError";

pub const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// A single purchased line on a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptItem {
    pub name: String,
    #[serde(default = "default_quantity", deserialize_with = "quantity_or_default")]
    pub quantity: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default, deserialize_with = "price_or_default")]
    pub price: f64,
    #[serde(default)]
    pub total: Option<f64>,
}

/// All structured data the model is asked to read off a receipt.
///
/// Only `vendor`, `date` and `amount` are required. Defaulted fields also take
/// their default when the model sends an explicit `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub vendor: String,
    #[serde(with = "ymd")]
    pub date: Date,
    pub amount: f64,
    #[serde(default = "default_category", deserialize_with = "category_or_default")]
    pub category: String,
    #[serde(default)]
    pub bill_number: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(
        default = "default_payment_status",
        deserialize_with = "payment_status_or_default"
    )]
    pub payment_status: String,
    #[serde(default)]
    pub tax: Option<f64>,
    #[serde(default)]
    pub discount: Option<f64>,
    #[serde(default)]
    pub service_charge: Option<f64>,
    #[serde(default)]
    pub tip: Option<f64>,
    #[serde(default = "default_currency", deserialize_with = "currency_or_default")]
    pub currency: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub items: Option<Vec<ReceiptItem>>,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub billing_address: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<String>,
    /// Set only on the placeholder built by [`ReceiptRecord::parse_error`].
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReceiptRecord {
    /// A minimal record with every optional field at its default.
    pub fn new(vendor: impl Into<String>, date: Date, amount: f64) -> Self {
        Self {
            vendor: vendor.into(),
            date,
            amount,
            category: default_category(),
            bill_number: None,
            order_id: None,
            payment_method: None,
            payment_status: default_payment_status(),
            tax: None,
            discount: None,
            service_charge: None,
            tip: None,
            currency: default_currency(),
            customer_name: None,
            customer_email: None,
            customer_phone: None,
            items: None,
            remarks: None,
            location: None,
            billing_address: None,
            shipping_address: None,
            error: None,
        }
    }

    /// The placeholder handed out instead of a receipt when extraction fails.
    pub fn parse_error(message: impl Into<String>, today: Date) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(PARSE_ERROR_VENDOR, today, 0.0)
        }
    }

    pub fn is_parse_error(&self) -> bool {
        self.vendor == PARSE_ERROR_VENDOR && self.error.is_some()
    }

    pub fn items(&self) -> &[ReceiptItem] {
        self.items.as_deref().unwrap_or_default()
    }

    /// How many of the optional scalar fields the model filled in.
    pub fn coverage(&self) -> (usize, usize) {
        let filled = [
            self.bill_number.is_some(),
            self.order_id.is_some(),
            self.payment_method.is_some(),
            self.tax.is_some(),
            self.discount.is_some(),
            self.service_charge.is_some(),
            self.tip.is_some(),
            self.customer_name.is_some(),
            self.customer_email.is_some(),
            self.customer_phone.is_some(),
            self.remarks.is_some(),
            self.location.is_some(),
            self.billing_address.is_some(),
            self.shipping_address.is_some(),
        ];
        let total = filled.len();
        (filled.iter().filter(|&&v| v).count(), total)
    }
}

/// Parse `YYYY-MM-DD`, also accepting a date-time whose first ten characters
/// are the date (`2024-01-01T10:00:00`, `2024-01-01 10:00`).
pub fn parse_date(raw: &str) -> Result<Date, time::error::Parse> {
    let raw = raw.trim();
    let day = match raw.char_indices().nth(10) {
        Some((idx, 'T' | ' ')) => &raw[..idx],
        _ => raw,
    };
    Date::parse(day, DATE_FORMAT)
}

pub fn format_date(date: Date) -> String {
    date.format(DATE_FORMAT).unwrap_or_else(|_| date.to_string())
}

mod ymd {
    use super::{format_date, parse_date};
    use serde::{Deserialize, Deserializer, Serializer, de};
    use time::Date;

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_date(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_date(&raw).map_err(|e| de::Error::custom(format!("invalid date {raw:?}: {e}")))
    }
}

fn default_category() -> String {
    "Unknown".to_string()
}

fn default_payment_status() -> String {
    "Paid".to_string()
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_quantity() -> f64 {
    1.0
}

fn default_price() -> f64 {
    0.0
}

macro_rules! null_means_default {
    ($name:ident, $ty:ty, $default:ident) => {
        fn $name<'de, D: Deserializer<'de>>(deserializer: D) -> Result<$ty, D::Error> {
            Ok(Option::<$ty>::deserialize(deserializer)?.unwrap_or_else($default))
        }
    };
}

null_means_default!(category_or_default, String, default_category);
null_means_default!(payment_status_or_default, String, default_payment_status);
null_means_default!(currency_or_default, String, default_currency);
null_means_default!(quantity_or_default, f64, default_quantity);
null_means_default!(price_or_default, f64, default_price);
