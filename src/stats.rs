// src/stats.rs

use crate::receipt::{ReceiptRecord, format_date};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use time::Date;

/// What the aggregator needs to know about a receipt.
pub trait Spend {
    fn vendor(&self) -> &str;
    /// `None` (or a non-finite value) keeps the receipt out of the numeric stats.
    fn amount(&self) -> Option<f64>;
}

impl Spend for ReceiptRecord {
    fn vendor(&self) -> &str {
        &self.vendor
    }

    fn amount(&self) -> Option<f64> {
        Some(self.amount)
    }
}

/// Most frequent amount, or "N/A" when there is no single winner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    Value(f64),
    NotApplicable,
}

impl Serialize for Mode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Mode::Value(v) => serializer.serialize_f64(*v),
            Mode::NotApplicable => serializer.serialize_str("N/A"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateStats {
    pub total: f64,
    pub mean: f64,
    pub median: f64,
    pub mode: Mode,
    pub vendor_frequency: BTreeMap<String, usize>,
}

/// Summary statistics over `receipts`, every number rounded to cents.
pub fn compute_stats<T: Spend>(receipts: &[T]) -> AggregateStats {
    let mut amounts: Vec<f64> = receipts
        .iter()
        .filter_map(Spend::amount)
        .filter(|a| a.is_finite())
        .collect();

    let mut vendor_frequency = BTreeMap::new();
    for receipt in receipts {
        *vendor_frequency
            .entry(receipt.vendor().to_string())
            .or_insert(0) += 1;
    }

    let total: f64 = amounts.iter().sum();
    let mean = if amounts.is_empty() {
        0.0
    } else {
        total / amounts.len() as f64
    };
    let mode = mode(&amounts);
    amounts.sort_by(f64::total_cmp);

    AggregateStats {
        total: round2(total),
        mean: round2(mean),
        median: round2(median(&amounts)),
        mode: match mode {
            Mode::Value(v) => Mode::Value(round2(v)),
            Mode::NotApplicable => Mode::NotApplicable,
        },
        vendor_frequency,
    }
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

fn mode(amounts: &[f64]) -> Mode {
    let mut counts: HashMap<u64, (f64, usize)> = HashMap::new();
    for &a in amounts {
        // -0.0 and 0.0 are the same amount
        let a = if a == 0.0 { 0.0 } else { a };
        counts.entry(a.to_bits()).or_insert((a, 0)).1 += 1;
    }

    let Some(best) = counts.values().map(|&(_, n)| n).max() else {
        return Mode::NotApplicable;
    };
    let mut winners = counts.values().filter(|&&(_, n)| n == best);
    match (winners.next(), winners.next()) {
        (Some(&(value, _)), None) => Mode::Value(value),
        _ => Mode::NotApplicable,
    }
}

/// Cents, with exact halves going to the even neighbour.
fn round2(v: f64) -> f64 {
    (v * 100.0).round_ties_even() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

/// Data behind the detail view's two charts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    /// Amount spent per vendor (pie).
    pub vendor_spend: Vec<ChartPoint>,
    /// Amount spent per day, oldest first (bar).
    pub amount_by_date: Vec<ChartPoint>,
}

pub fn chart_series<'a>(receipts: impl IntoIterator<Item = &'a ReceiptRecord>) -> ChartSeries {
    let mut by_vendor: BTreeMap<&str, f64> = BTreeMap::new();
    let mut by_date: BTreeMap<Date, f64> = BTreeMap::new();
    for r in receipts.into_iter().filter(|r| r.amount.is_finite()) {
        *by_vendor.entry(r.vendor.as_str()).or_default() += r.amount;
        *by_date.entry(r.date).or_default() += r.amount;
    }

    ChartSeries {
        vendor_spend: by_vendor
            .into_iter()
            .map(|(vendor, sum)| ChartPoint {
                label: vendor.to_string(),
                value: round2(sum),
            })
            .collect(),
        amount_by_date: by_date
            .into_iter()
            .map(|(date, sum)| ChartPoint {
                label: format_date(date),
                value: round2(sum),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use time::macros::date;

    struct Row(&'static str, Option<f64>);

    impl Spend for Row {
        fn vendor(&self) -> &str {
            self.0
        }

        fn amount(&self) -> Option<f64> {
            self.1
        }
    }

    fn rows(amounts: &[f64]) -> Vec<Row> {
        let vendors = ["Cafe", "Mart", "Cafe", "Fuel"];
        amounts
            .iter()
            .enumerate()
            .map(|(i, &a)| Row(vendors[i % vendors.len()], Some(a)))
            .collect()
    }

    #[test]
    fn test_reference_amounts() {
        let stats = compute_stats(&rows(&[10.0, 20.0, 20.0, 30.0]));
        assert_eq!(stats.total, 80.0);
        assert_eq!(stats.mean, 20.0);
        assert_eq!(stats.median, 20.0);
        assert_eq!(stats.mode, Mode::Value(20.0));
        assert_eq!(
            stats.vendor_frequency,
            BTreeMap::from([
                ("Cafe".to_string(), 2),
                ("Fuel".to_string(), 1),
                ("Mart".to_string(), 1)
            ])
        );
    }

    #[test]
    fn test_empty_input() {
        let stats = compute_stats::<Row>(&[]);
        assert_eq!(stats.total, 0.0);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.median, 0.0);
        assert_eq!(stats.mode, Mode::NotApplicable);
        assert!(stats.vendor_frequency.is_empty());

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["mode"], "N/A");
        assert_eq!(json["vendor_frequency"], serde_json::json!({}));
    }

    #[test]
    fn test_tied_mode_is_not_applicable() {
        assert_eq!(compute_stats(&rows(&[10.0, 20.0])).mode, Mode::NotApplicable);
        assert_eq!(
            compute_stats(&rows(&[5.0, 5.0, 7.0, 7.0, 9.0])).mode,
            Mode::NotApplicable
        );
    }

    #[test]
    fn test_single_receipt() {
        let stats = compute_stats(&rows(&[42.5]));
        assert_eq!(stats.median, 42.5);
        assert_eq!(stats.mode, Mode::Value(42.5));
        assert_eq!(serde_json::to_value(&stats).unwrap()["mode"], 42.5);
    }

    #[test]
    fn test_odd_median_and_rounding() {
        let stats = compute_stats(&rows(&[3.333, 1.111, 2.222]));
        assert_eq!(stats.total, 6.67);
        assert_eq!(stats.mean, 2.22);
        assert_eq!(stats.median, 2.22);
        assert_eq!(stats.mode, Mode::NotApplicable);
    }

    #[test]
    fn test_half_cents_round_to_even() {
        let stats = compute_stats(&rows(&[0.125]));
        assert_eq!(stats.total, 0.12);
        assert_eq!(stats.mean, 0.12);
        assert_eq!(stats.mode, Mode::Value(0.12));

        assert_eq!(compute_stats(&rows(&[0.375])).total, 0.38);
        assert_eq!(compute_stats(&rows(&[0.25, 0.125])).total, 0.38);
    }

    #[test]
    fn test_even_median_averages_middle_values() {
        assert_eq!(compute_stats(&rows(&[40.0, 10.0, 30.0, 20.0])).median, 25.0);
    }

    #[test]
    fn test_missing_amounts_are_excluded_but_vendors_counted() {
        let input = vec![
            Row("Cafe", Some(10.0)),
            Row("Cafe", None),
            Row("Mart", Some(f64::NAN)),
            Row("Mart", Some(30.0)),
        ];
        let stats = compute_stats(&input);
        assert_eq!(stats.total, 40.0);
        assert_eq!(stats.mean, 20.0);
        assert_eq!(stats.median, 20.0);
        assert_eq!(stats.vendor_frequency["Cafe"], 2);
        assert_eq!(stats.vendor_frequency["Mart"], 2);
    }

    #[test]
    fn test_stats_do_not_touch_input_order() {
        let input = rows(&[30.0, 10.0, 20.0]);
        compute_stats(&input);
        let amounts: Vec<_> = input.iter().map(|r| r.1.unwrap()).collect();
        assert_eq!(amounts, vec![30.0, 10.0, 20.0]);
    }

    #[test]
    fn test_chart_series_groups_by_vendor_and_day() {
        let receipts = vec![
            ReceiptRecord::new("Mart", date!(2024 - 01 - 02), 10.0),
            ReceiptRecord::new("Cafe", date!(2024 - 01 - 01), 2.5),
            ReceiptRecord::new("Mart", date!(2024 - 01 - 01), 7.25),
        ];
        let charts = chart_series(&receipts);

        assert_eq!(
            charts.vendor_spend,
            vec![
                ChartPoint { label: "Cafe".into(), value: 2.5 },
                ChartPoint { label: "Mart".into(), value: 17.25 },
            ]
        );
        assert_eq!(
            charts.amount_by_date,
            vec![
                ChartPoint { label: "2024-01-01".into(), value: 9.75 },
                ChartPoint { label: "2024-01-02".into(), value: 10.0 },
            ]
        );
    }
}
