//! 인보이스 파일 점검 명령어.
//!
//! 학습 없이 각 모델의 데이터 요건을 충족하는지 확인합니다.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use invoice_analytics::ml::{DetectorConfig, SEQUENCE_WINDOW};
use invoice_core::{AnalyticsConfig, InvoiceRecord};

use crate::commands::load_invoices;

/// 인보이스 스냅샷 통계.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceStats {
    pub total: usize,
    pub dated: usize,
    pub undated: usize,
    pub invalid: usize,
    pub customers: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

impl InvoiceStats {
    pub fn from_invoices(invoices: &[InvoiceRecord]) -> Self {
        let timestamps: Vec<_> = invoices.iter().filter_map(|i| i.timestamp()).collect();
        let customers: HashSet<&str> = invoices.iter().map(|i| i.customer_key()).collect();

        Self {
            total: invoices.len(),
            dated: timestamps.len(),
            undated: invoices.len() - timestamps.len(),
            invalid: invoices.iter().filter(|i| i.validate().is_err()).count(),
            customers: customers.len(),
            first: timestamps.iter().min().copied(),
            last: timestamps.iter().max().copied(),
        }
    }

    /// 모델별 준비 상태 (이름, 충족 여부, 요건 설명).
    pub fn readiness(&self, config: &AnalyticsConfig) -> Vec<(&'static str, bool, String)> {
        let min_anomaly = DetectorConfig::default().min_invoices;
        vec![
            (
                "session",
                self.total >= config.min_session_invoices && self.invalid == 0,
                format!("{}+ valid invoices", config.min_session_invoices),
            ),
            (
                "revenue_forecast",
                self.dated > SEQUENCE_WINDOW,
                format!("{}+ dated invoices", SEQUENCE_WINDOW + 1),
            ),
            (
                "customer_segmentation",
                self.customers >= config.segment_count,
                format!("{}+ customers", config.segment_count),
            ),
            (
                "anomaly_detection",
                self.total >= min_anomaly,
                format!("{}+ invoices", min_anomaly),
            ),
        ]
    }
}

/// 인보이스 파일 점검
pub fn run_inspect(path: impl AsRef<Path>, config: &AnalyticsConfig) -> Result<InvoiceStats> {
    let invoices = load_invoices(path)?;
    let stats = InvoiceStats::from_invoices(&invoices);

    println!("\n📋 인보이스 점검");
    println!("═══════════════════════════════════════════════════════════════");
    println!("  전체: {}건 (날짜 있음 {}, 없음 {})", stats.total, stats.dated, stats.undated);
    println!("  고객: {}명", stats.customers);
    if stats.invalid > 0 {
        println!("  ⚠️  유효하지 않은 인보이스: {}건", stats.invalid);
    }
    if let (Some(first), Some(last)) = (stats.first, stats.last) {
        println!("  기간: {} ~ {}", first.format("%Y-%m-%d"), last.format("%Y-%m-%d"));
    }
    println!();
    for (name, ready, requirement) in stats.readiness(config) {
        let mark = if ready { "✅" } else { "❌" };
        println!("  {} {:<22} {}", mark, name, requirement);
    }
    println!("═══════════════════════════════════════════════════════════════");

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> Vec<InvoiceRecord> {
        let mut invoices: Vec<InvoiceRecord> = (1..=9)
            .map(|day| {
                InvoiceRecord::new(format!("C{}", day % 3), dec!(100))
                    .with_date(format!("2024-01-{:02}", day))
            })
            .collect();
        invoices.push(InvoiceRecord::new("C0", dec!(50)));
        invoices.push(InvoiceRecord::new("C1", dec!(-5)).with_date("2024-01-20"));
        invoices
    }

    #[test]
    fn test_stats_counts() {
        let stats = InvoiceStats::from_invoices(&sample());
        assert_eq!(stats.total, 11);
        assert_eq!(stats.dated, 10);
        assert_eq!(stats.undated, 1);
        assert_eq!(stats.invalid, 1);
        assert_eq!(stats.customers, 3);
        assert_eq!(stats.first.unwrap().format("%Y-%m-%d").to_string(), "2024-01-01");
        assert_eq!(stats.last.unwrap().format("%Y-%m-%d").to_string(), "2024-01-20");
    }

    #[test]
    fn test_readiness_blocks_session_on_invalid_invoice() {
        let stats = InvoiceStats::from_invoices(&sample());
        let readiness = stats.readiness(&AnalyticsConfig::default());
        let ready: Vec<_> = readiness.iter().map(|(name, ok, _)| (*name, *ok)).collect();
        assert_eq!(
            ready,
            vec![
                ("session", false),
                ("revenue_forecast", true),
                ("customer_segmentation", true),
                ("anomaly_detection", true),
            ]
        );
    }

    #[test]
    fn test_anomaly_readiness_follows_detector_minimum() {
        let min = DetectorConfig::default().min_invoices;
        let invoices: Vec<InvoiceRecord> = (0..min)
            .map(|i| InvoiceRecord::new(format!("C{}", i), dec!(100)))
            .collect();

        let anomaly = |stats: &InvoiceStats| {
            stats
                .readiness(&AnalyticsConfig::default())
                .into_iter()
                .find(|(name, _, _)| *name == "anomaly_detection")
                .unwrap()
        };

        let (_, ready, requirement) = anomaly(&InvoiceStats::from_invoices(&invoices));
        assert!(ready);
        assert_eq!(requirement, format!("{}+ invoices", min));

        let (_, ready, _) = anomaly(&InvoiceStats::from_invoices(&invoices[..min - 1]));
        assert!(!ready);
    }

    #[test]
    fn test_empty_snapshot() {
        let stats = InvoiceStats::from_invoices(&[]);
        assert_eq!(stats.total, 0);
        assert!(stats.first.is_none());
        assert!(stats
            .readiness(&AnalyticsConfig::default())
            .iter()
            .all(|(_, ok, _)| !ok));
    }
}
