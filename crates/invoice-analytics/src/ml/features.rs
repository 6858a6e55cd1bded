//! 인보이스 데이터를 위한 feature engineering.
//!
//! 원시 인보이스 레코드를 세 가지 형태의 수치 feature로 변환합니다:
//! - 시계열: 날짜순으로 정렬된 인보이스별 `InvoiceFeatures`
//! - 고객 집계: 고객 이름별 `CustomerAggregate`
//! - 이상 탐지: 인보이스별 4차원 `AnomalyFeatures`
//!
//! 정규화 상수는 데이터셋에서 다시 추정하지 않는 고정값입니다.
//! 소규모 사업장의 일반적인 인보이스 규모를 가정하므로 큰 인보이스는
//! 1보다 큰 feature를 만들 수 있으며, 모델은 이를 허용해야 합니다.

use chrono::{DateTime, Datelike, Utc};
use invoice_core::{DecimalExt, InvoiceRecord};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// 시퀀스 원소 하나의 feature 수.
pub const SEQUENCE_FEATURES: usize = 7;

/// 이상 탐지 입력 feature 수.
pub const ANOMALY_FEATURES: usize = 4;

/// 고객 집계 입력 feature 수.
pub const CUSTOMER_FEATURES: usize = 4;

/// 정규화된 시퀀스 벡터에서 품목 수 위치.
pub const ITEM_COUNT_INDEX: usize = 4;
/// 정규화된 시퀀스 벡터에서 평균 단가 위치.
pub const AVG_ITEM_PRICE_INDEX: usize = 5;
/// 정규화된 시퀀스 벡터에서 총액 위치.
pub const TOTAL_INDEX: usize = 6;

/// 정규화된 시퀀스 원소.
pub type SequencePoint = [f32; SEQUENCE_FEATURES];

/// 고정 정규화 제수.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScales {
    /// 요일 (0 = 일요일)
    pub day_of_week: f64,
    /// 일 (1-31)
    pub day_of_month: f64,
    /// 월 (0-11)
    pub month: f64,
    /// 분기 (0-3)
    pub quarter: f64,
    /// 인보이스당 품목 수
    pub item_count: f64,
    /// 품목당 평균 금액
    pub avg_item_price: f64,
    /// 인보이스 총액
    pub total: f64,
    /// 최고 단가 (이상 탐지)
    pub max_item_price: f64,
    /// 고객 누적 매출
    pub customer_total_spent: f64,
    /// 고객 인보이스 수
    pub customer_invoice_count: f64,
    /// 고객 평균 인보이스 금액
    pub customer_avg_invoice: f64,
    /// 마지막 구매 후 경과 일수
    pub days_since_purchase: f64,
}

impl Default for FeatureScales {
    fn default() -> Self {
        Self {
            day_of_week: 6.0,
            day_of_month: 31.0,
            month: 11.0,
            quarter: 3.0,
            item_count: 10.0,
            avg_item_price: 1000.0,
            total: 10000.0,
            max_item_price: 1000.0,
            customer_total_spent: 10000.0,
            customer_invoice_count: 10.0,
            customer_avg_invoice: 1000.0,
            days_since_purchase: 365.0,
        }
    }
}

/// 인보이스 하나의 시계열 feature (정규화 전).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceFeatures {
    /// 요일 (0 = 일요일)
    pub day_of_week: u32,
    /// 일 (1-31)
    pub day_of_month: u32,
    /// 월 (0-11)
    pub month: u32,
    /// 분기 (0-3)
    pub quarter: u32,
    /// 총액
    pub total: f64,
    /// 품목 수
    pub item_count: usize,
    /// 품목당 평균 금액
    pub avg_item_price: f64,
    /// 정렬 후 위치
    pub sequence_index: usize,
    /// 인보이스 시각
    pub timestamp: DateTime<Utc>,
}

/// 고객별 누적 집계.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerAggregate {
    /// 고객 이름 (대소문자 구분)
    pub name: String,
    /// 누적 매출
    pub total_spent: f64,
    /// 인보이스 수 (항상 1 이상)
    pub invoice_count: usize,
    /// total_spent / invoice_count
    pub avg_invoice_value: f64,
    /// 구매한 고유 상품 수
    pub unique_item_count: usize,
    /// 가장 최근 구매 시각
    pub last_purchase: Option<DateTime<Utc>>,
    /// 추출 시점 기준 마지막 구매 후 경과 일수. 날짜가 없으면 0
    pub days_since_last_purchase: i64,
}

/// 이상 탐지용 정규화 feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFeatures {
    /// 총액 / 10000
    pub total: f32,
    /// 품목 수 / 10
    pub item_count: f32,
    /// 평균 단가 / 1000
    pub avg_item_price: f32,
    /// 최고 단가 / 1000
    pub max_item_price: f32,
}

impl AnomalyFeatures {
    /// 네트워크 입력 순서의 배열로 변환.
    pub fn to_array(&self) -> [f32; ANOMALY_FEATURES] {
        [
            self.total,
            self.item_count,
            self.avg_item_price,
            self.max_item_price,
        ]
    }
}

/// 인보이스 레코드를 ML feature로 변환하는 추출기.
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    scales: FeatureScales,
}

impl FeatureExtractor {
    /// 주어진 정규화 상수로 추출기 생성.
    pub fn new(scales: FeatureScales) -> Self {
        Self { scales }
    }

    /// 기본 정규화 상수로 추출기 생성.
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// 정규화 상수 반환.
    pub fn scales(&self) -> &FeatureScales {
        &self.scales
    }

    /// 날짜순으로 정렬된 인보이스별 feature 추출.
    ///
    /// 날짜를 해석할 수 없는 레코드는 조용히 제외합니다. 입력이 비었거나
    /// 날짜가 있는 레코드가 하나도 없으면 `None`을 반환합니다.
    pub fn extract_time_series(&self, invoices: &[InvoiceRecord]) -> Option<Vec<InvoiceFeatures>> {
        let mut dated: Vec<(DateTime<Utc>, &InvoiceRecord)> = invoices
            .iter()
            .filter_map(|invoice| invoice.timestamp().map(|ts| (ts, invoice)))
            .collect();

        if dated.is_empty() {
            return None;
        }

        // 안정 정렬: 같은 시각의 레코드는 입력 순서 유지
        dated.sort_by_key(|(ts, _)| *ts);

        let features = dated
            .into_iter()
            .enumerate()
            .map(|(index, (timestamp, invoice))| {
                let month = timestamp.month0();
                InvoiceFeatures {
                    day_of_week: timestamp.weekday().num_days_from_sunday(),
                    day_of_month: timestamp.day(),
                    month,
                    quarter: month / 3,
                    total: invoice.total.to_f64_lossy(),
                    item_count: invoice.item_count(),
                    avg_item_price: invoice.avg_item_price(),
                    sequence_index: index,
                    timestamp,
                }
            })
            .collect();

        Some(features)
    }

    /// 시퀀스 원소로 쓰일 7차원 정규화 벡터.
    pub fn normalize(&self, features: &InvoiceFeatures) -> SequencePoint {
        let s = &self.scales;
        let [dow, dom, month, quarter] = self.calendar_features(&features.timestamp);
        [
            dow,
            dom,
            month,
            quarter,
            (features.item_count as f64 / s.item_count) as f32,
            (features.avg_item_price / s.avg_item_price) as f32,
            (features.total / s.total) as f32,
        ]
    }

    /// 정규화된 달력 feature [요일, 일, 월, 분기].
    pub fn calendar_features(&self, timestamp: &DateTime<Utc>) -> [f32; 4] {
        let s = &self.scales;
        let month = timestamp.month0();
        [
            (timestamp.weekday().num_days_from_sunday() as f64 / s.day_of_week) as f32,
            (timestamp.day() as f64 / s.day_of_month) as f32,
            (month as f64 / s.month) as f32,
            ((month / 3) as f64 / s.quarter) as f32,
        ]
    }

    /// 예측 롤아웃을 위한 합성 시퀀스 원소.
    ///
    /// 달력 feature는 `timestamp`에서 새로 계산하고, 품목 수와 평균 단가는
    /// `carried`에서 그대로 가져오며, 총액은 예측값으로 대체합니다.
    pub fn project_point(
        &self,
        timestamp: &DateTime<Utc>,
        carried: &SequencePoint,
        predicted_total: f64,
    ) -> SequencePoint {
        let [dow, dom, month, quarter] = self.calendar_features(timestamp);
        [
            dow,
            dom,
            month,
            quarter,
            carried[ITEM_COUNT_INDEX],
            carried[AVG_ITEM_PRICE_INDEX],
            (predicted_total / self.scales.total) as f32,
        ]
    }

    /// 고객 이름별 집계 (입력 순서상 첫 등장 순).
    ///
    /// `now`는 `days_since_last_purchase` 계산 기준 시각입니다. 추출 시점에
    /// 의존하므로 세션을 넘겨 캐시하면 안 됩니다. 입력이 비었으면 `None`.
    pub fn aggregate_customers(
        &self,
        invoices: &[InvoiceRecord],
        now: DateTime<Utc>,
    ) -> Option<Vec<CustomerAggregate>> {
        if invoices.is_empty() {
            return None;
        }

        struct Accumulator<'a> {
            name: &'a str,
            total_spent: f64,
            invoice_count: usize,
            products: HashSet<&'a str>,
            last_purchase: Option<DateTime<Utc>>,
        }

        let mut order: Vec<Accumulator<'_>> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for invoice in invoices {
            let name = invoice.customer_key();
            let slot = *index.entry(name).or_insert_with(|| {
                order.push(Accumulator {
                    name,
                    total_spent: 0.0,
                    invoice_count: 0,
                    products: HashSet::new(),
                    last_purchase: None,
                });
                order.len() - 1
            });

            let acc = &mut order[slot];
            acc.total_spent += invoice.total.to_f64_lossy();
            acc.invoice_count += 1;
            acc.products
                .extend(invoice.items.iter().map(|item| item.product_key()));
            if let Some(ts) = invoice.timestamp() {
                acc.last_purchase = Some(acc.last_purchase.map_or(ts, |prev| prev.max(ts)));
            }
        }

        let customers = order
            .into_iter()
            .map(|acc| CustomerAggregate {
                name: acc.name.to_string(),
                total_spent: acc.total_spent,
                invoice_count: acc.invoice_count,
                avg_invoice_value: acc.total_spent / acc.invoice_count as f64,
                unique_item_count: acc.products.len(),
                last_purchase: acc.last_purchase,
                days_since_last_purchase: acc
                    .last_purchase
                    .map_or(0, |ts| (now - ts).num_days()),
            })
            .collect();

        Some(customers)
    }

    /// 고객 집계의 4차원 정규화 벡터
    /// [누적 매출, 인보이스 수, 평균 인보이스 금액, 경과 일수].
    pub fn customer_vector(&self, customer: &CustomerAggregate) -> [f32; CUSTOMER_FEATURES] {
        let s = &self.scales;
        [
            (customer.total_spent / s.customer_total_spent) as f32,
            (customer.invoice_count as f64 / s.customer_invoice_count) as f32,
            (customer.avg_invoice_value / s.customer_avg_invoice) as f32,
            (customer.days_since_last_purchase as f64 / s.days_since_purchase) as f32,
        ]
    }

    /// 인보이스별 이상 탐지 feature (입력 순서 유지, 날짜 불필요).
    pub fn extract_anomaly_features(&self, invoices: &[InvoiceRecord]) -> Vec<AnomalyFeatures> {
        let s = &self.scales;
        invoices
            .iter()
            .map(|invoice| AnomalyFeatures {
                total: (invoice.total.to_f64_lossy() / s.total) as f32,
                item_count: (invoice.item_count() as f64 / s.item_count) as f32,
                avg_item_price: (invoice.avg_item_price() / s.avg_item_price) as f32,
                max_item_price: (invoice.max_item_price() / s.max_item_price) as f32,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use invoice_core::LineItem;
    use rust_decimal_macros::dec;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_time_series_sorted_and_filtered() {
        let invoices = vec![
            InvoiceRecord::new("A", dec!(300)).with_created_at(at(3)),
            InvoiceRecord::new("B", dec!(100)),
            InvoiceRecord::new("C", dec!(200)).with_date("2024-05-01"),
        ];

        let features = FeatureExtractor::with_defaults()
            .extract_time_series(&invoices)
            .unwrap();

        assert_eq!(features.len(), 2);
        assert_eq!(features[0].total, 200.0);
        assert_eq!(features[1].total, 300.0);
        assert_eq!(features[1].sequence_index, 1);
    }

    #[test]
    fn test_time_series_absent() {
        let extractor = FeatureExtractor::with_defaults();
        assert!(extractor.extract_time_series(&[]).is_none());
        assert!(extractor
            .extract_time_series(&[InvoiceRecord::new("A", dec!(1))])
            .is_none());
    }

    #[test]
    fn test_calendar_fields() {
        // 2024-05-05 은 일요일
        let invoices = vec![InvoiceRecord::new("A", dec!(500))
            .with_created_at(at(5))
            .with_item(LineItem::new("x", dec!(1), dec!(200)))
            .with_item(LineItem::new("y", dec!(1), dec!(300)))];

        let extractor = FeatureExtractor::with_defaults();
        let features = extractor.extract_time_series(&invoices).unwrap();
        let f = &features[0];
        assert_eq!(f.day_of_week, 0);
        assert_eq!(f.day_of_month, 5);
        assert_eq!(f.month, 4);
        assert_eq!(f.quarter, 1);
        assert_eq!(f.item_count, 2);
        assert_eq!(f.avg_item_price, 250.0);

        let v = extractor.normalize(f);
        assert_eq!(v[0], 0.0);
        assert!((v[1] - 5.0 / 31.0).abs() < 1e-6);
        assert!((v[2] - 4.0 / 11.0).abs() < 1e-6);
        assert!((v[3] - 1.0 / 3.0).abs() < 1e-6);
        assert!((v[ITEM_COUNT_INDEX] - 0.2).abs() < 1e-6);
        assert!((v[AVG_ITEM_PRICE_INDEX] - 0.25).abs() < 1e-6);
        assert!((v[TOTAL_INDEX] - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_outlier_exceeds_unit_range() {
        let invoices = vec![InvoiceRecord::new("Big", dec!(25000)).with_created_at(at(1))];
        let extractor = FeatureExtractor::with_defaults();
        let features = extractor.extract_time_series(&invoices).unwrap();
        assert!(extractor.normalize(&features[0])[TOTAL_INDEX] > 1.0);
    }

    #[test]
    fn test_project_point_carries_item_features() {
        let extractor = FeatureExtractor::with_defaults();
        let carried = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        let next = extractor.project_point(&at(6), &carried, 1500.0);

        assert_eq!(next[ITEM_COUNT_INDEX], 0.5);
        assert_eq!(next[AVG_ITEM_PRICE_INDEX], 0.6);
        assert!((next[TOTAL_INDEX] - 0.15).abs() < 1e-6);
        assert!((next[0] - 1.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_customer_aggregation() {
        let now = at(31);
        let mut unnamed = InvoiceRecord::new("", dec!(50)).with_created_at(at(2));
        unnamed.customer_name = None;

        let invoices = vec![
            InvoiceRecord::new("Acme", dec!(100))
                .with_created_at(at(10))
                .with_item(LineItem::new("bolt", dec!(1), dec!(100))),
            InvoiceRecord::new("acme", dec!(40)).with_created_at(at(1)),
            InvoiceRecord::new("Acme", dec!(300))
                .with_created_at(at(21))
                .with_item(LineItem::new("bolt", dec!(1), dec!(100)))
                .with_item(LineItem::new("nut", dec!(2), dec!(100))),
            unnamed,
        ];

        let customers = FeatureExtractor::with_defaults()
            .aggregate_customers(&invoices, now)
            .unwrap();

        assert_eq!(customers.len(), 3);
        let acme = &customers[0];
        assert_eq!(acme.name, "Acme");
        assert_eq!(acme.invoice_count, 2);
        assert_eq!(acme.total_spent, 400.0);
        assert_eq!(acme.avg_invoice_value, 200.0);
        assert_eq!(acme.unique_item_count, 2);
        assert_eq!(acme.last_purchase, Some(at(21)));
        assert_eq!(acme.days_since_last_purchase, 10);

        assert_eq!(customers[1].name, "acme");
        assert_eq!(customers[2].name, "Unknown");
    }

    #[test]
    fn test_customer_without_dates() {
        let invoices = vec![InvoiceRecord::new("A", dec!(10))];
        let now = at(1) + Duration::days(3);
        let customers = FeatureExtractor::with_defaults()
            .aggregate_customers(&invoices, now)
            .unwrap();
        assert_eq!(customers[0].days_since_last_purchase, 0);
        assert!(customers[0].last_purchase.is_none());
    }

    #[test]
    fn test_customer_vector() {
        let extractor = FeatureExtractor::with_defaults();
        let customer = CustomerAggregate {
            name: "A".to_string(),
            total_spent: 5000.0,
            invoice_count: 5,
            avg_invoice_value: 1000.0,
            unique_item_count: 3,
            last_purchase: None,
            days_since_last_purchase: 73,
        };
        let v = extractor.customer_vector(&customer);
        assert_eq!(v, [0.5, 0.5, 1.0, 0.2]);
    }

    #[test]
    fn test_anomaly_features() {
        let invoices = vec![
            InvoiceRecord::new("A", dec!(2000))
                .with_item(LineItem::new("x", dec!(1), dec!(500)))
                .with_item(LineItem::new("y", dec!(3), dec!(1500))),
            InvoiceRecord::new("B", dec!(0)),
        ];
        let features = FeatureExtractor::with_defaults().extract_anomaly_features(&invoices);

        assert_eq!(features.len(), 2);
        assert_eq!(features[0].to_array(), [0.2, 0.2, 1.0, 1.5]);
        assert_eq!(features[1].to_array(), [0.0, 0.0, 0.0, 0.0]);
    }
}
