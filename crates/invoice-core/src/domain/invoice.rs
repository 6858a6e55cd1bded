//! 인보이스 레코드 타입.
//!
//! 분석 서브시스템이 외부 데이터 소스로부터 받는 불변 입력입니다:
//! - `InvoiceRecord` - 고객, 총액, 품목, 생성 시각을 담은 인보이스
//! - `LineItem` - 인보이스 품목

use crate::error::{InvoiceError, InvoiceResult};
use crate::types::{Amount, DecimalExt, Quantity};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 고객 이름이 없는 인보이스를 묶는 버킷 이름.
pub const UNKNOWN_CUSTOMER: &str = "Unknown";

/// 인보이스 품목.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// 상품명
    #[serde(default)]
    pub product_name: Option<String>,
    /// 수량
    #[serde(default)]
    pub quantity: Quantity,
    /// 단가
    #[serde(default)]
    pub price: Amount,
}

impl LineItem {
    /// 새 품목을 생성합니다.
    pub fn new(product_name: impl Into<String>, quantity: Quantity, price: Amount) -> Self {
        Self {
            product_name: Some(product_name.into()),
            quantity,
            price,
        }
    }

    /// 상품명을 반환합니다. 없으면 `"Unknown"`.
    pub fn product_key(&self) -> &str {
        self.product_name.as_deref().unwrap_or(UNKNOWN_CUSTOMER)
    }
}

/// 인보이스 레코드.
///
/// 사용자 범위의 스냅샷으로 한 번 조회되며 분석 중에는 변경되지 않습니다.
/// 시각은 `createdAt`을 우선 사용하고, 없으면 `date` 문자열을 해석합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRecord {
    /// 인보이스 ID (표시용)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// 고객 이름
    #[serde(default)]
    pub customer_name: Option<String>,
    /// 총액
    #[serde(default)]
    pub total: Amount,
    /// 품목 목록 (순서 유지)
    #[serde(default)]
    pub items: Vec<LineItem>,
    /// 생성 시각
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// 명시적 날짜 (RFC 3339 또는 `YYYY-MM-DD`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl InvoiceRecord {
    /// 새 인보이스를 생성합니다.
    pub fn new(customer_name: impl Into<String>, total: Amount) -> Self {
        Self {
            id: None,
            customer_name: Some(customer_name.into()),
            total,
            items: Vec::new(),
            created_at: None,
            date: None,
        }
    }

    /// ID를 설정합니다.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// 생성 시각을 설정합니다.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// 날짜 문자열을 설정합니다.
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// 품목을 추가합니다.
    pub fn with_item(mut self, item: LineItem) -> Self {
        self.items.push(item);
        self
    }

    /// 인보이스 시각을 해석합니다.
    ///
    /// 날짜 필드가 없거나 해석할 수 없으면 `None`을 반환하며,
    /// 이 경우 시계열 처리 대상에서 제외됩니다.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        if let Some(created_at) = self.created_at {
            return Some(created_at);
        }

        let raw = self.date.as_deref()?.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }

        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    /// 고객 그룹 키를 반환합니다 (대소문자 구분, 없으면 `"Unknown"`).
    pub fn customer_key(&self) -> &str {
        self.customer_name.as_deref().unwrap_or(UNKNOWN_CUSTOMER)
    }

    /// 품목 수를 반환합니다.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// 품목당 평균 금액 (총액 / 품목 수). 품목이 없으면 0.
    pub fn avg_item_price(&self) -> f64 {
        let count = self.item_count();
        if count == 0 {
            0.0
        } else {
            self.total.to_f64_lossy() / count as f64
        }
    }

    /// 가장 비싼 품목 단가. 품목이 없으면 0.
    pub fn max_item_price(&self) -> f64 {
        self.items
            .iter()
            .map(|item| item.price.to_f64_lossy())
            .fold(0.0, f64::max)
    }

    /// 입력 불변식을 검증합니다.
    pub fn validate(&self) -> InvoiceResult<()> {
        if !self.total.is_non_negative() {
            return Err(InvoiceError::InvalidInput(format!(
                "invoice total must be non-negative, got {}",
                self.total
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};
    use rust_decimal_macros::dec;

    #[test]
    fn test_timestamp_prefers_created_at() {
        let created = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        let invoice = InvoiceRecord::new("Acme", dec!(100))
            .with_created_at(created)
            .with_date("2020-01-01");

        assert_eq!(invoice.timestamp(), Some(created));
    }

    #[test]
    fn test_timestamp_from_date_string() {
        let invoice = InvoiceRecord::new("Acme", dec!(100)).with_date("2024-02-29");
        let ts = invoice.timestamp().unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2024, 2, 29));

        let invoice = InvoiceRecord::new("Acme", dec!(100)).with_date("2024-02-29T12:30:00+09:00");
        assert_eq!(invoice.timestamp().unwrap().hour(), 3);
    }

    #[test]
    fn test_timestamp_missing_or_invalid() {
        assert!(InvoiceRecord::new("Acme", dec!(1)).timestamp().is_none());
        assert!(InvoiceRecord::new("Acme", dec!(1))
            .with_date("yesterday")
            .timestamp()
            .is_none());
    }

    #[test]
    fn test_item_derived_values() {
        let invoice = InvoiceRecord::new("Acme", dec!(300))
            .with_item(LineItem::new("A", dec!(1), dec!(50)))
            .with_item(LineItem::new("B", dec!(2), dec!(125)));

        assert_eq!(invoice.item_count(), 2);
        assert_eq!(invoice.avg_item_price(), 150.0);
        assert_eq!(invoice.max_item_price(), 125.0);

        let empty = InvoiceRecord::new("Acme", dec!(300));
        assert_eq!(empty.avg_item_price(), 0.0);
        assert_eq!(empty.max_item_price(), 0.0);
    }

    #[test]
    fn test_customer_key_sentinel() {
        let mut invoice = InvoiceRecord::new("acme", dec!(1));
        assert_eq!(invoice.customer_key(), "acme");
        invoice.customer_name = None;
        assert_eq!(invoice.customer_key(), UNKNOWN_CUSTOMER);
    }

    #[test]
    fn test_deserialize_camel_case() {
        let json = r#"{
            "customerName": "Acme",
            "total": 250.5,
            "items": [{"productName": "Widget", "quantity": 2, "price": 125.25}],
            "date": "2024-01-15"
        }"#;
        let invoice: InvoiceRecord = serde_json::from_str(json).unwrap();

        assert_eq!(invoice.customer_key(), "Acme");
        assert_eq!(invoice.total, dec!(250.5));
        assert_eq!(invoice.items[0].product_key(), "Widget");
        assert!(invoice.timestamp().is_some());
    }

    #[test]
    fn test_validate_negative_total() {
        assert!(InvoiceRecord::new("Acme", dec!(-1)).validate().is_err());
        assert!(InvoiceRecord::new("Acme", dec!(0)).validate().is_ok());
    }
}
