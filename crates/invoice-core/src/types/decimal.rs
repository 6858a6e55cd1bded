//! 금액 계산을 위한 Decimal 유틸리티.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// 인보이스 금액 타입.
pub type Amount = Decimal;

/// 품목 수량 타입.
pub type Quantity = Decimal;

/// Decimal 연산을 위한 확장 트레이트.
pub trait DecimalExt {
    /// ML 입력용 f64로 변환합니다. 표현할 수 없는 값은 0.0.
    fn to_f64_lossy(&self) -> f64;

    /// 음수가 아닌지 확인합니다.
    fn is_non_negative(&self) -> bool;
}

impl DecimalExt for Decimal {
    fn to_f64_lossy(&self) -> f64 {
        self.to_f64().unwrap_or(0.0)
    }

    fn is_non_negative(&self) -> bool {
        !self.is_sign_negative() || self.is_zero()
    }
}
