//! 인보이스 분석 엔진.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - 인보이스 feature 추출 및 시퀀스 생성
//! - 회귀 지표 계산 및 모델 품질 평가
//! - 매출 예측, 고객 세그먼트, 이상 탐지 모델
//! - 세 모델을 순서대로 실행하는 분석 세션
//!
//! # Re-exports
//!
//! - [`ml`]: 모델과 분석 세션

pub mod ml;

pub use ml::{
    AnalyticsReport, AnalyticsSession, AnomalyDetector, CustomerSegmenter, InvoiceSource,
    MlError, MlResult, RevenueForecaster, StageOutcome, StaticInvoiceSource,
};
