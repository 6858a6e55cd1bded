//! 인보이스 이력으로 학습하는 머신러닝 분석 기능.
//!
//! 이 모듈은 세션마다 메모리에서만 학습되는 세 가지 모델을 제공합니다:
//!
//! - **매출 예측**: LSTM 시퀀스 회귀 + Monte Carlo 롤아웃
//! - **고객 세그먼트**: 고객 집계 feature 분류기
//! - **이상 탐지**: 오토인코더 재구성 오차
//!
//! # 아키텍처
//!
//! ```text
//! Invoice Snapshot
//!        │
//!        ▼
//! ┌──────────────────┐
//! │ FeatureExtractor │ ← 고정 상수 정규화
//! └────────┬─────────┘
//!          │
//!    ┌─────┼──────────────────┬───────────────────┐
//!    ▼     ▼                  ▼                   ▼
//! Sequence Builder     Customer Aggregates   Anomaly Features
//!    │                        │                   │
//!    ▼                        ▼                   ▼
//! ┌──────────────┐   ┌────────────────┐   ┌────────────────┐
//! │ Forecaster   │   │ Segmenter      │   │ Detector       │
//! │ (LSTM)       │   │ (dense+softmax)│   │ (autoencoder)  │
//! └──────┬───────┘   └───────┬────────┘   └───────┬────────┘
//!        │ metrics           │                    │
//!        └─────────┬─────────┴────────────────────┘
//!                  ▼
//!          ┌──────────────────┐
//!          │ AnalyticsSession │ ← 단계별 순차 실행
//!          └──────────────────┘
//! ```
//!
//! # 예제
//!
//! ```ignore
//! use invoice_analytics::ml::{AnalyticsSession, StaticInvoiceSource};
//!
//! let session = AnalyticsSession::with_defaults();
//! let report = session.run(&StaticInvoiceSource::new(invoices)).await?;
//!
//! if let Some(forecast) = report.forecast.completed() {
//!     println!("R²: {:.3}", forecast.evaluation.metrics.r2);
//! }
//! ```

pub mod anomaly;
pub mod error;
pub mod features;
pub mod forecaster;
pub mod metrics;
pub mod network;
pub mod segmenter;
pub mod sequence;
pub mod service;
pub mod types;

// 자주 사용되는 타입 재내보내기
pub use error::{MlError, MlResult};
pub use features::{
    AnomalyFeatures, CustomerAggregate, FeatureExtractor, FeatureScales, InvoiceFeatures,
    SequencePoint,
};
pub use metrics::{
    assess_model_quality, calculate_metrics, QualityAssessment, QualityTier, Recommendation,
    RegressionMetrics,
};
pub use sequence::{SequenceBuilder, SequenceDataset, SEQUENCE_WINDOW};
pub use types::{
    CancelFlag, EpochLog, LayerKind, LayerSummary, ModelKind, ModelSummary, ProgressSink,
    TrainingControl, TrainingHistory, TrainingProgress,
};

// 모델 타입 재내보내기
pub use anomaly::{AnomalyDetector, AnomalyReport, AnomalyScore, DetectorConfig, ScatterPoint};
pub use forecaster::{
    ForecastEvaluation, ForecasterConfig, RevenueForecaster, TargetNormalization,
};
pub use network::{
    Dataset, EarlyStopping, FitOptions, ModelState, Objective, Targets, TrainableNetwork,
};
pub use segmenter::{
    segment_summary, CustomerSegmenter, SegmentSummary, SegmentedCustomer, SegmenterConfig,
};

// 서비스 타입 재내보내기
pub use service::{
    AnalyticsReport, AnalyticsSession, AnomalyStage, ForecastStage, InvoiceSource,
    SegmentationStage, StageOutcome, StaticInvoiceSource,
};
