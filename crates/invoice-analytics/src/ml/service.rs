//! 분석 세션 - 세 모델의 학습과 추론을 순서대로 실행하는 서비스.
//!
//! 한 세션은 인보이스 스냅샷 하나를 받아 다음 단계를 차례로 실행합니다:
//! 1. 매출 예측: 학습 → 예측 → 평가 → 품질 평가
//! 2. 고객 세그먼트: 학습 → 세그먼트 할당
//! 3. 이상 탐지: 학습 → 이상 점수 계산
//!
//! 각 단계는 이전 단계가 끝난 뒤에만 시작하며, CPU 작업은
//! `spawn_blocking`에서 실행됩니다. 한 단계가 실패해도 나머지 단계는
//! 계속 실행되고, 실패는 보고서에 기록됩니다.

use crate::ml::{
    anomaly::{AnomalyDetector, AnomalyReport, AnomalyScore, DetectorConfig},
    error::{MlError, MlResult},
    forecaster::{ForecastEvaluation, ForecasterConfig, RevenueForecaster},
    metrics::{assess_model_quality, QualityAssessment},
    segmenter::{
        segment_summary, CustomerSegmenter, SegmentSummary, SegmentedCustomer, SegmenterConfig,
    },
    types::{CancelFlag, ModelKind, ModelSummary, ProgressSink, TrainingHistory},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use invoice_core::{analytics_span, AnalyticsConfig, InvoiceRecord};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 사용자 범위의 인보이스 스냅샷 제공자.
#[async_trait]
pub trait InvoiceSource: Send + Sync {
    /// 세션당 한 번 호출됩니다.
    async fn fetch_invoices(&self) -> MlResult<Vec<InvoiceRecord>>;
}

/// 메모리에 있는 인보이스 목록.
#[derive(Debug, Clone, Default)]
pub struct StaticInvoiceSource {
    invoices: Vec<InvoiceRecord>,
}

impl StaticInvoiceSource {
    pub fn new(invoices: Vec<InvoiceRecord>) -> Self {
        Self { invoices }
    }
}

impl From<Vec<InvoiceRecord>> for StaticInvoiceSource {
    fn from(invoices: Vec<InvoiceRecord>) -> Self {
        Self::new(invoices)
    }
}

#[async_trait]
impl InvoiceSource for StaticInvoiceSource {
    async fn fetch_invoices(&self) -> MlResult<Vec<InvoiceRecord>> {
        Ok(self.invoices.clone())
    }
}

/// 단계 실행 결과.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome<T> {
    Completed(T),
    Failed { error: String },
}

impl<T> StageOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed(_))
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            StageOutcome::Completed(value) => Some(value),
            StageOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            StageOutcome::Completed(_) => None,
            StageOutcome::Failed { error } => Some(error),
        }
    }

    fn from_result(stage: ModelKind, result: MlResult<T>) -> Self {
        match result {
            Ok(value) => {
                info!(stage = %stage, "Analytics stage completed");
                StageOutcome::Completed(value)
            }
            Err(err) => {
                warn!(stage = %stage, error = %err, "Analytics stage failed");
                StageOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }
}

/// 매출 예측 단계 결과.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastStage {
    pub history: TrainingHistory,
    /// 일별 예측 매출 (0 이상)
    pub forecast: Vec<f64>,
    pub evaluation: ForecastEvaluation,
    pub assessment: QualityAssessment,
    pub summary: Option<ModelSummary>,
}

/// 고객 세그먼트 단계 결과.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationStage {
    pub history: TrainingHistory,
    pub customers: Vec<SegmentedCustomer>,
    pub segments: Vec<SegmentSummary>,
}

/// 이상 탐지 단계 결과.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyStage {
    pub history: TrainingHistory,
    pub scores: Vec<AnomalyScore>,
    pub report: AnomalyReport,
}

/// 세션 전체 보고서.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub generated_at: DateTime<Utc>,
    pub invoice_count: usize,
    pub forecast: StageOutcome<ForecastStage>,
    pub segmentation: StageOutcome<SegmentationStage>,
    pub anomalies: StageOutcome<AnomalyStage>,
}

impl AnalyticsReport {
    /// 실패한 단계 목록.
    pub fn failed_stages(&self) -> Vec<ModelKind> {
        let mut failed = Vec::new();
        if !self.forecast.is_completed() {
            failed.push(ModelKind::RevenueForecast);
        }
        if !self.segmentation.is_completed() {
            failed.push(ModelKind::CustomerSegmentation);
        }
        if !self.anomalies.is_completed() {
            failed.push(ModelKind::AnomalyDetection);
        }
        failed
    }
}

/// 분석 세션.
///
/// 모델은 세션 안에서만 존재하며 세션을 넘겨 저장되지 않습니다.
pub struct AnalyticsSession {
    config: AnalyticsConfig,
    forecaster: ForecasterConfig,
    segmenter: SegmenterConfig,
    detector: DetectorConfig,
    progress: Option<ProgressSink>,
}

impl AnalyticsSession {
    /// 세션 설정의 시드를 모든 모델에 적용합니다.
    pub fn new(config: AnalyticsConfig) -> Self {
        let seed = config.seed;
        Self {
            forecaster: ForecasterConfig::default().with_seed(seed),
            segmenter: SegmenterConfig::default().with_seed(seed),
            detector: DetectorConfig::default().with_seed(seed),
            config,
            progress: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(AnalyticsConfig::default())
    }

    pub fn with_forecaster_config(mut self, config: ForecasterConfig) -> Self {
        self.forecaster = config;
        self
    }

    pub fn with_segmenter_config(mut self, config: SegmenterConfig) -> Self {
        self.segmenter = config;
        self
    }

    pub fn with_detector_config(mut self, config: DetectorConfig) -> Self {
        self.detector = config;
        self
    }

    /// 모든 모델의 epoch 진행 상황 수신자.
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// 소스에서 스냅샷을 한 번 조회해 분석합니다.
    pub async fn run(&self, source: &dyn InvoiceSource) -> MlResult<AnalyticsReport> {
        let invoices = source.fetch_invoices().await?;
        self.analyze(invoices).await
    }

    /// 인보이스 스냅샷으로 세 단계를 순서대로 실행합니다.
    ///
    /// 전체 인보이스 수가 최소 요건에 못 미치거나 유효하지 않은 인보이스가
    /// 있으면 어떤 모델도 학습하지 않고 실패합니다.
    pub async fn analyze(&self, invoices: Vec<InvoiceRecord>) -> MlResult<AnalyticsReport> {
        let required = self.config.min_session_invoices;
        if invoices.len() < required {
            return Err(MlError::insufficient(required, invoices.len(), "invoices"));
        }
        for invoice in &invoices {
            invoice
                .validate()
                .map_err(|e| MlError::InvalidInput(e.to_string()))?;
        }

        let generated_at = Utc::now();
        let invoice_count = invoices.len();
        let invoices: Arc<Vec<InvoiceRecord>> = Arc::new(invoices);

        info!(invoices = invoice_count, seed = self.config.seed, "Starting analytics session");

        let forecast = self.forecast_stage(Arc::clone(&invoices)).await;
        let segmentation = self
            .segmentation_stage(Arc::clone(&invoices), generated_at)
            .await;
        let anomalies = self.anomaly_stage(invoices).await;

        let report = AnalyticsReport {
            generated_at,
            invoice_count,
            forecast,
            segmentation,
            anomalies,
        };
        info!(
            failed_stages = report.failed_stages().len(),
            "Analytics session finished"
        );
        Ok(report)
    }

    async fn forecast_stage(&self, invoices: Arc<Vec<InvoiceRecord>>) -> StageOutcome<ForecastStage> {
        let cancel = CancelFlag::default();
        let mut model = RevenueForecaster::new(self.forecaster.clone())
            .with_cancellation(Arc::clone(&cancel));
        if let Some(sink) = &self.progress {
            model = model.with_progress(Arc::clone(sink));
        }
        let epochs = self.config.forecast_epochs;
        let days = self.config.forecast_days;

        let task = tokio::task::spawn_blocking(move || -> MlResult<ForecastStage> {
            let _span =
                analytics_span!("forecast_stage", ModelKind::RevenueForecast, invoices.len())
                    .entered();
            let history = model.train(&invoices, epochs)?;
            let forecast = model.forecast(&invoices, days)?;
            let evaluation = model.evaluate_model(&invoices)?;
            let assessment = assess_model_quality(&evaluation.metrics, invoices.len());
            let summary = model.summary();
            model.dispose();

            Ok(ForecastStage {
                history,
                forecast,
                evaluation,
                assessment,
                summary,
            })
        });

        let result = self.await_stage(ModelKind::RevenueForecast, task, &cancel).await;
        StageOutcome::from_result(ModelKind::RevenueForecast, result)
    }

    async fn segmentation_stage(
        &self,
        invoices: Arc<Vec<InvoiceRecord>>,
        now: DateTime<Utc>,
    ) -> StageOutcome<SegmentationStage> {
        let cancel = CancelFlag::default();
        let mut model = CustomerSegmenter::new(self.segmenter.clone())
            .with_cancellation(Arc::clone(&cancel));
        if let Some(sink) = &self.progress {
            model = model.with_progress(Arc::clone(sink));
        }
        let k = self.config.segment_count;

        let task = tokio::task::spawn_blocking(move || -> MlResult<SegmentationStage> {
            let _span = analytics_span!(
                "segmentation_stage",
                ModelKind::CustomerSegmentation,
                invoices.len()
            )
            .entered();
            let history = model.train_at(&invoices, k, now)?;
            let customers = model.predict_segments()?;
            let segments = segment_summary(&customers);
            model.dispose();

            Ok(SegmentationStage {
                history,
                customers,
                segments,
            })
        });

        let result = self
            .await_stage(ModelKind::CustomerSegmentation, task, &cancel)
            .await;
        StageOutcome::from_result(ModelKind::CustomerSegmentation, result)
    }

    async fn anomaly_stage(&self, invoices: Arc<Vec<InvoiceRecord>>) -> StageOutcome<AnomalyStage> {
        let cancel = CancelFlag::default();
        let mut model =
            AnomalyDetector::new(self.detector.clone()).with_cancellation(Arc::clone(&cancel));
        if let Some(sink) = &self.progress {
            model = model.with_progress(Arc::clone(sink));
        }

        let task = tokio::task::spawn_blocking(move || -> MlResult<AnomalyStage> {
            let _span =
                analytics_span!("anomaly_stage", ModelKind::AnomalyDetection, invoices.len())
                    .entered();
            let history = model.train(&invoices)?;
            let scores = model.detect_anomalies(&invoices)?;
            let report = model.report(&scores);
            model.dispose();

            Ok(AnomalyStage {
                history,
                scores,
                report,
            })
        });

        let result = self
            .await_stage(ModelKind::AnomalyDetection, task, &cancel)
            .await;
        StageOutcome::from_result(ModelKind::AnomalyDetection, result)
    }

    /// 블로킹 작업 완료를 기다립니다.
    ///
    /// 타임아웃이 지나면 중단 플래그를 설정하고, 학습이 epoch 경계에서
    /// 멈출 때까지 기다린 뒤 `Timeout`을 반환합니다. 다음 단계는 항상
    /// 이전 작업이 끝난 뒤에 시작합니다.
    async fn await_stage<T>(
        &self,
        stage: ModelKind,
        mut task: JoinHandle<MlResult<T>>,
        cancel: &AtomicBool,
    ) -> MlResult<T> {
        let Some(secs) = self.config.stage_timeout_secs else {
            return task.await?;
        };

        match tokio::time::timeout(Duration::from_secs(secs), &mut task).await {
            Ok(joined) => joined?,
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                // 중단된 작업의 결과는 버림
                let _ = task.await;
                Err(MlError::Timeout { stage, secs })
            }
        }
    }
}
