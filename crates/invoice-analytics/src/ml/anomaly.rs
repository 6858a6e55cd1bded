//! 오토인코더 재구성 오차 기반 이상 인보이스 탐지.
//!
//! 인보이스별 4차원 feature(총액, 품목 수, 평균 단가, 최고 단가)를
//! 4 → 8 → 4 → 8 → 4 구조의 오토인코더로 재구성하고, 평균 제곱 재구성
//! 오차가 임계값(0.95)을 넘으면 이상으로 표시합니다.

use super::error::{MlError, MlResult};
use super::features::{AnomalyFeatures, FeatureExtractor, FeatureScales, ANOMALY_FEATURES};
use super::network::{adam, Dataset, FitOptions, ModelState, Objective, Targets, TrainableNetwork};
use super::types::{
    is_cancelled, CancelFlag, LayerKind, LayerSummary, ModelKind, ModelSummary, ProgressSink,
    TrainingControl, TrainingHistory, TrainingProgress,
};
use candle_core::Tensor;
use candle_nn::{linear, Linear, Module, VarBuilder};
use invoice_core::InvoiceRecord;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// 이상 탐지 모델 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// 학습에 필요한 최소 인보이스 수
    pub min_invoices: usize,
    /// 재구성 오차 임계값
    pub threshold: f32,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f64,
    pub seed: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_invoices: 10,
            threshold: 0.95,
            learning_rate: 0.001,
            epochs: 50,
            batch_size: 16,
            validation_split: 0.2,
            seed: 42,
        }
    }
}

impl DetectorConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }
}

const ENCODER: [(&str, usize, &str); 4] = [
    ("encoder1", 8, "relu"),
    ("bottleneck", 4, "relu"),
    ("decoder1", 8, "relu"),
    ("reconstruction", ANOMALY_FEATURES, "linear"),
];

/// 대칭 오토인코더.
pub struct Autoencoder {
    layers: Vec<Linear>,
}

impl TrainableNetwork for Autoencoder {
    type Config = ();
    const KIND: ModelKind = ModelKind::AnomalyDetection;

    fn build(_config: &Self::Config, vb: VarBuilder<'_>) -> MlResult<Self> {
        let mut layers = Vec::with_capacity(ENCODER.len());
        let mut input = ANOMALY_FEATURES;
        for (name, units, _) in ENCODER {
            layers.push(linear(input, units, vb.pp(name))?);
            input = units;
        }
        Ok(Self { layers })
    }

    fn forward_t(&self, xs: &Tensor, _rng: Option<&mut StdRng>) -> MlResult<Tensor> {
        let last = self.layers.len() - 1;
        let mut out = xs.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            out = layer.forward(&out)?;
            if i < last {
                out = out.relu()?;
            }
        }
        Ok(out)
    }

    fn layers(&self) -> Vec<LayerSummary> {
        ENCODER
            .iter()
            .map(|(name, units, activation)| LayerSummary {
                name: name.to_string(),
                kind: LayerKind::Dense,
                units: *units,
                activation: Some(activation.to_string()),
                params: 0,
            })
            .collect()
    }
}

/// 인보이스 하나의 이상 점수.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyScore {
    /// 입력 목록에서의 위치
    pub index: usize,
    /// 원본 인보이스
    pub invoice: InvoiceRecord,
    /// 정규화된 입력 feature
    pub features: AnomalyFeatures,
    /// 평균 제곱 재구성 오차
    pub reconstruction_error: f32,
    pub is_anomaly: bool,
}

/// 산점도용 점 (원 단위 총액, 품목 수).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScatterPoint {
    pub index: usize,
    pub total: f64,
    pub item_count: f64,
    pub is_anomaly: bool,
}

/// 이상 탐지 결과 요약.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub normal_count: usize,
    pub anomaly_count: usize,
    pub points: Vec<ScatterPoint>,
}

impl AnomalyReport {
    /// 산점도 좌표는 `scales`로 정규화를 되돌린 총액과 품목 수입니다.
    pub fn from_scores(scores: &[AnomalyScore], scales: &FeatureScales) -> Self {
        let anomaly_count = scores.iter().filter(|s| s.is_anomaly).count();
        Self {
            normal_count: scores.len() - anomaly_count,
            anomaly_count,
            points: scores
                .iter()
                .map(|s| ScatterPoint {
                    index: s.index,
                    total: s.features.total as f64 * scales.total,
                    item_count: s.features.item_count as f64 * scales.item_count,
                    is_anomaly: s.is_anomaly,
                })
                .collect(),
        }
    }

    /// 이상 인보이스 비율 (0 ~ 1).
    pub fn anomaly_rate(&self) -> f64 {
        let total = self.normal_count + self.anomaly_count;
        if total == 0 {
            0.0
        } else {
            self.anomaly_count as f64 / total as f64
        }
    }
}

/// 이상 탐지 모델.
pub struct AnomalyDetector {
    config: DetectorConfig,
    extractor: FeatureExtractor,
    progress: Option<ProgressSink>,
    cancel: Option<CancelFlag>,
    state: Option<ModelState<Autoencoder>>,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            extractor: FeatureExtractor::with_defaults(),
            progress: None,
            cancel: None,
            state: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DetectorConfig::default())
    }

    pub fn with_extractor(mut self, extractor: FeatureExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn with_cancellation(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn threshold(&self) -> f32 {
        self.config.threshold
    }

    pub fn is_trained(&self) -> bool {
        self.state.is_some()
    }

    pub fn summary(&self) -> Option<ModelSummary> {
        self.state.as_ref().map(ModelState::summary)
    }

    pub fn dispose(&mut self) {
        self.state = None;
    }

    /// 이 탐지기의 feature 스케일로 점수 요약을 만듭니다.
    pub fn report(&self, scores: &[AnomalyScore]) -> AnomalyReport {
        AnomalyReport::from_scores(scores, self.extractor.scales())
    }

    /// 입력을 그대로 타겟으로 사용해 오토인코더를 학습합니다.
    pub fn train(&mut self, invoices: &[InvoiceRecord]) -> MlResult<TrainingHistory> {
        if invoices.len() < self.config.min_invoices {
            return Err(MlError::insufficient(
                self.config.min_invoices,
                invoices.len(),
                "invoices",
            ));
        }

        let features = self.flatten(&self.extractor.extract_anomaly_features(invoices));
        let dataset = Dataset::new(
            features.clone(),
            vec![ANOMALY_FEATURES],
            Targets::Dense {
                values: features,
                width: ANOMALY_FEATURES,
            },
        )?;

        let model = ModelState::<Autoencoder>::build(&(), self.config.seed)?;
        let epochs = self.config.epochs;
        let options = FitOptions {
            epochs,
            batch_size: self.config.batch_size,
            validation_split: self.config.validation_split,
            shuffle: true,
            seed: self.config.seed,
            objective: Objective::MeanSquaredError,
            optimizer: adam(self.config.learning_rate, 0.9, 0.999, 1e-7),
        };

        info!(invoices = invoices.len(), epochs, "Training anomaly detector");

        let progress = self.progress.clone();
        let cancel = self.cancel.clone();
        let history = model.fit(&dataset, &options, |log| {
            if let Some(sink) = &progress {
                sink(TrainingProgress::new(
                    ModelKind::AnomalyDetection,
                    log.epoch + 1,
                    epochs,
                ));
            }
            if is_cancelled(cancel.as_ref()) {
                TrainingControl::Stop
            } else {
                TrainingControl::Continue
            }
        })?;
        if let Some(sink) = &progress {
            sink(TrainingProgress::finished(
                ModelKind::AnomalyDetection,
                history.epochs_run(),
                epochs,
            ));
        }

        info!(
            final_loss = history.last().map(|l| l.loss),
            "Anomaly detector trained"
        );

        self.state = Some(model);
        Ok(history)
    }

    /// 주어진 인보이스의 재구성 오차와 이상 여부.
    ///
    /// 학습 데이터와 무관하게 새 데이터에도 실행할 수 있으며 결과는 캐시하지
    /// 않습니다.
    pub fn detect_anomalies(&self, invoices: &[InvoiceRecord]) -> MlResult<Vec<AnomalyScore>> {
        let model = self
            .state
            .as_ref()
            .ok_or(MlError::NotTrained(ModelKind::AnomalyDetection))?;

        if invoices.is_empty() {
            return Ok(Vec::new());
        }

        let features = self.extractor.extract_anomaly_features(invoices);
        let reconstructions = model.predict(&self.flatten(&features), &[ANOMALY_FEATURES])?;

        Ok(invoices
            .iter()
            .zip(features)
            .zip(reconstructions)
            .enumerate()
            .map(|(index, ((invoice, features), reconstruction))| {
                let reconstruction_error = features
                    .to_array()
                    .iter()
                    .zip(&reconstruction)
                    .map(|(x, r)| (x - r).powi(2))
                    .sum::<f32>()
                    / ANOMALY_FEATURES as f32;
                AnomalyScore {
                    index,
                    invoice: invoice.clone(),
                    features,
                    reconstruction_error,
                    is_anomaly: reconstruction_error > self.config.threshold,
                }
            })
            .collect())
    }

    fn flatten(&self, features: &[AnomalyFeatures]) -> Vec<f32> {
        features.iter().flat_map(AnomalyFeatures::to_array).collect()
    }
}
