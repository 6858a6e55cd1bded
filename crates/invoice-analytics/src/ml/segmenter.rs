//! 고객 세그먼트 분류.
//!
//! 고객별 집계 feature 4개를 입력으로 받는 작은 분류기를 k개 클래스로
//! 학습시키고, argmax 클래스를 세그먼트로 사용합니다.
//!
//! 학습 라벨은 실제 군집 신호가 아니라 입력 순서 기준의 round-robin
//! 할당(`i mod k`)입니다. 따라서 분류기는 진짜 비지도 군집이 아니라
//! 4차원 feature 공간 위의 임의 분할 함수를 학습합니다.

use super::error::{MlError, MlResult};
use super::features::{CustomerAggregate, FeatureExtractor, CUSTOMER_FEATURES};
use super::network::{adam, Dataset, FitOptions, ModelState, Objective, Targets, TrainableNetwork};
use super::types::{
    is_cancelled, CancelFlag, LayerKind, LayerSummary, ModelKind, ModelSummary, ProgressSink,
    TrainingControl, TrainingHistory, TrainingProgress,
};
use candle_core::{Tensor, D};
use candle_nn::{linear, Linear, Module, VarBuilder};
use chrono::{DateTime, Utc};
use invoice_core::InvoiceRecord;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// 세그먼트 분류기 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// 은닉층 유닛 수
    pub hidden_units: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f64,
    pub seed: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            hidden_units: 10,
            learning_rate: 0.01,
            epochs: 30,
            batch_size: 16,
            validation_split: 0.2,
            seed: 42,
        }
    }
}

impl SegmenterConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }
}

/// dense(relu) → dense(k) 분류기. 출력은 logits이며 확률은 softmax로 얻습니다.
pub struct SegmentClassifier {
    hidden: Linear,
    output: Linear,
    hidden_units: usize,
    segments: usize,
}

impl TrainableNetwork for SegmentClassifier {
    /// (은닉 유닛 수, 세그먼트 수)
    type Config = (usize, usize);
    const KIND: ModelKind = ModelKind::CustomerSegmentation;

    fn build(config: &Self::Config, vb: VarBuilder<'_>) -> MlResult<Self> {
        let (hidden_units, segments) = *config;
        Ok(Self {
            hidden: linear(CUSTOMER_FEATURES, hidden_units, vb.pp("hidden"))?,
            output: linear(hidden_units, segments, vb.pp("output"))?,
            hidden_units,
            segments,
        })
    }

    fn forward_t(&self, xs: &Tensor, _rng: Option<&mut StdRng>) -> MlResult<Tensor> {
        let hidden = self.hidden.forward(xs)?.relu()?;
        Ok(self.output.forward(&hidden)?)
    }

    fn layers(&self) -> Vec<LayerSummary> {
        vec![
            LayerSummary {
                name: "hidden".to_string(),
                kind: LayerKind::Dense,
                units: self.hidden_units,
                activation: Some("relu".to_string()),
                params: 0,
            },
            LayerSummary {
                name: "output".to_string(),
                kind: LayerKind::Dense,
                units: self.segments,
                activation: Some("softmax".to_string()),
                params: 0,
            },
        ]
    }
}

/// 세그먼트가 할당된 고객.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentedCustomer {
    #[serde(flatten)]
    pub customer: CustomerAggregate,
    /// 0부터 k-1
    pub segment: usize,
}

/// 세그먼트별 요약.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub segment: usize,
    pub customer_count: usize,
    pub total_spent: f64,
    pub avg_spent: f64,
}

/// 고객이 있는 세그먼트만 인덱스 순으로 요약합니다.
pub fn segment_summary(customers: &[SegmentedCustomer]) -> Vec<SegmentSummary> {
    let mut groups: BTreeMap<usize, (usize, f64)> = BTreeMap::new();
    for c in customers {
        let entry = groups.entry(c.segment).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += c.customer.total_spent;
    }

    groups
        .into_iter()
        .map(|(segment, (count, total))| SegmentSummary {
            segment,
            customer_count: count,
            total_spent: total,
            avg_spent: total / count as f64,
        })
        .collect()
}

struct TrainedSegmenter {
    model: ModelState<SegmentClassifier>,
    customers: Vec<CustomerAggregate>,
    features: Vec<f32>,
}

/// 고객 세그먼트 모델.
pub struct CustomerSegmenter {
    config: SegmenterConfig,
    extractor: FeatureExtractor,
    progress: Option<ProgressSink>,
    cancel: Option<CancelFlag>,
    state: Option<TrainedSegmenter>,
}

impl CustomerSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            extractor: FeatureExtractor::with_defaults(),
            progress: None,
            cancel: None,
            state: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SegmenterConfig::default())
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

    pub fn is_trained(&self) -> bool {
        self.state.is_some()
    }

    /// 학습에 사용된 세그먼트 수.
    pub fn segments(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.model.network().segments)
    }

    pub fn summary(&self) -> Option<ModelSummary> {
        self.state.as_ref().map(|s| s.model.summary())
    }

    pub fn dispose(&mut self) {
        self.state = None;
    }

    /// 현재 시각 기준으로 학습합니다.
    pub fn train(&mut self, invoices: &[InvoiceRecord], k: usize) -> MlResult<TrainingHistory> {
        self.train_at(invoices, k, Utc::now())
    }

    /// `now` 기준 경과 일수로 고객 feature를 만들어 학습합니다.
    ///
    /// 서로 다른 고객이 `k`명 이상 필요합니다.
    pub fn train_at(
        &mut self,
        invoices: &[InvoiceRecord],
        k: usize,
        now: DateTime<Utc>,
    ) -> MlResult<TrainingHistory> {
        if k == 0 {
            return Err(MlError::InvalidInput(
                "segment count must be positive".to_string(),
            ));
        }

        let customers = self
            .extractor
            .aggregate_customers(invoices, now)
            .unwrap_or_default();
        if customers.len() < k {
            return Err(MlError::insufficient(k, customers.len(), "distinct customers"));
        }

        let features: Vec<f32> = customers
            .iter()
            .flat_map(|c| self.extractor.customer_vector(c))
            .collect();
        let labels: Vec<u32> = (0..customers.len()).map(|i| (i % k) as u32).collect();
        let dataset = Dataset::new(
            features.clone(),
            vec![CUSTOMER_FEATURES],
            Targets::Classes(labels),
        )?;

        let model =
            ModelState::<SegmentClassifier>::build(&(self.config.hidden_units, k), self.config.seed)?;
        let epochs = self.config.epochs;
        let options = FitOptions {
            epochs,
            batch_size: self.config.batch_size,
            validation_split: self.config.validation_split,
            shuffle: true,
            seed: self.config.seed,
            objective: Objective::CrossEntropy,
            optimizer: adam(self.config.learning_rate, 0.9, 0.999, 1e-7),
        };

        info!(customers = customers.len(), k, epochs, "Training customer segmenter");

        let progress = self.progress.clone();
        let cancel = self.cancel.clone();
        let history = model.fit(&dataset, &options, |log| {
            if let Some(sink) = &progress {
                sink(TrainingProgress::new(
                    ModelKind::CustomerSegmentation,
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
                ModelKind::CustomerSegmentation,
                history.epochs_run(),
                epochs,
            ));
        }

        info!(
            final_loss = history.last().map(|l| l.loss),
            "Customer segmenter trained"
        );

        self.state = Some(TrainedSegmenter {
            model,
            customers,
            features,
        });
        Ok(history)
    }

    /// 학습에 사용한 고객들의 세그먼트 (입력 순서 유지).
    pub fn predict_segments(&self) -> MlResult<Vec<SegmentedCustomer>> {
        let state = self.trained()?;
        // softmax는 단조이므로 logits의 argmax와 같음
        let segments = state.logits()?.argmax(D::Minus1)?.to_vec1::<u32>()?;

        Ok(state
            .customers
            .iter()
            .zip(segments)
            .map(|(customer, segment)| SegmentedCustomer {
                customer: customer.clone(),
                segment: segment as usize,
            })
            .collect())
    }

    /// 고객별 세그먼트 확률 (softmax).
    pub fn segment_probabilities(&self) -> MlResult<Vec<Vec<f32>>> {
        let logits = self.trained()?.logits()?;
        Ok(candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec2::<f32>()?)
    }

    fn trained(&self) -> MlResult<&TrainedSegmenter> {
        self.state
            .as_ref()
            .ok_or(MlError::NotTrained(ModelKind::CustomerSegmentation))
    }
}

impl TrainedSegmenter {
    fn logits(&self) -> MlResult<Tensor> {
        let xs = Tensor::from_vec(
            self.features.clone(),
            (self.customers.len(), CUSTOMER_FEATURES),
            self.model.device(),
        )?;
        self.model.network().forward_t(&xs, None)
    }
}
