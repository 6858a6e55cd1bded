//! LSTM 시퀀스 회귀 기반 매출 예측.
//!
//! 최근 7개 인보이스의 feature 시퀀스로 다음 인보이스 총액을 예측하고,
//! 예측값을 다시 입력으로 넣는 반복 롤아웃으로 여러 날을 예측합니다.
//!
//! 네트워크 구조:
//! - LSTM 64 → dropout → LSTM 32 → dropout
//! - dense 16 (relu) → dense 1 (linear)
//!
//! 타겟은 학습 데이터의 평균/표준편차로 정규화하며, 이 두 상수는 예측과
//! 평가에서 그대로 재사용됩니다.

use super::error::{MlError, MlResult};
use super::features::{FeatureExtractor, SequencePoint, SEQUENCE_FEATURES};
use super::metrics::{calculate_metrics, RegressionMetrics};
use super::network::{
    adam, dropout, validate_rate, Dataset, EarlyStopping, FitOptions, ModelState, Objective,
    Targets, TrainableNetwork,
};
use super::sequence::{SequenceBuilder, SequenceDataset, SEQUENCE_WINDOW};
use super::types::{
    is_cancelled, CancelFlag, LayerKind, LayerSummary, ModelKind, ModelSummary, ProgressSink,
    TrainingControl, TrainingHistory, TrainingProgress,
};
use candle_core::Tensor;
use candle_nn::rnn::{LSTMConfig, LSTM, RNN};
use candle_nn::{linear, lstm, Linear, Module, VarBuilder};
use chrono::{DateTime, Duration, Utc};
use invoice_core::InvoiceRecord;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// 매출 예측 모델 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecasterConfig {
    /// 시퀀스 윈도우 길이
    pub window: usize,
    /// 첫 번째 LSTM 유닛 수
    pub first_lstm_units: usize,
    /// 두 번째 LSTM 유닛 수
    pub second_lstm_units: usize,
    /// 출력 전 dense 유닛 수
    pub dense_units: usize,
    /// LSTM 뒤 dropout 비율
    pub dropout: f32,
    /// Adam 학습률
    pub learning_rate: f64,
    /// 검증용으로 분리할 마지막 샘플 비율
    pub validation_split: f64,
    /// 배치 크기 상한 (실제 크기는 `min(상한, n / 4)`, 최소 1)
    pub max_batch_size: usize,
    /// 이 epoch 이후부터 early stopping 판단
    pub early_stopping_warmup: usize,
    /// 검증 손실 비개선 허용 epoch 수
    pub early_stopping_patience: usize,
    /// Monte Carlo 롤아웃 횟수
    pub simulations: usize,
    /// 정규화된 예측값에 더하는 가우시안 노이즈 표준편차
    pub noise_std: f64,
    /// 디버그 로그 주기 (epoch)
    pub log_every: usize,
    /// 초기화/셔플/노이즈 시드
    pub seed: u64,
}

impl Default for ForecasterConfig {
    fn default() -> Self {
        Self {
            window: SEQUENCE_WINDOW,
            first_lstm_units: 64,
            second_lstm_units: 32,
            dense_units: 16,
            dropout: 0.3,
            learning_rate: 0.001,
            validation_split: 0.2,
            max_batch_size: 16,
            early_stopping_warmup: 10,
            early_stopping_patience: 10,
            simulations: 3,
            noise_std: 0.01,
            log_every: 10,
            seed: 42,
        }
    }
}

impl ForecasterConfig {
    /// 시드 설정.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// 학습률 설정.
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// dropout 비율 설정.
    pub fn with_dropout(mut self, rate: f32) -> Self {
        self.dropout = rate;
        self
    }

    /// early stopping 파라미터 설정.
    pub fn with_early_stopping(mut self, warmup: usize, patience: usize) -> Self {
        self.early_stopping_warmup = warmup;
        self.early_stopping_patience = patience;
        self
    }

    /// Monte Carlo 롤아웃 횟수와 노이즈 설정.
    pub fn with_simulations(mut self, simulations: usize, noise_std: f64) -> Self {
        self.simulations = simulations;
        self.noise_std = noise_std;
        self
    }

    fn validate(&self) -> MlResult<()> {
        validate_rate(self.dropout)?;
        if self.window == 0 {
            return Err(MlError::InvalidInput("window must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(MlError::InvalidInput(format!(
                "validation split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        Ok(())
    }

    fn network(&self) -> LstmRegressorConfig {
        LstmRegressorConfig {
            input_features: SEQUENCE_FEATURES,
            first_units: self.first_lstm_units,
            second_units: self.second_lstm_units,
            dense_units: self.dense_units,
            dropout: self.dropout,
        }
    }
}

/// LSTM 회귀 네트워크 구성.
#[derive(Debug, Clone)]
pub struct LstmRegressorConfig {
    pub input_features: usize,
    pub first_units: usize,
    pub second_units: usize,
    pub dense_units: usize,
    pub dropout: f32,
}

/// 시퀀스 → 스칼라 회귀 네트워크.
pub struct LstmRegressor {
    lstm1: LSTM,
    lstm2: LSTM,
    dense: Linear,
    output: Linear,
    config: LstmRegressorConfig,
}

impl TrainableNetwork for LstmRegressor {
    type Config = LstmRegressorConfig;
    const KIND: ModelKind = ModelKind::RevenueForecast;

    fn build(config: &Self::Config, vb: VarBuilder<'_>) -> MlResult<Self> {
        Ok(Self {
            lstm1: lstm(
                config.input_features,
                config.first_units,
                LSTMConfig::default(),
                vb.pp("lstm1"),
            )?,
            lstm2: lstm(
                config.first_units,
                config.second_units,
                LSTMConfig::default(),
                vb.pp("lstm2"),
            )?,
            dense: linear(config.second_units, config.dense_units, vb.pp("dense"))?,
            output: linear(config.dense_units, 1, vb.pp("output"))?,
            config: config.clone(),
        })
    }

    fn forward_t(&self, xs: &Tensor, rng: Option<&mut StdRng>) -> MlResult<Tensor> {
        let mut rng = rng;

        // [batch, window, features] → [batch, window, first_units]
        let states = self.lstm1.seq(xs)?;
        let sequence = self.lstm1.states_to_tensor(&states)?;
        let sequence = dropout(&sequence, self.config.dropout, rng.as_deref_mut())?;

        // 마지막 hidden state만 사용
        let states = self.lstm2.seq(&sequence)?;
        let last = states
            .last()
            .ok_or_else(|| MlError::InvalidInput("empty input sequence".to_string()))?
            .h()
            .clone();
        let last = dropout(&last, self.config.dropout, rng.as_deref_mut())?;

        let hidden = self.dense.forward(&last)?.relu()?;
        Ok(self.output.forward(&hidden)?)
    }

    fn layers(&self) -> Vec<LayerSummary> {
        let c = &self.config;
        let layer = |name: &str, kind, units, activation: Option<&str>| LayerSummary {
            name: name.to_string(),
            kind,
            units,
            activation: activation.map(str::to_string),
            params: 0,
        };
        vec![
            layer("lstm1", LayerKind::Lstm, c.first_units, Some("tanh")),
            layer("dropout1", LayerKind::Dropout, c.first_units, None),
            layer("lstm2", LayerKind::Lstm, c.second_units, Some("tanh")),
            layer("dropout2", LayerKind::Dropout, c.second_units, None),
            layer("dense", LayerKind::Dense, c.dense_units, Some("relu")),
            layer("output", LayerKind::Dense, 1, Some("linear")),
        ]
    }
}

/// 타겟 정규화 상수 (학습 시 한 번 계산).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetNormalization {
    pub mean: f64,
    pub std: f64,
}

impl TargetNormalization {
    /// 모집단 표준편차 기준. 표준편차가 0이면 1로 대체합니다.
    pub fn from_targets(targets: &[f64]) -> Self {
        if targets.is_empty() {
            return Self {
                mean: 0.0,
                std: 1.0,
            };
        }

        let n = targets.len() as f64;
        let mean = targets.iter().sum::<f64>() / n;
        let variance = targets.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();

        Self {
            mean,
            std: if std > f64::EPSILON { std } else { 1.0 },
        }
    }

    pub fn normalize(&self, value: f64) -> f64 {
        (value - self.mean) / self.std
    }

    pub fn denormalize(&self, value: f64) -> f64 {
        value * self.std + self.mean
    }
}

/// `evaluate_model` 결과.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastEvaluation {
    /// 정규화 공간의 MSE 손실
    pub loss: f32,
    /// 정규화 공간의 MAE
    pub normalized_mae: f32,
    /// 원 단위 예측값 대비 지표
    #[serde(flatten)]
    pub metrics: RegressionMetrics,
}

struct TrainedForecast {
    model: ModelState<LstmRegressor>,
    normalization: TargetNormalization,
}

struct NoiseSource {
    dist: Normal<f64>,
    rng: StdRng,
}

/// 매출 예측 모델.
///
/// `train` 이전에는 `forecast`/`evaluate_model`이 `NotTrained`로 실패합니다.
pub struct RevenueForecaster {
    config: ForecasterConfig,
    extractor: FeatureExtractor,
    builder: SequenceBuilder,
    progress: Option<ProgressSink>,
    cancel: Option<CancelFlag>,
    state: Option<TrainedForecast>,
}

impl RevenueForecaster {
    pub fn new(config: ForecasterConfig) -> Self {
        let builder = SequenceBuilder::new(config.window);
        Self {
            config,
            extractor: FeatureExtractor::with_defaults(),
            builder,
            progress: None,
            cancel: None,
            state: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ForecasterConfig::default())
    }

    /// feature 추출기 교체.
    pub fn with_extractor(mut self, extractor: FeatureExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// epoch 진행 상황 수신자 등록.
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// 중단 플래그 등록.
    pub fn with_cancellation(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &ForecasterConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.state.is_some()
    }

    /// 학습 시 저장된 타겟 정규화 상수.
    pub fn normalization(&self) -> Option<TargetNormalization> {
        self.state.as_ref().map(|s| s.normalization)
    }

    pub fn summary(&self) -> Option<ModelSummary> {
        self.state.as_ref().map(|s| s.model.summary())
    }

    /// 네트워크와 정규화 상수를 해제하고 미학습 상태로 되돌립니다.
    pub fn dispose(&mut self) {
        self.state = None;
    }

    /// 인보이스 이력으로 모델을 학습합니다.
    ///
    /// 날짜가 있는 인보이스가 `window + 1`개 이상 필요합니다.
    pub fn train(
        &mut self,
        invoices: &[InvoiceRecord],
        epochs: usize,
    ) -> MlResult<TrainingHistory> {
        self.config.validate()?;

        let required = self.config.window + 1;
        let features = self
            .extractor
            .extract_time_series(invoices)
            .unwrap_or_default();
        if features.len() < required {
            return Err(MlError::insufficient(required, features.len(), "dated invoices"));
        }

        let sequences = self.builder.build(&self.extractor, &features);
        let normalization = TargetNormalization::from_targets(&sequences.targets);
        let dataset = self.dataset(&sequences, &normalization)?;

        let model = ModelState::<LstmRegressor>::build(&self.config.network(), self.config.seed)?;
        let options = FitOptions {
            epochs,
            batch_size: (dataset.len() / 4).min(self.config.max_batch_size).max(1),
            validation_split: self.config.validation_split,
            shuffle: true,
            seed: self.config.seed,
            objective: Objective::MeanSquaredError,
            optimizer: adam(self.config.learning_rate, 0.9, 0.999, 1e-7),
        };

        info!(
            sequences = dataset.len(),
            epochs,
            batch_size = options.batch_size,
            target_mean = normalization.mean,
            target_std = normalization.std,
            "Training revenue forecaster"
        );

        let mut stopper = EarlyStopping::new(
            self.config.early_stopping_warmup,
            self.config.early_stopping_patience,
        );
        let log_every = self.config.log_every.max(1);
        let progress = self.progress.clone();
        let cancel = self.cancel.clone();

        let history = model.fit(&dataset, &options, |log| {
            if log.epoch % log_every == 0 {
                debug!(
                    "Epoch {}: loss = {:.4}, val_loss = {:.4}",
                    log.epoch + 1,
                    log.loss,
                    log.val_loss
                );
            }
            if let Some(sink) = &progress {
                sink(TrainingProgress::new(ModelKind::RevenueForecast, log.epoch + 1, epochs));
            }
            if is_cancelled(cancel.as_ref()) {
                return TrainingControl::Stop;
            }
            stopper.observe(log)
        })?;

        if let Some(sink) = &progress {
            sink(TrainingProgress::finished(
                ModelKind::RevenueForecast,
                history.epochs_run(),
                epochs,
            ));
        }

        info!(
            epochs_run = history.epochs_run(),
            stopped_early = history.stopped_early,
            final_loss = history.last().map(|l| l.loss),
            "Revenue forecaster trained"
        );

        self.state = Some(TrainedForecast {
            model,
            normalization,
        });
        Ok(history)
    }

    /// 마지막 윈도우부터 `days`일을 예측합니다.
    ///
    /// 노이즈를 더한 롤아웃을 여러 번 실행해 일별 평균을 반환하며,
    /// 이 경로가 수치 에러로 실패하면 노이즈 없는 단일 롤아웃으로 대체합니다.
    /// 모든 값은 0 이상입니다.
    pub fn forecast(&self, invoices: &[InvoiceRecord], days: usize) -> MlResult<Vec<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or(MlError::NotTrained(ModelKind::RevenueForecast))?;

        let features = self
            .extractor
            .extract_time_series(invoices)
            .unwrap_or_default();
        let window = self
            .builder
            .last_window(&self.extractor, &features)
            .ok_or_else(|| {
                MlError::insufficient(self.config.window, features.len(), "dated invoices")
            })?;
        let last_timestamp = match features.last() {
            Some(last) => last.timestamp,
            None => return Err(MlError::insufficient(self.config.window, 0, "dated invoices")),
        };

        if days == 0 {
            return Ok(Vec::new());
        }

        match self.monte_carlo(state, &window, last_timestamp, days) {
            Ok(forecast) => Ok(forecast),
            Err(err) if err.is_fallback_eligible() => {
                warn!(error = %err, "Monte Carlo forecast failed, using deterministic rollout");
                self.rollout(state, &window, last_timestamp, days, None)
            }
            Err(err) => Err(err),
        }
    }

    /// 주어진 인보이스로 시퀀스를 다시 만들어 모델을 평가합니다.
    pub fn evaluate_model(&self, invoices: &[InvoiceRecord]) -> MlResult<ForecastEvaluation> {
        let state = self
            .state
            .as_ref()
            .ok_or(MlError::NotTrained(ModelKind::RevenueForecast))?;

        let required = self.config.window + 1;
        let features = self
            .extractor
            .extract_time_series(invoices)
            .unwrap_or_default();
        if features.len() < required {
            return Err(MlError::insufficient(required, features.len(), "dated invoices"));
        }

        let sequences = self.builder.build(&self.extractor, &features);
        let dataset = self.dataset(&sequences, &state.normalization)?;
        let evaluation = state.model.evaluate(&dataset, Objective::MeanSquaredError)?;

        let predictions: Vec<f64> = state
            .model
            .predict(&dataset.inputs, &dataset.sample_shape)?
            .iter()
            .map(|row| state.normalization.denormalize(row.first().copied().unwrap_or(0.0) as f64))
            .collect();
        let metrics = calculate_metrics(&predictions, &sequences.targets)?;

        debug!(loss = evaluation.loss, r2 = metrics.r2, "Forecaster evaluated");

        Ok(ForecastEvaluation {
            loss: evaluation.loss,
            normalized_mae: evaluation.mae.unwrap_or_default(),
            metrics,
        })
    }

    fn dataset(
        &self,
        sequences: &SequenceDataset,
        normalization: &TargetNormalization,
    ) -> MlResult<Dataset> {
        let targets = sequences
            .targets
            .iter()
            .map(|t| normalization.normalize(*t) as f32)
            .collect();
        Dataset::new(
            sequences.flatten_inputs(),
            sequences.sample_shape().to_vec(),
            Targets::Dense {
                values: targets,
                width: 1,
            },
        )
    }

    fn monte_carlo(
        &self,
        state: &TrainedForecast,
        window: &[SequencePoint],
        last_timestamp: DateTime<Utc>,
        days: usize,
    ) -> MlResult<Vec<f64>> {
        let simulations = self.config.simulations;
        if simulations == 0 {
            return Err(MlError::Runtime("no forecast simulations configured".to_string()));
        }

        let dist = Normal::new(0.0, self.config.noise_std)
            .map_err(|e| MlError::Runtime(format!("invalid forecast noise: {e}")))?;
        // 파라미터 초기화와 다른 스트림
        let mut noise = NoiseSource {
            dist,
            rng: StdRng::seed_from_u64(self.config.seed.wrapping_add(1)),
        };

        let mut sums = vec![0.0; days];
        for _ in 0..simulations {
            let path = self.rollout(state, window, last_timestamp, days, Some(&mut noise))?;
            for (sum, value) in sums.iter_mut().zip(path) {
                *sum += value;
            }
        }

        Ok(sums
            .into_iter()
            .map(|sum| sum / simulations as f64)
            .collect())
    }

    fn rollout(
        &self,
        state: &TrainedForecast,
        window: &[SequencePoint],
        last_timestamp: DateTime<Utc>,
        days: usize,
        mut noise: Option<&mut NoiseSource>,
    ) -> MlResult<Vec<f64>> {
        let sample_shape = [window.len(), SEQUENCE_FEATURES];
        let mut sequence = window.to_vec();
        let mut forecast = Vec::with_capacity(days);

        for day in 0..days {
            let inputs: Vec<f32> = sequence.iter().flatten().copied().collect();
            let prediction = state.model.predict(&inputs, &sample_shape)?;
            let mut normalized = prediction
                .first()
                .and_then(|row| row.first())
                .copied()
                .ok_or_else(|| MlError::Runtime("empty prediction".to_string()))?
                as f64;

            if let Some(source) = noise.as_deref_mut() {
                normalized += source.dist.sample(&mut source.rng);
            }

            let value = state.normalization.denormalize(normalized);
            if !value.is_finite() {
                return Err(MlError::Runtime(format!(
                    "non-finite forecast on day {}",
                    day + 1
                )));
            }
            forecast.push(value.max(0.0));

            let date = last_timestamp + Duration::days(day as i64 + 1);
            let carried = sequence[sequence.len() - 1];
            sequence.remove(0);
            sequence.push(self.extractor.project_point(&date, &carried, value));
        }

        Ok(forecast)
    }
}
