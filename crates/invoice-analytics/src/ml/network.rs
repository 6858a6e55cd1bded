//! 세 모델이 공유하는 학습 가능 네트워크 인터페이스와 candle 런타임 헬퍼.
//!
//! 모든 모델은 같은 생명주기를 따릅니다:
//! build → fit → predict → dispose.
//!
//! - `TrainableNetwork`: 레이어 구성과 forward pass를 정의하는 네트워크 변형
//! - `ModelState`: 네트워크와 파라미터 저장소(`VarMap`)를 함께 소유
//! - `fit`: 미니배치, 검증 분할, epoch 콜백을 포함한 공통 학습 루프
//!
//! 텐서는 스코프를 벗어나면 해제되므로 `?` 조기 반환 경로에서도
//! 중간 배치와 예측 결과가 남지 않습니다.

use super::error::{MlError, MlResult};
use super::types::{
    EpochLog, LayerSummary, ModelKind, ModelSummary, TrainingControl, TrainingHistory,
};
use candle_core::{DType, Device, Tensor};
use candle_nn::{loss, AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::trace;

/// 레이어 구성과 forward pass를 정의하는 네트워크 변형.
pub trait TrainableNetwork: Sized + Send {
    /// 네트워크 구성 파라미터
    type Config;

    /// 이 네트워크를 소유하는 모델 종류.
    const KIND: ModelKind;

    /// `vb` 아래에 레이어를 생성합니다.
    fn build(config: &Self::Config, vb: VarBuilder<'_>) -> MlResult<Self>;

    /// forward pass. `rng`가 주어지면 학습 모드(dropout 활성)입니다.
    fn forward_t(&self, xs: &Tensor, rng: Option<&mut StdRng>) -> MlResult<Tensor>;

    /// 레이어 구성 (파라미터 수는 `ModelState::summary`가 채움).
    fn layers(&self) -> Vec<LayerSummary>;
}

/// 학습 목적 함수.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    /// 회귀 / 재구성
    MeanSquaredError,
    /// 출력은 logits, 타겟은 클래스 인덱스
    CrossEntropy,
}

impl Objective {
    fn loss(&self, output: &Tensor, target: &Tensor) -> MlResult<Tensor> {
        let value = match self {
            Objective::MeanSquaredError => loss::mse(output, target)?,
            Objective::CrossEntropy => loss::cross_entropy(output, target)?,
        };
        Ok(value)
    }

    fn mae(&self, output: &Tensor, target: &Tensor) -> MlResult<Option<f32>> {
        match self {
            Objective::MeanSquaredError => {
                let value = output.sub(target)?.abs()?.mean_all()?.to_scalar::<f32>()?;
                Ok(Some(value))
            }
            Objective::CrossEntropy => Ok(None),
        }
    }
}

/// 학습 타겟.
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    /// 샘플당 `width`개의 실수 타겟
    Dense { values: Vec<f32>, width: usize },
    /// 샘플당 하나의 클래스 인덱스
    Classes(Vec<u32>),
}

/// 평탄화된 입력과 타겟으로 구성된 학습 데이터.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// 샘플 순서대로 평탄화된 입력
    pub inputs: Vec<f32>,
    /// 샘플 하나의 모양 (batch 차원 제외)
    pub sample_shape: Vec<usize>,
    pub targets: Targets,
}

impl Dataset {
    pub fn new(inputs: Vec<f32>, sample_shape: Vec<usize>, targets: Targets) -> MlResult<Self> {
        let dataset = Self {
            inputs,
            sample_shape,
            targets,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    fn sample_size(&self) -> usize {
        self.sample_shape.iter().product()
    }

    /// 샘플 수.
    pub fn len(&self) -> usize {
        match self.sample_size() {
            0 => 0,
            size => self.inputs.len() / size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self) -> MlResult<()> {
        let size = self.sample_size();
        if size == 0 || self.inputs.len() % size != 0 {
            return Err(MlError::InvalidInput(format!(
                "input buffer of {} values does not match sample shape {:?}",
                self.inputs.len(),
                self.sample_shape
            )));
        }

        let n = self.inputs.len() / size;
        let target_count = match &self.targets {
            Targets::Dense { values, width } if *width > 0 => values.len() / width,
            Targets::Dense { .. } => 0,
            Targets::Classes(labels) => labels.len(),
        };
        if target_count != n {
            return Err(MlError::ShapeMismatch {
                predictions: n,
                actuals: target_count,
            });
        }
        Ok(())
    }

    fn input_tensor(&self, device: &Device) -> MlResult<Tensor> {
        let mut dims = vec![self.len()];
        dims.extend_from_slice(&self.sample_shape);
        Ok(Tensor::from_vec(self.inputs.clone(), dims, device)?)
    }

    fn target_tensor(&self, device: &Device) -> MlResult<Tensor> {
        let tensor = match &self.targets {
            Targets::Dense { values, width } => {
                Tensor::from_vec(values.clone(), (values.len() / width, *width), device)?
            }
            Targets::Classes(labels) => Tensor::from_vec(labels.clone(), labels.len(), device)?,
        };
        Ok(tensor)
    }
}

/// 공통 학습 루프 옵션.
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    /// 마지막 `floor(n * split)`개 샘플을 검증용으로 분리
    pub validation_split: f64,
    /// epoch마다 학습 샘플 순서를 섞을지 여부
    pub shuffle: bool,
    /// 셔플과 dropout 마스크용 시드
    pub seed: u64,
    pub objective: Objective,
    pub optimizer: ParamsAdamW,
}

/// Adam 파라미터 (weight decay 0).
pub fn adam(lr: f64, beta1: f64, beta2: f64, eps: f64) -> ParamsAdamW {
    ParamsAdamW {
        lr,
        beta1,
        beta2,
        eps,
        weight_decay: 0.0,
    }
}

/// 평가 결과.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    pub mae: Option<f32>,
}

/// 검증 손실 기반 조기 종료.
///
/// `warmup` epoch 이후 검증 손실이 최저값보다 나빠지면 카운트를 올리고,
/// `patience`번 연속되면 학습을 멈춥니다. 개선되면 카운트를 초기화합니다.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    warmup: usize,
    patience: usize,
    best: f32,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(warmup: usize, patience: usize) -> Self {
        Self {
            warmup,
            patience,
            best: f32::INFINITY,
            wait: 0,
        }
    }

    /// epoch 결과를 반영하고 계속 여부를 반환합니다.
    pub fn observe(&mut self, log: &EpochLog) -> TrainingControl {
        if log.epoch > self.warmup && log.val_loss > self.best {
            self.wait += 1;
            if self.wait >= self.patience {
                return TrainingControl::Stop;
            }
        } else {
            self.best = log.val_loss;
            self.wait = 0;
        }
        TrainingControl::Continue
    }

    pub fn best(&self) -> f32 {
        self.best
    }
}

/// 학습된 네트워크와 파라미터 저장소.
///
/// 모델이 이 값을 버리면 (`dispose`) 모든 파라미터 텐서가 해제됩니다.
pub struct ModelState<N> {
    network: N,
    varmap: VarMap,
    device: Device,
}

impl<N: TrainableNetwork> ModelState<N> {
    /// 네트워크를 만들고 시드 기반으로 파라미터를 초기화합니다.
    pub fn build(config: &N::Config, seed: u64) -> MlResult<Self> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let network = N::build(config, vb)?;
        seed_parameters(&varmap, seed)?;

        Ok(Self {
            network,
            varmap,
            device,
        })
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// 전체 파라미터 수.
    pub fn parameter_count(&self) -> usize {
        self.varmap.all_vars().iter().map(|v| v.elem_count()).sum()
    }

    /// 데이터셋으로 네트워크를 학습합니다.
    ///
    /// `on_epoch`가 `TrainingControl::Stop`을 반환하면 해당 epoch 이후
    /// 학습을 멈추고 `stopped_early`를 표시합니다.
    pub fn fit<F>(
        &self,
        dataset: &Dataset,
        options: &FitOptions,
        mut on_epoch: F,
    ) -> MlResult<TrainingHistory>
    where
        F: FnMut(&EpochLog) -> TrainingControl,
    {
        let n = dataset.len();
        if n == 0 {
            return Err(MlError::InvalidInput("training set is empty".to_string()));
        }

        let split = options.validation_split.clamp(0.0, 1.0);
        let mut val_count = (n as f64 * split).floor() as usize;
        if val_count >= n {
            val_count = 0;
        }
        let train_count = n - val_count;
        let batch_size = options.batch_size.max(1);

        let xs = dataset.input_tensor(&self.device)?;
        let ys = dataset.target_tensor(&self.device)?;
        let validation = if val_count > 0 {
            Some((
                xs.narrow(0, train_count, val_count)?,
                ys.narrow(0, train_count, val_count)?,
            ))
        } else {
            None
        };

        let mut optimizer = AdamW::new(self.varmap.all_vars(), options.optimizer.clone())?;
        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut order: Vec<u32> = (0..train_count as u32).collect();
        let mut history = TrainingHistory::default();

        for epoch in 0..options.epochs {
            if options.shuffle {
                order.shuffle(&mut rng);
            }

            let mut loss_sum = 0.0f32;
            let mut mae_sum = 0.0f32;
            let mut tracks_mae = false;

            for chunk in order.chunks(batch_size) {
                let ids = Tensor::from_vec(chunk.to_vec(), chunk.len(), &self.device)?;
                let batch_x = xs.index_select(&ids, 0)?;
                let batch_y = ys.index_select(&ids, 0)?;

                let output = self.network.forward_t(&batch_x, Some(&mut rng))?;
                let batch_loss = options.objective.loss(&output, &batch_y)?;
                optimizer.backward_step(&batch_loss)?;

                let weight = chunk.len() as f32;
                loss_sum += batch_loss.to_scalar::<f32>()? * weight;
                if let Some(mae) = options.objective.mae(&output, &batch_y)? {
                    mae_sum += mae * weight;
                    tracks_mae = true;
                }
            }

            let loss = loss_sum / train_count as f32;
            let val_loss = match &validation {
                Some((val_x, val_y)) => self.evaluate_tensors(val_x, val_y, options.objective)?.loss,
                None => loss,
            };
            if !loss.is_finite() {
                return Err(MlError::Runtime(format!(
                    "training diverged at epoch {epoch}: loss = {loss}"
                )));
            }

            let log = EpochLog {
                epoch,
                loss,
                val_loss,
                mae: tracks_mae.then(|| mae_sum / train_count as f32),
            };
            trace!(model = N::KIND.as_str(), epoch, loss, val_loss, "epoch finished");

            let control = on_epoch(&log);
            history.epochs.push(log);
            if control == TrainingControl::Stop {
                history.stopped_early = true;
                break;
            }
        }

        Ok(history)
    }

    /// dropout 없이 데이터셋 전체의 손실을 계산합니다.
    pub fn evaluate(&self, dataset: &Dataset, objective: Objective) -> MlResult<Evaluation> {
        if dataset.is_empty() {
            return Err(MlError::InvalidInput("evaluation set is empty".to_string()));
        }
        let xs = dataset.input_tensor(&self.device)?;
        let ys = dataset.target_tensor(&self.device)?;
        self.evaluate_tensors(&xs, &ys, objective)
    }

    fn evaluate_tensors(&self, xs: &Tensor, ys: &Tensor, objective: Objective) -> MlResult<Evaluation> {
        let output = self.network.forward_t(xs, None)?;
        Ok(Evaluation {
            loss: objective.loss(&output, ys)?.to_scalar::<f32>()?,
            mae: objective.mae(&output, ys)?,
        })
    }

    /// 추론 모드 forward pass. 결과는 `[n, width]` 행렬입니다.
    pub fn predict(&self, inputs: &[f32], sample_shape: &[usize]) -> MlResult<Vec<Vec<f32>>> {
        let size: usize = sample_shape.iter().product();
        if size == 0 || inputs.is_empty() || inputs.len() % size != 0 {
            return Err(MlError::InvalidInput(format!(
                "cannot batch {} values with sample shape {:?}",
                inputs.len(),
                sample_shape
            )));
        }

        let mut dims = vec![inputs.len() / size];
        dims.extend_from_slice(sample_shape);
        let xs = Tensor::from_vec(inputs.to_vec(), dims, &self.device)?;
        let output = self.network.forward_t(&xs, None)?;
        Ok(output.to_dtype(DType::F32)?.to_vec2::<f32>()?)
    }

    /// 레이어별 파라미터 수를 포함한 모델 요약.
    pub fn summary(&self) -> ModelSummary {
        let vars = match self.varmap.data().lock() {
            Ok(data) => data
                .iter()
                .map(|(name, var)| (name.clone(), var.elem_count()))
                .collect::<Vec<_>>(),
            Err(_) => Vec::new(),
        };

        let layers: Vec<LayerSummary> = self
            .network
            .layers()
            .into_iter()
            .map(|mut layer| {
                let prefix = format!("{}.", layer.name);
                layer.params = vars
                    .iter()
                    .filter(|(name, _)| name.starts_with(&prefix))
                    .map(|(_, count)| count)
                    .sum();
                layer
            })
            .collect();

        ModelSummary {
            model: N::KIND,
            total_params: layers.iter().map(|l| l.params).sum(),
            layers,
        }
    }
}

/// 시드 기반 파라미터 초기화.
///
/// 이름순으로 정렬된 파라미터마다 2차원 가중치는 Glorot uniform
/// (±sqrt(6 / (fan_in + fan_out))), 그 외(bias)는 0으로 설정합니다.
pub(crate) fn seed_parameters(varmap: &VarMap, seed: u64) -> MlResult<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = varmap
        .data()
        .lock()
        .map_err(|_| MlError::Runtime("parameter store lock poisoned".to_string()))?;

    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    for name in names {
        let var = &data[name];
        let dims = var.dims().to_vec();
        let values: Vec<f32> = match dims.as_slice() {
            [fan_out, fan_in] => {
                let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
                let dist = Uniform::new_inclusive(-limit, limit);
                (0..fan_out * fan_in).map(|_| dist.sample(&mut rng)).collect()
            }
            _ => vec![0.0; var.elem_count()],
        };
        var.set(&Tensor::from_vec(values, dims, var.device())?)?;
    }

    Ok(())
}

/// 역 dropout. `rng`가 없으면 (추론 모드) 입력을 그대로 반환합니다.
pub(crate) fn dropout(xs: &Tensor, rate: f32, rng: Option<&mut StdRng>) -> MlResult<Tensor> {
    let Some(rng) = rng else {
        return Ok(xs.clone());
    };
    if rate <= 0.0 {
        return Ok(xs.clone());
    }

    let keep = 1.0 - rate;
    let mask: Vec<f32> = (0..xs.elem_count())
        .map(|_| if rng.gen::<f32>() < keep { 1.0 / keep } else { 0.0 })
        .collect();
    let mask = Tensor::from_vec(mask, xs.dims().to_vec(), xs.device())?;
    Ok(xs.mul(&mask)?)
}

/// dropout 비율 검증.
pub(crate) fn validate_rate(rate: f32) -> MlResult<()> {
    if (0.0..1.0).contains(&rate) {
        Ok(())
    } else {
        Err(MlError::InvalidInput(format!(
            "dropout rate must be in [0, 1), got {rate}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::types::LayerKind;
    use candle_nn::{linear, Linear, Module};

    /// 테스트용 1층 선형 회귀
    struct Probe {
        dense: Linear,
    }

    impl TrainableNetwork for Probe {
        type Config = (usize, usize);
        const KIND: ModelKind = ModelKind::RevenueForecast;

        fn build(config: &Self::Config, vb: VarBuilder<'_>) -> MlResult<Self> {
            Ok(Self {
                dense: linear(config.0, config.1, vb.pp("dense"))?,
            })
        }

        fn forward_t(&self, xs: &Tensor, _rng: Option<&mut StdRng>) -> MlResult<Tensor> {
            Ok(self.dense.forward(xs)?)
        }

        fn layers(&self) -> Vec<LayerSummary> {
            vec![LayerSummary {
                name: "dense".to_string(),
                kind: LayerKind::Dense,
                units: 1,
                activation: None,
                params: 0,
            }]
        }
    }

    fn linear_dataset() -> Dataset {
        // y = 2x - 1
        let xs: Vec<f32> = (0..20).map(|i| i as f32 / 10.0).collect();
        let ys: Vec<f32> = xs.iter().map(|x| 2.0 * x - 1.0).collect();
        let targets = Targets::Dense {
            values: ys,
            width: 1,
        };
        Dataset::new(xs, vec![1], targets).unwrap()
    }

    fn options(epochs: usize) -> FitOptions {
        FitOptions {
            epochs,
            batch_size: 4,
            validation_split: 0.2,
            shuffle: true,
            seed: 7,
            objective: Objective::MeanSquaredError,
            optimizer: adam(0.05, 0.9, 0.999, 1e-7),
        }
    }

    #[test]
    fn test_dataset_validation() {
        let err = Dataset::new(vec![1.0; 5], vec![2], Targets::Classes(vec![0, 1]));
        assert!(matches!(err, Err(MlError::InvalidInput(_))));

        let err = Dataset::new(vec![1.0; 4], vec![2], Targets::Classes(vec![0]));
        assert!(matches!(err, Err(MlError::ShapeMismatch { .. })));

        let ok = Dataset::new(vec![1.0; 4], vec![2], Targets::Classes(vec![0, 1])).unwrap();
        assert_eq!(ok.len(), 2);
    }

    #[test]
    fn test_seeded_build_is_deterministic() {
        let a = ModelState::<Probe>::build(&(3, 2), 11).unwrap();
        let b = ModelState::<Probe>::build(&(3, 2), 11).unwrap();
        let c = ModelState::<Probe>::build(&(3, 2), 12).unwrap();

        let input = [0.5, -0.25, 1.0];
        let pa = a.predict(&input, &[3]).unwrap();
        let pb = b.predict(&input, &[3]).unwrap();
        let pc = c.predict(&input, &[3]).unwrap();
        assert_eq!(pa, pb);
        assert_ne!(pa, pc);
    }

    #[test]
    fn test_fit_reduces_loss() {
        let state = ModelState::<Probe>::build(&(1, 1), 3).unwrap();
        let history = state
            .fit(&linear_dataset(), &options(80), |_| TrainingControl::Continue)
            .unwrap();

        assert_eq!(history.epochs_run(), 80);
        assert!(!history.stopped_early);
        let first = history.epochs[0].loss;
        let last = history.last().unwrap().loss;
        assert!(last < first, "loss {first} -> {last}");
        assert!(history.epochs[0].mae.is_some());
    }

    #[test]
    fn test_fit_stops_on_request() {
        let state = ModelState::<Probe>::build(&(1, 1), 3).unwrap();
        let history = state
            .fit(&linear_dataset(), &options(50), |log| {
                if log.epoch == 4 {
                    TrainingControl::Stop
                } else {
                    TrainingControl::Continue
                }
            })
            .unwrap();

        assert_eq!(history.epochs_run(), 5);
        assert!(history.stopped_early);
    }

    #[test]
    fn test_early_stopping_rule() {
        let mut stopper = EarlyStopping::new(10, 3);
        let log = |epoch, val_loss| EpochLog {
            epoch,
            loss: 0.0,
            val_loss,
            mae: None,
        };

        // warmup 동안은 악화되어도 최저값만 갱신
        for epoch in 0..=10 {
            assert_eq!(stopper.observe(&log(epoch, 1.0 + epoch as f32)), TrainingControl::Continue);
        }
        assert_eq!(stopper.best(), 11.0);

        assert_eq!(stopper.observe(&log(11, 12.0)), TrainingControl::Continue);
        assert_eq!(stopper.observe(&log(12, 5.0)), TrainingControl::Continue);
        assert_eq!(stopper.best(), 5.0);
        assert_eq!(stopper.observe(&log(13, 6.0)), TrainingControl::Continue);
        assert_eq!(stopper.observe(&log(14, 6.0)), TrainingControl::Continue);
        assert_eq!(stopper.observe(&log(15, 6.0)), TrainingControl::Stop);
    }

    #[test]
    fn test_summary_counts_parameters() {
        let state = ModelState::<Probe>::build(&(3, 1), 1).unwrap();
        let summary = state.summary();
        assert_eq!(summary.layers[0].params, 4);
        assert_eq!(summary.total_params, 4);
        assert_eq!(state.parameter_count(), 4);
    }

    #[test]
    fn test_dropout_modes() {
        let device = Device::Cpu;
        let xs = Tensor::ones((4, 8), DType::F32, &device).unwrap();

        let eval = dropout(&xs, 0.5, None).unwrap();
        assert_eq!(eval.to_vec2::<f32>().unwrap(), xs.to_vec2::<f32>().unwrap());

        let mut rng = StdRng::seed_from_u64(1);
        let train = dropout(&xs, 0.5, Some(&mut rng)).unwrap();
        let values: Vec<f32> = train.flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|v| *v == 0.0 || (*v - 2.0).abs() < 1e-6));

        assert!(validate_rate(0.3).is_ok());
        assert!(validate_rate(1.0).is_err());
    }
}
