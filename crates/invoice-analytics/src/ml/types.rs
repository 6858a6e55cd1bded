//! ML 모듈의 공통 타입.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 분석 세션이 소유하는 모델 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// 매출 예측 (시퀀스 회귀)
    RevenueForecast,
    /// 고객 세그먼트 분류
    CustomerSegmentation,
    /// 재구성 오차 기반 이상 탐지
    AnomalyDetection,
}

impl ModelKind {
    /// 로깅/식별용 이름.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::RevenueForecast => "revenue_forecast",
            ModelKind::CustomerSegmentation => "customer_segmentation",
            ModelKind::AnomalyDetection => "anomaly_detection",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 한 epoch의 학습 기록.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochLog {
    /// 0부터 시작하는 epoch 번호
    pub epoch: usize,
    /// 학습 손실 (배치 평균)
    pub loss: f32,
    /// 검증 손실. 검증 샘플이 없으면 학습 손실과 같음
    pub val_loss: f32,
    /// 학습 MAE (회귀 목적함수에서만)
    pub mae: Option<f32>,
}

/// `train()`이 반환하는 학습 이력.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    /// epoch별 기록
    pub epochs: Vec<EpochLog>,
    /// early stopping으로 중단되었는지 여부
    pub stopped_early: bool,
}

impl TrainingHistory {
    /// 실행된 epoch 수.
    pub fn epochs_run(&self) -> usize {
        self.epochs.len()
    }

    /// 마지막 epoch 기록.
    pub fn last(&self) -> Option<&EpochLog> {
        self.epochs.last()
    }

    /// 관측된 최소 검증 손실.
    pub fn best_val_loss(&self) -> Option<f32> {
        self.epochs
            .iter()
            .map(|e| e.val_loss)
            .fold(None, |best, v| match best {
                Some(b) if b <= v => Some(b),
                _ => Some(v),
            })
    }
}

/// epoch 콜백의 반환값.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingControl {
    /// 학습 계속
    Continue,
    /// 학습 중단
    Stop,
}

/// 모델별 학습 진행 상황.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingProgress {
    /// 진행 중인 모델
    pub model: ModelKind,
    /// 완료된 epoch 수
    pub epoch: usize,
    /// 계획된 epoch 수
    pub total_epochs: usize,
    /// 0 ~ 100
    pub percent: u8,
}

impl TrainingProgress {
    pub(crate) fn new(model: ModelKind, epoch: usize, total_epochs: usize) -> Self {
        let percent = if total_epochs == 0 {
            100
        } else {
            (epoch.min(total_epochs) * 100 / total_epochs) as u8
        };
        Self {
            model,
            epoch,
            total_epochs,
            percent,
        }
    }

    pub(crate) fn finished(model: ModelKind, epoch: usize, total_epochs: usize) -> Self {
        Self {
            model,
            epoch,
            total_epochs,
            percent: 100,
        }
    }
}

/// 진행 상황 수신자.
pub type ProgressSink = Arc<dyn Fn(TrainingProgress) + Send + Sync>;

/// 협력적 학습 중단 플래그. 설정되면 다음 epoch 경계에서 학습을 멈춥니다.
pub type CancelFlag = Arc<AtomicBool>;

pub(crate) fn is_cancelled(flag: Option<&CancelFlag>) -> bool {
    flag.is_some_and(|f| f.load(Ordering::Relaxed))
}

/// 레이어 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Lstm,
    Dropout,
    Dense,
}

/// 레이어 요약.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSummary {
    /// 레이어 이름 (파라미터 prefix)
    pub name: String,
    /// 레이어 종류
    pub kind: LayerKind,
    /// 출력 유닛 수
    pub units: usize,
    /// 활성화 함수 이름
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation: Option<String>,
    /// 학습 가능한 파라미터 수
    pub params: usize,
}

/// 네트워크 구조 요약.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    /// 모델 종류
    pub model: ModelKind,
    /// 레이어 목록 (입력 쪽부터)
    pub layers: Vec<LayerSummary>,
    /// 전체 파라미터 수
    pub total_params: usize,
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model: {}", self.model)?;
        for layer in &self.layers {
            writeln!(
                f,
                "  {:<10} {:<8} units={:<4} params={}",
                layer.name,
                format!("{:?}", layer.kind),
                layer.units,
                layer.params
            )?;
        }
        write!(f, "Total params: {}", self.total_params)
    }
}
