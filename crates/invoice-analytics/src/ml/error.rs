//! ML 모듈 에러 타입.

use crate::ml::types::ModelKind;
use thiserror::Error;

/// ML 작업에서 발생할 수 있는 에러.
#[derive(Debug, Error)]
pub enum MlError {
    /// 모델의 최소 데이터 요건 미달
    #[error("Insufficient data: need {required} {what}, got {actual}")]
    InsufficientData {
        required: usize,
        actual: usize,
        what: &'static str,
    },

    /// 학습이 끝나기 전에 예측/평가 호출
    #[error("Model must be trained before use: {0}")]
    NotTrained(ModelKind),

    /// prediction과 실제값 배열 길이 불일치
    #[error("Predictions and actuals must have the same length: {predictions} != {actuals}")]
    ShapeMismatch { predictions: usize, actuals: usize },

    /// 유효하지 않은 입력 데이터
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 텐서 연산 중 수치/런타임 에러
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// 분석 단계 시간 초과
    #[error("Stage '{stage}' timed out after {secs}s")]
    Timeout { stage: ModelKind, secs: u64 },

    /// 블로킹 작업 join 실패
    #[error("Background task failed: {0}")]
    TaskJoin(String),
}

/// ML 작업을 위한 Result 타입.
pub type MlResult<T> = Result<T, MlError>;

impl MlError {
    /// 호출자 전제조건 위반인지 확인 (다른 데이터로 재시도 가능).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MlError::InsufficientData { .. }
                | MlError::InvalidInput(_)
                | MlError::NotTrained(_)
                | MlError::ShapeMismatch { .. }
        )
    }

    /// 문서화된 fallback 경로로 국소 복구 가능한 일시적 수치 에러인지 확인.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(self, MlError::Runtime(_))
    }

    pub(crate) fn insufficient(required: usize, actual: usize, what: &'static str) -> Self {
        MlError::InsufficientData {
            required,
            actual,
            what,
        }
    }
}

// candle 런타임 에러로부터 변환
impl From<candle_core::Error> for MlError {
    fn from(err: candle_core::Error) -> Self {
        MlError::Runtime(err.to_string())
    }
}

impl From<tokio::task::JoinError> for MlError {
    fn from(err: tokio::task::JoinError) -> Self {
        MlError::TaskJoin(err.to_string())
    }
}
