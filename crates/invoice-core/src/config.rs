//! 설정 관리.
//!
//! 이 모듈은 애플리케이션 설정을 정의하고 관리합니다.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::InvoiceResult;

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// 로깅 설정
    pub logging: LoggingConfig,
    /// 분석 세션 설정
    pub analytics: AnalyticsConfig,
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
    /// 분석 단계 span 시작/종료 출력
    pub span_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            span_events: false,
        }
    }
}

/// 분석 세션 설정.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// 네트워크 초기화와 노이즈 주입에 사용할 시드
    pub seed: u64,
    /// 매출 예측 모델 학습 epoch 수
    pub forecast_epochs: usize,
    /// 예측할 일 수
    pub forecast_days: usize,
    /// 고객 세그먼트 수 (k)
    pub segment_count: usize,
    /// 세션 시작에 필요한 최소 인보이스 수
    pub min_session_invoices: usize,
    /// 단계별 타임아웃 (초). 없으면 무제한
    pub stage_timeout_secs: Option<u64>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            forecast_epochs: 30,
            forecast_days: 30,
            segment_count: 3,
            min_session_invoices: 10,
            stage_timeout_secs: None,
        }
    }
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    ///
    /// 파일이 없으면 기본값과 환경 변수만 사용합니다.
    /// 환경 변수는 `INVOICE__ANALYTICS__SEED=7` 형식입니다.
    /// 값의 타입이 맞지 않으면 [`InvoiceError::Config`](crate::error::InvoiceError::Config)를 반환합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> InvoiceResult<Self> {
        let builder = config::Config::builder()
            // 파일에서 로드
            .add_source(config::File::from(path.as_ref()).required(false))
            // 환경 변수로 오버라이드
            .add_source(
                config::Environment::with_prefix("INVOICE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}
