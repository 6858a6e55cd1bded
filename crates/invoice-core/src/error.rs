//! 인보이스 시스템의 에러 타입.

use thiserror::Error;

/// 핵심 인보이스 에러.
#[derive(Debug, Error)]
pub enum InvoiceError {
    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 잘못된 입력
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),
}

/// 인보이스 작업을 위한 Result 타입.
pub type InvoiceResult<T> = Result<T, InvoiceError>;

impl From<config::ConfigError> for InvoiceError {
    fn from(err: config::ConfigError) -> Self {
        InvoiceError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_error() {
        let err: InvoiceError = config::ConfigError::NotFound("analytics.seed".to_string()).into();
        assert!(matches!(err, InvoiceError::Config(_)));
        assert!(err.to_string().starts_with("설정 에러"));
        assert!(err.to_string().contains("analytics.seed"));
    }
}
