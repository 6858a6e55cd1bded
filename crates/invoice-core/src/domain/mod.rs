//! 인보이스 분석을 위한 도메인 모델.

mod invoice;

pub use invoice::*;
