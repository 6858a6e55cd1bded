//! 인보이스 분석 CLI 도구 모음.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 인보이스 JSON 파일 로드
//! - 분석 세션 실행 및 보고서 출력
//! - 데이터 요건 점검

pub mod commands;

pub use commands::*;
