//! 시계열 학습을 위한 슬라이딩 윈도우 시퀀스 생성.

use super::features::{FeatureExtractor, InvoiceFeatures, SequencePoint, SEQUENCE_FEATURES};
use serde::{Deserialize, Serialize};

/// 기본 시퀀스 윈도우 길이.
pub const SEQUENCE_WINDOW: usize = 7;

/// (시퀀스, 타겟) 쌍 모음.
///
/// `sequences[i]`는 `i..i+window` 위치의 정규화 벡터이고,
/// `targets[i]`는 `i+window` 위치 인보이스의 원시 총액입니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceDataset {
    pub window: usize,
    pub sequences: Vec<Vec<SequencePoint>>,
    pub targets: Vec<f64>,
}

impl SequenceDataset {
    /// 쌍의 수.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// `[n, window, 7]` 텐서용 평탄화 버퍼.
    pub fn flatten_inputs(&self) -> Vec<f32> {
        self.sequences
            .iter()
            .flat_map(|seq| seq.iter().flat_map(|point| point.iter().copied()))
            .collect()
    }

    /// 한 샘플의 모양 `[window, 7]`.
    pub fn sample_shape(&self) -> [usize; 2] {
        [self.window, SEQUENCE_FEATURES]
    }
}

/// 정렬된 feature 스트림을 고정 길이 윈도우로 자르는 빌더.
#[derive(Debug, Clone)]
pub struct SequenceBuilder {
    window: usize,
}

impl Default for SequenceBuilder {
    fn default() -> Self {
        Self::new(SEQUENCE_WINDOW)
    }
}

impl SequenceBuilder {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// 시퀀스와 다음 스텝 타겟 생성.
    ///
    /// 결과 길이는 `max(0, N - window)`이며, `N <= window`이면 빈 데이터셋을
    /// 반환합니다. 데이터 부족 판단은 호출자 몫입니다.
    pub fn build(
        &self,
        extractor: &FeatureExtractor,
        features: &[InvoiceFeatures],
    ) -> SequenceDataset {
        let normalized: Vec<SequencePoint> =
            features.iter().map(|f| extractor.normalize(f)).collect();

        let count = features.len().saturating_sub(self.window);
        let mut sequences = Vec::with_capacity(count);
        let mut targets = Vec::with_capacity(count);

        for i in 0..count {
            sequences.push(normalized[i..i + self.window].to_vec());
            targets.push(features[i + self.window].total);
        }

        SequenceDataset {
            window: self.window,
            sequences,
            targets,
        }
    }

    /// 롤아웃 시작점이 되는 마지막 `window`개의 정규화 벡터.
    pub fn last_window(
        &self,
        extractor: &FeatureExtractor,
        features: &[InvoiceFeatures],
    ) -> Option<Vec<SequencePoint>> {
        if features.len() < self.window {
            return None;
        }

        Some(
            features[features.len() - self.window..]
                .iter()
                .map(|f| extractor.normalize(f))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::TOTAL_INDEX;
    use chrono::{Duration, TimeZone, Utc};
    use invoice_core::InvoiceRecord;
    use rust_decimal::Decimal;

    fn features(n: usize) -> Vec<InvoiceFeatures> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let invoices: Vec<_> = (0..n)
            .map(|i| {
                InvoiceRecord::new("A", Decimal::from(100 + i as i64 * 10))
                    .with_created_at(start + Duration::days(i as i64))
            })
            .collect();
        FeatureExtractor::with_defaults()
            .extract_time_series(&invoices)
            .unwrap_or_default()
    }

    #[test]
    fn test_window_alignment() {
        let extractor = FeatureExtractor::with_defaults();
        let data = features(10);
        let dataset = SequenceBuilder::default().build(&extractor, &data);

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.targets, vec![170.0, 180.0, 190.0]);
        assert_eq!(dataset.sequences[1].len(), 7);
        // 두 번째 시퀀스의 첫 원소는 위치 1
        assert!((dataset.sequences[1][0][TOTAL_INDEX] - 0.011).abs() < 1e-6);
        assert_eq!(dataset.flatten_inputs().len(), 3 * 7 * 7);
        assert_eq!(dataset.sample_shape(), [7, 7]);
    }

    #[test]
    fn test_short_input_is_empty() {
        let extractor = FeatureExtractor::with_defaults();
        for n in 0..=7 {
            let dataset = SequenceBuilder::default().build(&extractor, &features(n));
            assert!(dataset.is_empty(), "n = {n}");
        }
    }

    #[test]
    fn test_last_window() {
        let extractor = FeatureExtractor::with_defaults();
        let builder = SequenceBuilder::default();

        assert!(builder.last_window(&extractor, &features(6)).is_none());

        let window = builder.last_window(&extractor, &features(9)).unwrap();
        assert_eq!(window.len(), 7);
        assert!((window[6][TOTAL_INDEX] - 0.018).abs() < 1e-6);
    }
}
