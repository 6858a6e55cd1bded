//! 회귀 품질 지표와 모델 품질 평가.
//!
//! - `calculate_metrics`: MSE, RMSE, MAE, R², MAPE
//! - `assess_model_quality`: R²와 표본 크기로부터 등급과 권장사항을 결정하는
//!   고정 규칙 테이블
//!
//! # 사용 예시
//!
//! ```rust,ignore
//! use invoice_analytics::ml::metrics::{assess_model_quality, calculate_metrics};
//!
//! let metrics = calculate_metrics(&[110.0, 190.0], &[100.0, 200.0])?;
//! let assessment = assess_model_quality(&metrics, 60);
//! println!("{} ({})", assessment.overall, metrics.r2);
//! ```

use super::error::{MlError, MlResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 회귀 지표 묶음.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionMetrics {
    /// 평균 제곱 오차
    pub mse: f64,
    /// 평균 제곱근 오차
    pub rmse: f64,
    /// 평균 절대 오차
    pub mae: f64,
    /// 결정 계수
    pub r2: f64,
    /// MAE / 실제값 평균 × 100
    pub mean_absolute_percentage_error: f64,
}

/// 예측값과 실제값으로 회귀 지표를 계산합니다.
///
/// 실제값이 모두 같으면 (SS_tot = 0) R²는 오차가 없을 때 1, 그 외에는 0으로
/// 보고합니다. 실제값 평균이 0이면 MAPE는 0입니다.
pub fn calculate_metrics(predictions: &[f64], actuals: &[f64]) -> MlResult<RegressionMetrics> {
    if predictions.len() != actuals.len() {
        return Err(MlError::ShapeMismatch {
            predictions: predictions.len(),
            actuals: actuals.len(),
        });
    }
    if actuals.is_empty() {
        return Err(MlError::InvalidInput(
            "metrics require at least one sample".to_string(),
        ));
    }

    let n = actuals.len() as f64;
    let ss_res: f64 = predictions
        .iter()
        .zip(actuals)
        .map(|(p, a)| (p - a).powi(2))
        .sum();
    let mse = ss_res / n;
    let mae = predictions
        .iter()
        .zip(actuals)
        .map(|(p, a)| (p - a).abs())
        .sum::<f64>()
        / n;

    let mean_actual = actuals.iter().sum::<f64>() / n;
    let ss_tot: f64 = actuals.iter().map(|a| (a - mean_actual).powi(2)).sum();

    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };

    let mean_absolute_percentage_error = if mean_actual != 0.0 {
        mae / mean_actual * 100.0
    } else {
        0.0
    };

    Ok(RegressionMetrics {
        mse,
        rmse: mse.sqrt(),
        mae,
        r2,
        mean_absolute_percentage_error,
    })
}

/// 품질 등급.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityTier {
    /// R² 등급: >0.8, >0.6, >0.4, 그 외.
    pub fn from_r2(r2: f64) -> Self {
        if r2 > 0.8 {
            QualityTier::Excellent
        } else if r2 > 0.6 {
            QualityTier::Good
        } else if r2 > 0.4 {
            QualityTier::Fair
        } else {
            QualityTier::Poor
        }
    }

    /// 표본 크기 등급: ≥50, ≥20, ≥10, 그 외.
    pub fn from_sample_size(size: usize) -> Self {
        match size {
            s if s >= 50 => QualityTier::Excellent,
            s if s >= 20 => QualityTier::Good,
            s if s >= 10 => QualityTier::Fair,
            _ => QualityTier::Poor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Poor => "poor",
            QualityTier::Fair => "fair",
            QualityTier::Good => "good",
            QualityTier::Excellent => "excellent",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 개선 권장사항.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// 표본 20개 미만
    CollectMoreData,
    /// R² 0.6 미만
    ImproveFeatures,
    /// MAPE 20% 초과
    ReviewConsistency,
    /// 종합 등급 excellent
    ReadyForDecisions,
}

impl Recommendation {
    /// 사용자에게 보여줄 문구.
    pub fn message(&self) -> &'static str {
        match self {
            Recommendation::CollectMoreData => "Collect more invoice data (aim for 20+ invoices)",
            Recommendation::ImproveFeatures => {
                "Consider adding more features or improving data quality"
            }
            Recommendation::ReviewConsistency => {
                "High prediction errors - review data consistency"
            }
            Recommendation::ReadyForDecisions => {
                "Model is performing well - consider using for business decisions"
            }
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// 모델 품질 평가 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub overall: QualityTier,
    pub r2_score: QualityTier,
    pub data_quality: QualityTier,
    pub recommendations: Vec<Recommendation>,
}

impl QualityAssessment {
    pub fn recommends(&self, recommendation: Recommendation) -> bool {
        self.recommendations.contains(&recommendation)
    }
}

/// 지표와 표본 크기로 품질 등급과 권장사항을 결정합니다.
///
/// 종합 등급은 두 등급이 모두 excellent이면 excellent, 모두 good이면 good,
/// 어느 한쪽이 fair이면 fair, 나머지는 poor입니다.
pub fn assess_model_quality(metrics: &RegressionMetrics, sample_size: usize) -> QualityAssessment {
    use QualityTier::*;

    let r2_score = QualityTier::from_r2(metrics.r2);
    let data_quality = QualityTier::from_sample_size(sample_size);

    let overall = match (r2_score, data_quality) {
        (Excellent, Excellent) => Excellent,
        (Good, Good) => Good,
        (Fair, _) | (_, Fair) => Fair,
        _ => Poor,
    };

    let mut recommendations = Vec::new();
    if sample_size < 20 {
        recommendations.push(Recommendation::CollectMoreData);
    }
    if metrics.r2 < 0.6 {
        recommendations.push(Recommendation::ImproveFeatures);
    }
    if metrics.mean_absolute_percentage_error > 20.0 {
        recommendations.push(Recommendation::ReviewConsistency);
    }
    if overall == Excellent {
        recommendations.push(Recommendation::ReadyForDecisions);
    }

    QualityAssessment {
        overall,
        r2_score,
        data_quality,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics_with(r2: f64, mape: f64) -> RegressionMetrics {
        RegressionMetrics {
            mse: 0.0,
            rmse: 0.0,
            mae: 0.0,
            r2,
            mean_absolute_percentage_error: mape,
        }
    }

    #[test]
    fn test_perfect_predictions() {
        let values = [100.0, 150.0, 220.0];
        let m = calculate_metrics(&values, &values).unwrap();
        assert_eq!(m.mse, 0.0);
        assert_eq!(m.rmse, 0.0);
        assert_eq!(m.mae, 0.0);
        assert_eq!(m.r2, 1.0);
        assert_eq!(m.mean_absolute_percentage_error, 0.0);
    }

    #[test]
    fn test_known_values() {
        let m = calculate_metrics(&[110.0, 190.0], &[100.0, 200.0]).unwrap();
        assert!((m.mse - 100.0).abs() < 1e-9);
        assert!((m.rmse - 10.0).abs() < 1e-9);
        assert!((m.mae - 10.0).abs() < 1e-9);
        // SS_res = 200, SS_tot = 5000
        assert!((m.r2 - 0.96).abs() < 1e-9);
        assert!((m.mean_absolute_percentage_error - 10.0 / 150.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_length_mismatch() {
        let err = calculate_metrics(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert!(matches!(
            err,
            MlError::ShapeMismatch {
                predictions: 2,
                actuals: 1
            }
        ));
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            calculate_metrics(&[], &[]),
            Err(MlError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_constant_actuals() {
        let m = calculate_metrics(&[5.0, 7.0], &[6.0, 6.0]).unwrap();
        assert_eq!(m.r2, 0.0);
        assert!(m.r2.is_finite());

        let zeros = calculate_metrics(&[1.0], &[0.0]).unwrap();
        assert_eq!(zeros.mean_absolute_percentage_error, 0.0);
    }

    #[test]
    fn test_assessment_excellent() {
        let a = assess_model_quality(&metrics_with(0.9, 5.0), 60);
        assert_eq!(a.overall, QualityTier::Excellent);
        assert!(!a.recommends(Recommendation::CollectMoreData));
        assert!(a.recommends(Recommendation::ReadyForDecisions));
    }

    #[test]
    fn test_assessment_poor() {
        let a = assess_model_quality(&metrics_with(0.3, 5.0), 5);
        assert_eq!(a.overall, QualityTier::Poor);
        assert_eq!(a.r2_score, QualityTier::Poor);
        assert_eq!(a.data_quality, QualityTier::Poor);
        assert!(a.recommends(Recommendation::CollectMoreData));
        assert!(a.recommends(Recommendation::ImproveFeatures));
    }

    #[test]
    fn test_assessment_mixed_tiers() {
        // excellent + good 조합은 어느 규칙에도 맞지 않아 poor
        let a = assess_model_quality(&metrics_with(0.9, 30.0), 25);
        assert_eq!(a.overall, QualityTier::Poor);
        assert!(a.recommends(Recommendation::ReviewConsistency));

        let b = assess_model_quality(&metrics_with(0.7, 0.0), 12);
        assert_eq!(b.overall, QualityTier::Fair);

        let c = assess_model_quality(&metrics_with(0.7, 0.0), 30);
        assert_eq!(c.overall, QualityTier::Good);
        assert!(c.recommendations.is_empty());
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(QualityTier::from_r2(0.8), QualityTier::Good);
        assert_eq!(QualityTier::from_r2(0.4), QualityTier::Poor);
        assert_eq!(QualityTier::from_sample_size(50), QualityTier::Excellent);
        assert_eq!(QualityTier::from_sample_size(10), QualityTier::Fair);
        assert_eq!(QualityTier::from_sample_size(9), QualityTier::Poor);
        assert_eq!(QualityTier::Good.to_string(), "good");
    }
}
