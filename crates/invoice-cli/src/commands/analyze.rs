//! 분석 명령어.
//!
//! 인보이스 JSON 파일 하나를 스냅샷으로 읽어 매출 예측, 고객 세그먼트,
//! 이상 탐지를 순서대로 실행합니다.
//!
//! # 사용 예시
//!
//! ```bash
//! # 기본 설정으로 분석
//! invoice-ml analyze -i data/invoices.json
//!
//! # 14일 예측, 세그먼트 4개, 결과를 JSON으로 저장
//! invoice-ml analyze -i data/invoices.json --days 14 --segments 4 -o report.json
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use invoice_analytics::ml::{ModelKind, ProgressSink, TrainingProgress};
use invoice_analytics::{AnalyticsReport, AnalyticsSession, StageOutcome};
use invoice_core::AnalyticsConfig;
use tracing::info;

use crate::commands::JsonFileSource;

/// 분석 CLI 설정.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeCliConfig {
    /// 인보이스 JSON 파일
    pub input: PathBuf,
    /// 보고서 저장 경로 (옵션)
    pub output: Option<PathBuf>,
    /// 예측 일 수 오버라이드
    pub days: Option<usize>,
    /// 예측 모델 epoch 오버라이드
    pub epochs: Option<usize>,
    /// 세그먼트 수 오버라이드
    pub segments: Option<usize>,
    /// 시드 오버라이드
    pub seed: Option<u64>,
    /// 진행 표시줄 숨김
    pub quiet: bool,
}

impl AnalyzeCliConfig {
    /// 설정 파일 값 위에 명령줄 인자를 적용합니다.
    pub fn apply(&self, mut analytics: AnalyticsConfig) -> AnalyticsConfig {
        if let Some(days) = self.days {
            analytics.forecast_days = days;
        }
        if let Some(epochs) = self.epochs {
            analytics.forecast_epochs = epochs;
        }
        if let Some(segments) = self.segments {
            analytics.segment_count = segments;
        }
        if let Some(seed) = self.seed {
            analytics.seed = seed;
        }
        analytics
    }
}

/// 분석 실행
pub async fn run_analyze(cli: AnalyzeCliConfig, base: AnalyticsConfig) -> Result<AnalyticsReport> {
    let analytics = cli.apply(base);
    if analytics.segment_count == 0 {
        bail!("Segment count must be at least 1");
    }

    info!(
        input = %cli.input.display(),
        seed = analytics.seed,
        days = analytics.forecast_days,
        segments = analytics.segment_count,
        "Running invoice analytics"
    );

    let mut session = AnalyticsSession::new(analytics);
    let bars = if cli.quiet {
        None
    } else {
        let bars = StageBars::new()?;
        session = session.with_progress(bars.sink());
        Some(bars)
    };

    let source = JsonFileSource::new(&cli.input);
    let report = session.run(&source).await?;

    if let Some(bars) = bars {
        bars.clear();
    }

    println!("\n{}", render_report(&report));

    if let Some(output) = &cli.output {
        save_report(&report, output)?;
        info!("Report saved to: {}", output.display());
    }

    Ok(report)
}

/// 모델별 진행 표시줄.
struct StageBars {
    multi: MultiProgress,
    bars: Arc<HashMap<ModelKind, ProgressBar>>,
}

impl StageBars {
    const STAGES: [(ModelKind, &'static str); 3] = [
        (ModelKind::RevenueForecast, "매출 예측"),
        (ModelKind::CustomerSegmentation, "고객 세그먼트"),
        (ModelKind::AnomalyDetection, "이상 탐지"),
    ];

    fn new() -> Result<Self> {
        let style = ProgressStyle::default_bar()
            .template("{prefix:>14} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("#>-");

        let multi = MultiProgress::new();
        let mut bars = HashMap::new();
        for (kind, label) in Self::STAGES {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(style.clone());
            bar.set_prefix(label);
            bars.insert(kind, bar);
        }

        Ok(Self {
            multi,
            bars: Arc::new(bars),
        })
    }

    fn sink(&self) -> ProgressSink {
        let bars = Arc::clone(&self.bars);
        Arc::new(move |progress: TrainingProgress| {
            if let Some(bar) = bars.get(&progress.model) {
                bar.set_position(u64::from(progress.percent));
                bar.set_message(format!("epoch {}/{}", progress.epoch, progress.total_epochs));
                if progress.percent >= 100 {
                    bar.finish();
                }
            }
        })
    }

    fn clear(&self) {
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
        // 터미널이 아닌 경우 실패할 수 있음
        let _ = self.multi.clear();
    }
}

/// 보고서를 사람이 읽을 수 있는 요약으로 변환합니다.
pub fn render_report(report: &AnalyticsReport) -> String {
    let mut out = String::new();
    let line = "═".repeat(63);

    out.push_str("📊 인보이스 분석 결과\n");
    out.push_str(&line);
    out.push('\n');
    out.push_str(&format!(
        "  생성 시각: {}\n  인보이스: {}건\n\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.invoice_count
    ));

    out.push_str("[매출 예측]\n");
    match &report.forecast {
        StageOutcome::Completed(stage) => {
            let metrics = &stage.evaluation.metrics;
            out.push_str(&format!(
                "  epoch: {}{}\n",
                stage.history.epochs_run(),
                if stage.history.stopped_early { " (early stop)" } else { "" }
            ));
            out.push_str(&format!(
                "  R²: {:.4}  RMSE: {:.2}  MAE: {:.2}  MAPE: {:.2}%\n",
                metrics.r2, metrics.rmse, metrics.mae, metrics.mean_absolute_percentage_error
            ));
            out.push_str(&format!(
                "  품질: {} (R² {}, 데이터 {})\n",
                stage.assessment.overall, stage.assessment.r2_score, stage.assessment.data_quality
            ));
            for recommendation in &stage.assessment.recommendations {
                out.push_str(&format!("  - {}\n", recommendation));
            }
            let total: f64 = stage.forecast.iter().sum();
            out.push_str(&format!(
                "  향후 {}일 예측 합계: {:.2}\n",
                stage.forecast.len(),
                total
            ));
        }
        StageOutcome::Failed { error } => out.push_str(&format!("  ❌ {}\n", error)),
    }
    out.push('\n');

    out.push_str("[고객 세그먼트]\n");
    match &report.segmentation {
        StageOutcome::Completed(stage) => {
            out.push_str(&format!("  고객: {}명\n", stage.customers.len()));
            for segment in &stage.segments {
                out.push_str(&format!(
                    "  세그먼트 {}: {}명, 총 {:.2}, 평균 {:.2}\n",
                    segment.segment, segment.customer_count, segment.total_spent, segment.avg_spent
                ));
            }
        }
        StageOutcome::Failed { error } => out.push_str(&format!("  ❌ {}\n", error)),
    }
    out.push('\n');

    out.push_str("[이상 탐지]\n");
    match &report.anomalies {
        StageOutcome::Completed(stage) => {
            out.push_str(&format!(
                "  정상: {}건  이상: {}건 ({:.1}%)\n",
                stage.report.normal_count,
                stage.report.anomaly_count,
                stage.report.anomaly_rate() * 100.0
            ));
            for score in stage.scores.iter().filter(|s| s.is_anomaly) {
                out.push_str(&format!(
                    "  ⚠️  #{} {} {} (오차 {:.4})\n",
                    score.index,
                    score.invoice.customer_key(),
                    score.invoice.total,
                    score.reconstruction_error
                ));
            }
        }
        StageOutcome::Failed { error } => out.push_str(&format!("  ❌ {}\n", error)),
    }

    out.push_str(&line);
    out
}

/// 보고서를 JSON 파일로 저장합니다.
pub fn save_report(report: &AnalyticsReport, path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    Ok(())
}
