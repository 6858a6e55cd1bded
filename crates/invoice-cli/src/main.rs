//! 인보이스 분석 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 인보이스 파일의 데이터 요건 점검
//! invoice-ml inspect -i data/invoices.json
//!
//! # 전체 분석 (매출 예측 → 고객 세그먼트 → 이상 탐지)
//! invoice-ml analyze -i data/invoices.json
//!
//! # 재현 가능한 실행 + 결과 저장
//! invoice-ml analyze -i data/invoices.json --seed 7 --epochs 50 -o report.json
//!
//! # JSON 로그
//! INVOICE__LOGGING__FORMAT=json RUST_LOG=invoice_analytics=debug invoice-ml analyze -i data/invoices.json
//! ```

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use invoice_core::{init_logging, AppConfig, LogConfig};
use tracing::error;

use invoice_cli::commands::analyze::{run_analyze, AnalyzeCliConfig};
use invoice_cli::commands::inspect::run_inspect;

#[derive(Parser)]
#[command(name = "invoice-ml")]
#[command(about = "Invoice analytics CLI - 매출 예측, 고객 세그먼트, 이상 탐지", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일 (TOML)
    #[arg(short, long, global = true, default_value = "config/default.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 인보이스 분석 실행
    Analyze {
        /// 인보이스 JSON 파일
        #[arg(short, long)]
        input: PathBuf,

        /// 결과 저장 경로 (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 예측 일 수
        #[arg(long)]
        days: Option<usize>,

        /// 매출 예측 모델 학습 epoch
        #[arg(long)]
        epochs: Option<usize>,

        /// 고객 세그먼트 수
        #[arg(long)]
        segments: Option<usize>,

        /// 난수 시드
        #[arg(long)]
        seed: Option<u64>,

        /// 진행 표시줄 숨김
        #[arg(short, long, default_value = "false")]
        quiet: bool,
    },

    /// 인보이스 파일 점검 (학습 없음)
    Inspect {
        /// 인보이스 JSON 파일
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    init_logging(LogConfig::from(&config.logging)).map_err(|e| anyhow!("{}", e))?;

    match cli.command {
        Commands::Analyze {
            input,
            output,
            days,
            epochs,
            segments,
            seed,
            quiet,
        } => {
            let options = AnalyzeCliConfig {
                input,
                output,
                days,
                epochs,
                segments,
                seed,
                quiet,
            };

            let report = run_analyze(options, config.analytics).await.map_err(|e| {
                error!("Analysis failed: {:#}", e);
                e
            })?;

            let failed = report.failed_stages();
            if !failed.is_empty() {
                error!(stages = ?failed, "Some analytics stages failed");
            }
        }

        Commands::Inspect { input } => {
            run_inspect(&input, &config.analytics)?;
        }
    }

    Ok(())
}
