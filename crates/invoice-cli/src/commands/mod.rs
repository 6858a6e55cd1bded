//! CLI 명령어 구현 모듈.

pub mod analyze;
pub mod inspect;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use invoice_analytics::{InvoiceSource, MlError, MlResult};
use invoice_core::InvoiceRecord;
use serde::Deserialize;
use tracing::debug;

/// 인보이스 파일 형식.
///
/// 인보이스 배열 또는 `{"invoices": [...]}` 객체를 모두 받습니다.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InvoiceFile {
    List(Vec<InvoiceRecord>),
    Wrapped { invoices: Vec<InvoiceRecord> },
}

impl From<InvoiceFile> for Vec<InvoiceRecord> {
    fn from(file: InvoiceFile) -> Self {
        match file {
            InvoiceFile::List(invoices) | InvoiceFile::Wrapped { invoices } => invoices,
        }
    }
}

/// JSON 문자열에서 인보이스 목록을 파싱합니다.
pub fn parse_invoices(json: &str) -> Result<Vec<InvoiceRecord>> {
    let file: InvoiceFile =
        serde_json::from_str(json).context("Invoice file must be a JSON array or {\"invoices\": [...]}")?;
    Ok(file.into())
}

/// JSON 파일에서 인보이스 목록을 로드합니다.
pub fn load_invoices(path: impl AsRef<Path>) -> Result<Vec<InvoiceRecord>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read invoice file: {}", path.display()))?;
    let invoices = parse_invoices(&content)
        .with_context(|| format!("Failed to parse invoice file: {}", path.display()))?;
    debug!(path = %path.display(), count = invoices.len(), "Loaded invoices");
    Ok(invoices)
}

/// 세션당 한 번 JSON 파일을 읽는 인보이스 소스.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl InvoiceSource for JsonFileSource {
    async fn fetch_invoices(&self) -> MlResult<Vec<InvoiceRecord>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_invoices(&path))
            .await
            .map_err(|e| MlError::TaskJoin(e.to_string()))?
            .map_err(|e| MlError::InvalidInput(format!("{:#}", e)))
    }
}
