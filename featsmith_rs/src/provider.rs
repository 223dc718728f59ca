use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::CandleTable;
use crate::error::PipelineError;
use crate::storage::write_frame_atomic;

/// Which candles to fetch and under which name to cache them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDataRequest {
    pub symbol: String,
    pub interval: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub provider: String,
}

impl MarketDataRequest {
    /// Symbol with path separators removed (`BTC/USDT` -> `BTCUSDT`).
    pub fn clean_symbol(&self) -> String {
        self.symbol.replace('/', "")
    }

    /// Deterministic cache location shared by the orchestrator and every
    /// family generator.
    pub fn source_path(&self, data_root: &Path) -> PathBuf {
        data_root
            .join(self.clean_symbol())
            .join(&self.interval)
            .join(format!(
                "{}_to_{}_{}.csv",
                self.start_date, self.end_date, self.provider
            ))
    }
}

/// Upstream source of historical candles.
pub trait CandleProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Rows must come back chronologically ordered.
    fn fetch_history(&self, request: &MarketDataRequest) -> Result<CandleTable>;
}

/// Serves candles out of a local CSV archive, trimmed to the requested
/// inclusive date range.
#[derive(Debug, Clone)]
pub struct LocalArchiveProvider {
    archive: PathBuf,
}

impl LocalArchiveProvider {
    pub fn new(archive: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
        }
    }
}

impl CandleProvider for LocalArchiveProvider {
    fn name(&self) -> &str {
        "archive"
    }

    fn fetch_history(&self, request: &MarketDataRequest) -> Result<CandleTable> {
        let table = CandleTable::load(&self.archive)
            .with_context(|| format!("Failed to read candle archive {}", self.archive.display()))?;
        let filtered =
            table.filter_by_date_range(Some(request.start_date), Some(request.end_date))?;
        info!(
            archive = %self.archive.display(),
            rows = filtered.height(),
            symbol = %request.symbol,
            "Candles served from local archive"
        );
        Ok(filtered)
    }
}

/// Resolve a provider by name. Network exchanges are not built in; they
/// need an `archive` to serve from.
pub fn provider_for(name: &str, archive: Option<&Path>) -> Result<Box<dyn CandleProvider>> {
    match archive {
        Some(path) => Ok(Box::new(LocalArchiveProvider::new(path))),
        None => Err(PipelineError::configuration(format!(
            "provider '{name}' has no builtin fetcher; set market_data.archive to a local candle CSV"
        ))
        .into()),
    }
}

/// Return the cached source path, fetching and optionally saving it first
/// when it does not exist yet.
pub fn fetch_if_needed(
    request: &MarketDataRequest,
    data_root: &Path,
    provider: &dyn CandleProvider,
    save: bool,
) -> Result<(PathBuf, Option<CandleTable>)> {
    let path = request.source_path(data_root);
    if path.exists() {
        info!(path = %path.display(), "Source candles already cached; skipping fetch");
        return Ok((path, None));
    }

    info!(
        provider = provider.name(),
        symbol = %request.symbol,
        interval = %request.interval,
        "Source candles not cached; fetching"
    );
    let table = provider.fetch_history(request)?;
    info!(rows = table.height(), "Candles fetched");

    if save {
        let mut frame = table.frame().clone();
        write_frame_atomic(&mut frame, &path)?;
    }
    Ok((path, Some(table)))
}
