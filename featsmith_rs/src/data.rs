use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::*;

use crate::error::PipelineError;

pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const PRICE_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// Read a headed CSV file with full-column schema inference.
pub fn read_csv(path: &Path) -> Result<DataFrame> {
    let lazy = LazyCsvReader::new(path)
        .has_header(true)
        .with_infer_schema_length(None)
        .with_try_parse_dates(false)
        .finish()
        .with_context(|| format!("Failed to initialize CSV reader for {}", path.display()))?;

    lazy.collect()
        .with_context(|| format!("Failed to collect CSV data from {}", path.display()))
}

/// True for integer, float and boolean columns.
pub fn is_numeric_like(dtype: &DataType) -> bool {
    dtype.is_numeric() || matches!(dtype, DataType::Boolean)
}

/// Numeric view of a column. Nulls become NaN and booleans become 0/1.
pub fn numeric_values(series: &Series) -> Result<Vec<f64>> {
    match series.dtype() {
        DataType::Boolean => Ok(series
            .bool()
            .context("Failed to interpret as bool")?
            .into_iter()
            .map(|v| match v {
                Some(true) => 1.0,
                Some(false) => 0.0,
                None => f64::NAN,
            })
            .collect()),
        DataType::Float64 => Ok(series
            .f64()
            .context("Failed to interpret as f64")?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect()),
        dtype if dtype.is_numeric() => {
            let cast = series
                .cast(&DataType::Float64)
                .with_context(|| format!("Failed to cast '{}' to f64", series.name()))?;
            Ok(cast
                .f64()
                .context("Failed to interpret as f64")?
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect())
        }
        other => Err(anyhow!(
            "Unsupported numeric dtype for {}: {other:?}",
            series.name()
        )),
    }
}

/// Column-wise price vectors for the five candle fields.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

/// Chronologically ordered OHLCV rows.
#[derive(Clone)]
pub struct CandleTable {
    frame: Arc<DataFrame>,
    timestamps_ms: Arc<Vec<i64>>,
}

impl CandleTable {
    pub fn load(path: &Path) -> Result<Self> {
        let df = read_csv(path)?;
        Self::from_frame(df).with_context(|| format!("Invalid candle file {}", path.display()))
    }

    /// Validate `df` as a candle table: timestamp plus the five numeric
    /// price columns, timestamps strictly increasing.
    pub fn from_frame(df: DataFrame) -> Result<Self> {
        let ts = df
            .column(TIMESTAMP_COLUMN)
            .map_err(|_| PipelineError::missing_column(TIMESTAMP_COLUMN, "candle table"))?;
        let timestamps_ms = parse_timestamps(ts)?;

        for name in PRICE_COLUMNS {
            let series = df
                .column(name)
                .map_err(|_| PipelineError::missing_column(name, "candle table"))?;
            if !series.dtype().is_numeric() {
                return Err(PipelineError::InvalidCandles(format!(
                    "column '{name}' must be numeric (got {:?})",
                    series.dtype()
                ))
                .into());
            }
        }

        if let Some(pos) = timestamps_ms.windows(2).position(|w| w[1] <= w[0]) {
            return Err(PipelineError::InvalidCandles(format!(
                "timestamps must be strictly increasing (row {} is not after row {pos})",
                pos + 1
            ))
            .into());
        }

        Ok(Self {
            frame: Arc::new(df),
            timestamps_ms: Arc::new(timestamps_ms),
        })
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn frame(&self) -> &DataFrame {
        self.frame.as_ref()
    }

    pub fn timestamps_ms(&self) -> &[i64] {
        self.timestamps_ms.as_slice()
    }

    pub fn float_column(&self, name: &str) -> Result<Vec<f64>> {
        let series = self
            .frame
            .column(name)
            .map_err(|_| PipelineError::missing_column(name, "candle table"))?;
        numeric_values(series)
    }

    pub fn prices(&self) -> Result<PriceSeries> {
        Ok(PriceSeries {
            open: self.float_column("open")?,
            high: self.float_column("high")?,
            low: self.float_column("low")?,
            close: self.float_column("close")?,
            volume: self.float_column("volume")?,
        })
    }

    /// Rows whose calendar date (UTC) lies within the inclusive bounds.
    pub fn filter_by_date_range(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Self> {
        if start.is_none() && end.is_none() {
            return Ok(self.clone());
        }

        let mut keep = Vec::with_capacity(self.timestamps_ms.len());
        let mut kept_ts = Vec::new();
        for &ms in self.timestamps_ms.iter() {
            let Some(dt) = DateTime::<Utc>::from_timestamp_millis(ms) else {
                keep.push(false);
                continue;
            };
            let d = dt.date_naive();
            let ok = start.is_none_or(|s| d >= s) && end.is_none_or(|e| d <= e);
            if ok {
                kept_ts.push(ms);
            }
            keep.push(ok);
        }

        let mask = BooleanChunked::from_slice("date_filter", &keep);
        let filtered = self
            .frame
            .filter(&mask)
            .context("Failed to filter candles to requested date range")?;

        Ok(Self {
            frame: Arc::new(filtered),
            timestamps_ms: Arc::new(kept_ts),
        })
    }
}

fn parse_timestamps(series: &Series) -> Result<Vec<i64>> {
    let null_error = || PipelineError::InvalidCandles("timestamp column contains nulls".into());
    let mut out = Vec::with_capacity(series.len());
    match series.dtype() {
        DataType::Datetime(unit, _) => {
            let ca = series
                .datetime()
                .context("Failed to interpret timestamp column as datetime")?;
            for opt_v in ca.into_iter() {
                let v = opt_v.ok_or_else(null_error)?;
                out.push(match unit {
                    TimeUnit::Nanoseconds => v / 1_000_000,
                    TimeUnit::Microseconds => v / 1_000,
                    TimeUnit::Milliseconds => v,
                });
            }
        }
        dtype if dtype.is_integer() => {
            let cast = series
                .cast(&DataType::Int64)
                .context("Failed to cast timestamp column to i64")?;
            let ca = cast
                .i64()
                .context("Failed to interpret timestamp column as i64")?;
            for opt_v in ca.into_iter() {
                out.push(opt_v.ok_or_else(null_error)?);
            }
        }
        _ => {
            for value in series.iter() {
                let raw = match value {
                    AnyValue::String(s) => s,
                    AnyValue::StringOwned(ref s) => s.as_str(),
                    AnyValue::Null => return Err(null_error().into()),
                    other => {
                        return Err(PipelineError::InvalidCandles(format!(
                            "unsupported timestamp value type {:?}",
                            other.dtype()
                        ))
                        .into());
                    }
                };
                out.push(parse_timestamp_str(raw)?);
            }
        }
    }
    Ok(out)
}

/// Epoch milliseconds for RFC3339, `YYYY-MM-DD HH:MM:SS`, bare dates or
/// integer epoch-millisecond strings.
pub fn parse_timestamp_str(raw: &str) -> Result<i64> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }
    raw.parse::<i64>().map_err(|_| {
        PipelineError::InvalidCandles(format!("unparseable timestamp '{raw}'")).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn load_accepts_mixed_timestamp_formats() -> Result<()> {
        let dir = tempdir()?;
        let path = write(
            dir.path(),
            "candles.csv",
            "timestamp,open,high,low,close,volume\n\
             2024-01-01T00:00:00Z,1,2,0.5,1.5,10\n\
             2024-01-01 01:00:00,1.5,2.5,1,2,12\n",
        );
        let table = CandleTable::load(&path)?;
        assert_eq!(table.height(), 2);
        assert_eq!(table.timestamps_ms()[1] - table.timestamps_ms()[0], 3_600_000);
        let prices = table.prices()?;
        assert_eq!(prices.close, vec![1.5, 2.0]);
        Ok(())
    }

    #[test]
    fn duplicate_timestamps_are_rejected() -> Result<()> {
        let dir = tempdir()?;
        let path = write(
            dir.path(),
            "dupes.csv",
            "timestamp,open,high,low,close,volume\n\
             1704067200000,1,2,0.5,1.5,10\n\
             1704067200000,1,2,0.5,1.5,10\n",
        );
        let err = match CandleTable::load(&path) {
            Ok(_) => panic!("duplicate timestamps accepted"),
            Err(err) => err,
        };
        assert!(matches!(
            crate::error::pipeline_error(&err),
            Some(PipelineError::InvalidCandles(_))
        ));
        Ok(())
    }

    #[test]
    fn missing_price_column_is_reported() -> Result<()> {
        let dir = tempdir()?;
        let path = write(
            dir.path(),
            "no_volume.csv",
            "timestamp,open,high,low,close\n2024-01-01T00:00:00Z,1,2,0.5,1.5\n",
        );
        let err = match CandleTable::load(&path) {
            Ok(_) => panic!("missing volume accepted"),
            Err(err) => err,
        };
        assert!(matches!(
            crate::error::pipeline_error(&err),
            Some(PipelineError::MissingColumn { column, .. }) if column == "volume"
        ));
        Ok(())
    }

    #[test]
    fn filter_by_date_range_retains_only_dates_within_bounds() -> Result<()> {
        let dir = tempdir()?;
        let path = write(
            dir.path(),
            "dates.csv",
            "timestamp,open,high,low,close,volume\n\
             2023-12-31T23:30:00Z,1,1,1,1,1\n\
             2024-01-01T00:00:00Z,2,2,2,2,2\n\
             2024-06-01T00:00:00Z,3,3,3,3,3\n\
             2025-01-01T00:00:00Z,4,4,4,4,4\n",
        );
        let table = CandleTable::load(&path)?;
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let filtered = table.filter_by_date_range(Some(start), Some(end))?;
        assert_eq!(filtered.height(), 2);
        assert_eq!(filtered.timestamps_ms().len(), 2);
        assert_eq!(filtered.prices()?.close, vec![2.0, 3.0]);
        Ok(())
    }
}
