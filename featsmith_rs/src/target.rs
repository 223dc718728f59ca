use anyhow::{Context, Result};
use polars::prelude::*;
use tracing::{info, warn};

use crate::data::numeric_values;
use crate::error::PipelineError;

pub const TARGET_COLUMN: &str = "target";

/// Next-bar direction labels: `1` when `close[t+1] / close[t] - 1 > 0`,
/// else `0`, and null when the return is not finite. One label per
/// consecutive pair, so the result is one shorter than `close`.
pub fn forward_direction_labels(close: &[f64]) -> Vec<Option<i32>> {
    close
        .windows(2)
        .map(|w| {
            let ret = w[1] / w[0] - 1.0;
            ret.is_finite().then(|| i32::from(ret > 0.0))
        })
        .collect()
}

/// Add a binary `target` column derived from forward price movement,
/// dropping the final row whose forward return is undefined. A frame that
/// already carries `target` is returned unchanged.
pub fn derive_target(frame: DataFrame) -> Result<DataFrame> {
    if frame.column(TARGET_COLUMN).is_ok() {
        info!("Existing target column kept");
        return Ok(frame);
    }

    let close = frame
        .column("close")
        .map_err(|_| PipelineError::missing_column("close", "target derivation"))?;
    let close = numeric_values(close).context("close must be numeric to derive target")?;

    let labels = forward_direction_labels(&close);
    let mut labelled = frame.slice(0, labels.len());
    let positives = labels.iter().filter(|v| **v == Some(1)).count();
    let undefined = labels.iter().filter(|v| v.is_none()).count();
    if undefined > 0 {
        warn!(undefined, "Forward return undefined for some rows; target left null");
    }
    labelled
        .with_column(Series::new(TARGET_COLUMN, labels))
        .context("Failed to attach target column")?;

    info!(
        rows = labelled.height(),
        positives,
        dropped_rows = frame.height() - labelled.height(),
        "Target derived from next-bar close"
    );
    Ok(labelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_compare_strictly_next_close() {
        assert_eq!(
            forward_direction_labels(&[100.0, 105.0, 103.0, 103.0]),
            vec![Some(1), Some(0), Some(0)]
        );
        assert!(forward_direction_labels(&[42.0]).is_empty());
    }

    #[test]
    fn missing_close_gives_null_labels() -> Result<()> {
        assert_eq!(
            forward_direction_labels(&[100.0, f64::NAN, 103.0, 104.0]),
            vec![None, None, Some(1)]
        );

        let out = derive_target(df!("close" => [100.0, f64::NAN, 103.0, 104.0])?)?;
        let labels: Vec<Option<i32>> = out.column(TARGET_COLUMN)?.i32()?.into_iter().collect();
        assert_eq!(labels, vec![None, None, Some(1)]);
        Ok(())
    }

    #[test]
    fn frame_without_close_is_a_missing_column() -> Result<()> {
        let err = derive_target(df!("x" => [1.0, 2.0])?).unwrap_err();
        assert!(matches!(
            crate::error::pipeline_error(&err),
            Some(PipelineError::MissingColumn { column, .. }) if column == "close"
        ));
        Ok(())
    }

    #[test]
    fn empty_frame_stays_empty() -> Result<()> {
        let df = DataFrame::new(vec![Series::new("close", Vec::<f64>::new())])?;
        let out = derive_target(df)?;
        assert_eq!(out.height(), 0);
        Ok(())
    }
}
