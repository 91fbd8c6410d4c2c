//! Reads PredictionRecords from Parquet files.

use crate::types::{PredictionRecord, PredictionSummary, Split};
use arrow::array::*;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::path::Path;

/// Static methods for reading prediction data from Parquet files.
pub struct PredictionReader;

impl PredictionReader {
    /// Read all prediction records from a Parquet file.
    pub fn read_all(path: &Path) -> anyhow::Result<Vec<PredictionRecord>> {
        let file = std::fs::File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut records = Vec::new();
        for batch_result in reader {
            let batch = batch_result?;
            let mut batch_records = extract_records_from_batch(&batch)?;
            records.append(&mut batch_records);
        }

        tracing::debug!(
            count = records.len(),
            path = %path.display(),
            "Read prediction records"
        );

        Ok(records)
    }

    /// Compute summary statistics from a prediction Parquet file.
    pub fn read_summary(path: &Path) -> anyhow::Result<PredictionSummary> {
        let records = Self::read_all(path)?;
        Ok(summarize(&records))
    }
}

/// Count records and correct orderings per split.
pub fn summarize(records: &[PredictionRecord]) -> PredictionSummary {
    let mut summary = PredictionSummary {
        total_records: records.len(),
        ..Default::default()
    };
    for record in records {
        let correct = record.is_correct() as usize;
        match record.split {
            Split::Training => {
                summary.training_count += 1;
                summary.training_correct += correct;
            }
            Split::Validation => {
                summary.validation_count += 1;
                summary.validation_correct += correct;
            }
        }
    }
    summary
}

/// Extract prediction records from a single Arrow RecordBatch.
fn extract_records_from_batch(batch: &RecordBatch) -> anyhow::Result<Vec<PredictionRecord>> {
    let splits = batch
        .column(0)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow::anyhow!("Column 0 (split) is not StringArray"))?;

    let indices = batch
        .column(1)
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| anyhow::anyhow!("Column 1 (pair_index) is not UInt64Array"))?;

    let float_column = |i: usize, name: &str| {
        batch
            .column(i)
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| anyhow::anyhow!("Column {i} ({name}) is not Float64Array"))
    };
    let scores_x = float_column(2, "score_x")?;
    let scores_y = float_column(3, "score_y")?;
    let probabilities = float_column(4, "probability")?;
    let targets = float_column(5, "target")?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        records.push(PredictionRecord {
            split: Split::from_str_lossy(splits.value(i)),
            pair_index: indices.value(i),
            score_x: scores_x.value(i),
            score_y: scores_y.value(i),
            probability: probabilities.value(i),
            target: targets.value(i),
        });
    }

    Ok(records)
}
