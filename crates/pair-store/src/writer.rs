//! Writes PredictionRecords to Parquet using Arrow.

use crate::types::PredictionRecord;
use arrow::array::*;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Arrow schema for prediction Parquet files (6 columns).
pub fn prediction_schema() -> Schema {
    Schema::new(vec![
        Field::new("split", DataType::Utf8, false),
        Field::new("pair_index", DataType::UInt64, false),
        Field::new("score_x", DataType::Float64, false),
        Field::new("score_y", DataType::Float64, false),
        Field::new("probability", DataType::Float64, false),
        Field::new("target", DataType::Float64, false),
    ])
}

/// Buffers prediction records and writes them as one Parquet file.
#[derive(Default)]
pub struct PredictionWriter {
    records: Vec<PredictionRecord>,
}

impl PredictionWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a single prediction.
    pub fn record(&mut self, record: PredictionRecord) {
        self.records.push(record);
    }

    /// Buffer multiple predictions.
    pub fn record_all(&mut self, records: impl IntoIterator<Item = PredictionRecord>) {
        self.records.extend(records);
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Encode all buffered records as an in-memory Parquet file.
    pub fn into_bytes(self) -> anyhow::Result<Vec<u8>> {
        let mut buf = Vec::new();
        write_parquet(&self.records, &mut buf)?;
        Ok(buf)
    }

    /// Write all buffered records to a Parquet file and return its path.
    pub fn finish(self, output_path: PathBuf) -> anyhow::Result<PathBuf> {
        let file = std::fs::File::create(&output_path)?;
        write_parquet(&self.records, file)?;

        tracing::info!(
            records = self.records.len(),
            path = %output_path.display(),
            "Wrote prediction Parquet file"
        );

        Ok(output_path)
    }
}

fn write_parquet<W: Write + Send>(records: &[PredictionRecord], sink: W) -> anyhow::Result<()> {
    let schema = Arc::new(prediction_schema());

    let batch = if records.is_empty() {
        RecordBatch::new_empty(schema.clone())
    } else {
        build_record_batch(records)?
    };

    let mut writer = ArrowWriter::try_new(sink, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Build an Arrow RecordBatch from prediction records.
fn build_record_batch(records: &[PredictionRecord]) -> anyhow::Result<RecordBatch> {
    let schema = Arc::new(prediction_schema());

    let splits: StringArray = records.iter().map(|r| Some(r.split.to_string())).collect();
    let indices: UInt64Array = records.iter().map(|r| Some(r.pair_index)).collect();
    let scores_x: Float64Array = records.iter().map(|r| Some(r.score_x)).collect();
    let scores_y: Float64Array = records.iter().map(|r| Some(r.score_y)).collect();
    let probabilities: Float64Array = records.iter().map(|r| Some(r.probability)).collect();
    let targets: Float64Array = records.iter().map(|r| Some(r.target)).collect();

    let columns: Vec<Arc<dyn arrow::array::Array>> = vec![
        Arc::new(splits),
        Arc::new(indices),
        Arc::new(scores_x),
        Arc::new(scores_y),
        Arc::new(probabilities),
        Arc::new(targets),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}
