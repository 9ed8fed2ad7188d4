//! Labeled protein sequences read from a delimited file with a header row.
use crate::error::{PipelineError, PipelineResult};
use polars::prelude::*;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProteinRecord {
    pub label: String,
    pub sequence: String,
}

#[derive(Debug, Clone)]
pub struct DatasetSpec<'a> {
    pub label_column: &'a str,
    pub sequence_column: &'a str,
    /// Stop reading after this many rows.
    pub n_rows: Option<usize>,
}

impl Default for DatasetSpec<'_> {
    fn default() -> Self {
        Self {
            label_column: "name",
            sequence_column: "sequence",
            n_rows: None,
        }
    }
}

fn string_column(df: &DataFrame, name: &str, path: &Path) -> PipelineResult<Column> {
    let column = df.column(name).map_err(|_| PipelineError::MissingColumn {
        column: name.to_string(),
        path: path.display().to_string(),
    })?;
    Ok(column.cast(&DataType::String)?)
}

/// Read `(label, sequence)` records in file order.
///
/// Rows without a sequence are dropped with a warning. Missing labels become empty strings.
pub fn read_dataset<P: AsRef<Path>>(path: P, spec: &DatasetSpec) -> PipelineResult<Vec<ProteinRecord>> {
    let path = path.as_ref();
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_n_rows(spec.n_rows)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let labels = string_column(&df, spec.label_column, path)?;
    let sequences = string_column(&df, spec.sequence_column, path)?;

    let mut records = Vec::with_capacity(df.height());
    for (row, (label, sequence)) in labels
        .as_materialized_series()
        .str()?
        .into_iter()
        .zip(sequences.as_materialized_series().str()?.into_iter())
        .enumerate()
    {
        match sequence.map(str::trim) {
            Some(seq) if !seq.is_empty() => records.push(ProteinRecord {
                label: label.unwrap_or_default().to_string(),
                sequence: seq.to_string(),
            }),
            _ => tracing::warn!(row, label = ?label, "dropping record without a sequence"),
        }
    }
    tracing::info!(path = %path.display(), records = records.len(), "loaded dataset");
    Ok(records)
}
